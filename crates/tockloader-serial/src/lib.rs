//! tockloader-serial - UART transport for the Tock bootloader
//!
//! Most Tock boards expose the bootloader on a USB serial adapter. Opening
//! the port optionally pulses the modem control lines (or "touches" the port
//! at 1200 baud) to reset the chip into its bootloader.
//!
//! # Example
//!
//! ```no_run
//! use tockloader_core::flash::{FlashSession, SessionConfig};
//! use tockloader_serial::{SerialTarget, SerialTransport};
//!
//! let target = SerialTarget::parse("port=/dev/ttyACM0,baud=115200")?;
//! let transport = SerialTransport::open(&target)?;
//! let mut session = FlashSession::connect(transport, SessionConfig::default())?;
//! println!("{}", session.info()?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod target;
pub mod transport;

pub use target::{EntryMethod, SerialTarget, DEFAULT_BAUD_RATE};
pub use transport::SerialTransport;
