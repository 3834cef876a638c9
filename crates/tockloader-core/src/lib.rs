//! tockloader-core - Host side of the Tock bootloader protocol
//!
//! This crate contains everything needed to talk to a board running the Tock
//! bootloader, independent of how the bytes actually reach the board:
//!
//! - [`framing`]: the byte-level frame codec (sync marker, escaping)
//! - [`transport`]: the [`Transport`] trait implemented by serial links,
//!   debug probes and the in-memory emulator
//! - [`protocol`]: command/response types and the retrying [`ProtocolEngine`]
//! - [`tbf`]: the Tock Binary Format header parser and builder
//! - [`flash`]: the [`FlashSession`] that installs, lists and erases apps
//! - [`board`]: built-in board profiles and the TOML board file loader
//!
//! # Example
//!
//! ```no_run
//! use tockloader_core::flash::{FlashSession, SessionConfig};
//! use tockloader_core::transport::Transport;
//!
//! fn list_apps<T: Transport>(transport: T) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = FlashSession::connect(transport, SessionConfig::default())?;
//!     for app in session.list()? {
//!         println!("0x{:08X} {:?}", app.address, app.header.package_name());
//!     }
//!     Ok(())
//! }
//! ```

pub mod board;
pub mod error;
pub mod flash;
pub mod framing;
pub mod protocol;
pub mod tbf;
pub mod transport;

// Re-exports
pub use error::{
    ConnectError, FramingError, HeaderError, InstallError, ProtocolError, RegionError,
    SessionError, TransportError,
};
pub use flash::{FlashRegion, FlashSession, InstallProgress, SessionConfig};
pub use framing::{CommandDecoder, Frame, ResponseDecoder};
pub use protocol::{Command, ProtocolEngine, Rejection, Response, Status};
pub use tbf::{TbfEntry, TbfFlags, TbfHeader};
pub use transport::{Connect, Transport};
