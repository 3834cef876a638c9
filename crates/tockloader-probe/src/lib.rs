//! tockloader-probe - Tock bootloader access through an on-chip debug probe
//!
//! Boards without a usable UART can still be flashed through their SWD/JTAG
//! debugger. The bootloader publishes a small mailbox in RAM and the host
//! moves protocol frames through it with plain memory reads and writes.
//! Talking to the probe itself (J-Link DLL, OpenOCD TCL socket, ...) is left
//! to an implementation of [`DebugProbe`].
//!
//! Two probe flavours are supported, differing only in how they touch
//! target memory:
//!
//! - [`ProbeKind::JLink`]: word-granular accesses, 1 ms polling
//! - [`ProbeKind::OpenOcd`]: byte accesses, 10 ms polling

mod error;
pub mod mailbox;
pub mod probe;
pub mod transport;

pub use error::ProbeError;
pub use mailbox::{MailboxLayout, MAILBOX_MAGIC};
pub use probe::{Attach, DebugProbe, ProbeKind};
pub use transport::{ProbeTarget, ProbeTransport};
