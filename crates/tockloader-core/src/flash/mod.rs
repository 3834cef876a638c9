//! Flash session: install, list and erase apps
//!
//! A [`FlashSession`] turns user-level operations into sequences of
//! bootloader commands. Installing an image always erases the pages it
//! covers, writes them one page at a time (padded with `0xFF`) and verifies
//! the result before reporting success.

pub mod progress;
pub mod region;
pub mod session;

pub use progress::{InstallProgress, NoProgress};
pub use region::FlashRegion;
pub use session::{FlashSession, InstalledApp, SessionConfig, VerifyMode};
