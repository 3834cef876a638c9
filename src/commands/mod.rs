//! CLI command implementations
//!
//! Every command that talks to a board gets an already connected
//! [`Session`]; the listing commands need no board at all, and `listen`
//! opens its own serial console.

mod info;
mod install;
mod list;
mod listen;
mod read;

use std::error::Error;

use tockloader_core::{FlashRegion, FlashSession, Transport};

pub use info::{run_attributes, run_info, run_set_attribute};
pub use install::run_install;
pub use list::{list_boards, list_channels, run_list};
pub use listen::run_listen;
pub use read::run_read;

/// Session over whichever channel the user picked
pub type Session = FlashSession<Box<dyn Transport>>;

/// Erase `length` bytes starting at `address`
pub fn run_erase(session: &mut Session, address: u32, length: u32) -> Result<(), Box<dyn Error>> {
    let region = FlashRegion::new(address, length)?;
    println!("Erasing {} ({} bytes)", region, length);
    session.erase(region)?;
    println!("Erase complete");
    Ok(())
}

/// Start the kernel
pub fn run_exit(session: &mut Session) -> Result<(), Box<dyn Error>> {
    session.exit_bootloader()?;
    println!("Left the bootloader");
    Ok(())
}

/// Format a byte count for humans
fn format_size(bytes: u32) -> String {
    if bytes >= 1024 * 1024 && bytes % (1024 * 1024) == 0 {
        format!("{} MiB", bytes / (1024 * 1024))
    } else if bytes >= 1024 && bytes % 1024 == 0 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}
