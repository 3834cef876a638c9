//! List commands implementation

use std::error::Error;

use tockloader_core::board::BoardRegistry;

use super::{format_size, Session};
use crate::channels;

/// Print the apps found in flash
pub fn run_list(session: &mut Session) -> Result<(), Box<dyn Error>> {
    let apps = session.list()?;
    if apps.is_empty() {
        println!("No apps installed");
        return Ok(());
    }

    println!(
        "{:<4} {:<20} {:>10} {:>10} {:>8} {:>8}",
        "#", "Name", "Address", "Size", "Enabled", "Sticky"
    );
    println!("{}", "-".repeat(65));
    for (index, app) in apps.iter().enumerate() {
        println!(
            "{:<4} {:<20} 0x{:08X} {:>10} {:>8} {:>8}",
            index,
            app.name(),
            app.address,
            format_size(app.header.total_size()),
            if app.header.enabled() { "yes" } else { "no" },
            if app.header.sticky() { "yes" } else { "no" },
        );
    }
    Ok(())
}

/// List all known board profiles
pub fn list_boards(boards: &BoardRegistry) {
    println!("Known boards:");
    println!();
    println!(
        "{:<16} {:>10} {:>12} {:>12}",
        "Name", "Page", "App start", "App region"
    );
    println!("{}", "-".repeat(53));
    for name in boards.names() {
        if let Ok(board) = boards.get(name) {
            println!(
                "{:<16} {:>10} {:>12} {:>12}",
                board.name,
                format_size(board.page_size),
                format!("0x{:08X}", board.app_address),
                format_size(board.app_region_len)
            );
        }
    }
}

/// List all channels compiled into this build
pub fn list_channels() {
    println!("Supported channels:");
    println!();
    for c in channels::available_channels() {
        println!("  {:8} - {}", c.name, c.description);
    }
}
