//! Read command implementation

use indicatif::{ProgressBar, ProgressStyle};
use std::error::Error;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use super::Session;

/// Read a flash range into a file, or dump it to stdout
pub fn run_read(
    session: &mut Session,
    address: u32,
    length: u32,
    output: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(format!("Reading {} bytes at 0x{:08X}...", length, address));
    pb.enable_steady_tick(Duration::from_millis(100));

    let data = session.read_range(address, length);
    pb.finish_and_clear();
    let data = data?;

    match output {
        Some(path) => {
            std::fs::write(path, &data)?;
            println!("Wrote {} bytes to {:?}", data.len(), path);
        }
        None => print!("{}", hex_dump(address, &data)),
    }
    Ok(())
}

/// Classic 16 bytes per line dump with an ASCII column
fn hex_dump(address: u32, data: &[u8]) -> String {
    let mut out = String::new();
    for (i, line) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:08X}  ", address as usize + i * 16);
        for column in 0..16 {
            match line.get(column) {
                Some(byte) => {
                    let _ = write!(out, "{:02X} ", byte);
                }
                None => out.push_str("   "),
            }
            if column == 7 {
                out.push(' ');
            }
        }
        out.push_str(" |");
        for &byte in line {
            out.push(if byte.is_ascii_graphic() || byte == b' ' {
                byte as char
            } else {
                '.'
            });
        }
        out.push_str("|\n");
    }
    out
}
