//! CLI argument parsing

use crate::channels;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tockloader_core::board::{parse_number, parse_size};

/// Generate dynamic help text for the channel argument
fn channel_help() -> String {
    format!(
        "Channel to the bootloader [available: {}]",
        channels::channel_names_short()
    )
}

#[derive(Parser)]
#[command(name = "tockloader")]
#[command(author, version, about = "Tock OS application loader", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(
        short,
        long,
        global = true,
        default_value = "serial:port=/dev/ttyACM0",
        help = channel_help()
    )]
    pub channel: String,

    /// Board profile (see list-boards)
    #[arg(short, long, global = true, default_value = "generic")]
    pub board: String,

    /// Extra board profiles (TOML file with [[board]] tables)
    #[arg(long, global = true)]
    pub board_config: Option<PathBuf>,

    /// Per-command timeout in milliseconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Retries after a lost or corrupted response
    #[arg(long, global = true)]
    pub retries: Option<u32>,

    /// Move the link to this baud rate once connected
    #[arg(long, global = true)]
    pub switch_baud: Option<u32>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install a TBF application image
    Install {
        /// TBF file to install
        file: PathBuf,

        /// Flash address (default: after the last installed app)
        #[arg(short, long, value_parser = parse_number)]
        address: Option<u32>,
    },

    /// List installed applications
    List,

    /// Erase a page-aligned flash range
    Erase {
        /// Start address
        #[arg(short, long, value_parser = parse_number)]
        address: u32,

        /// Number of bytes (e.g. 4096, 0x1000, 16K)
        #[arg(short, long, value_parser = parse_size)]
        length: u32,
    },

    /// Show bootloader information
    Info,

    /// Show the bootloader's key/value attributes
    Attributes,

    /// Store one bootloader attribute
    SetAttribute {
        /// Slot index (0-15)
        index: u8,
        /// Key (up to 8 ASCII characters)
        key: String,
        /// Value (up to 55 bytes)
        value: String,
    },

    /// Read a flash range
    Read {
        /// Start address
        #[arg(short, long, value_parser = parse_number)]
        address: u32,

        /// Number of bytes (e.g. 256, 0x100, 1K)
        #[arg(short, long, value_parser = parse_size)]
        length: u32,

        /// Write to this file instead of printing a hex dump
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Leave the bootloader and start the kernel
    Exit,

    /// Open a terminal on the board's serial console
    Listen,

    /// List known board profiles
    ListBoards,

    /// List available channels
    ListChannels,
}
