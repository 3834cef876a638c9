//! tockloader - install and inspect Tock OS applications
//!
//! Talks to the Tock bootloader on a board over one of several channels
//! (a serial port, or an emulated bootloader for testing) and drives the
//! session operations from `tockloader-core`: installing TBF images, listing
//! the installed apps, erasing and reading flash, and reading bootloader
//! attributes. `listen` instead opens a terminal on the kernel's console.

mod channels;
mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use std::error::Error;
use std::time::Duration;
use tockloader_core::board::BoardRegistry;
use tockloader_core::FlashSession;

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let mut boards = BoardRegistry::default();
    if let Some(path) = &cli.board_config {
        boards
            .load_toml_file(path)
            .map_err(|e| format!("Failed to load {:?}: {}", path, e))?;
    }

    let command = match cli.command {
        Commands::ListBoards => {
            commands::list_boards(&boards);
            return Ok(());
        }
        Commands::ListChannels => {
            commands::list_channels();
            return Ok(());
        }
        command => command,
    };

    let profile = boards.get(&cli.board)?;
    if let Commands::Listen = command {
        // Talks to the running kernel, not the bootloader
        return commands::run_listen(&cli.channel, profile);
    }

    let mut config = profile.session_config();
    if let Some(ms) = cli.timeout {
        config.timeout = Duration::from_millis(ms);
    }
    if let Some(retries) = cli.retries {
        config.max_retries = retries;
    }
    log::debug!("Board {}: {:?}", profile.name, config);

    let transport = channels::open_channel(&cli.channel, profile)?;
    let mut session = FlashSession::connect(transport, config)
        .map_err(|e| format!("No bootloader answered on {}: {}", cli.channel, e))?;
    if let Some(baud_rate) = cli.switch_baud {
        session.change_baud_rate(baud_rate)?;
    }

    let result = run_command(&mut session, command);
    if let Err(e) = session.close() {
        log::warn!("Failed to close channel: {}", e);
    }
    result
}

fn run_command(session: &mut commands::Session, command: Commands) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Install { file, address } => commands::run_install(session, &file, address),
        Commands::List => commands::run_list(session),
        Commands::Erase { address, length } => commands::run_erase(session, address, length),
        Commands::Info => commands::run_info(session),
        Commands::Attributes => commands::run_attributes(session),
        Commands::SetAttribute { index, key, value } => {
            commands::run_set_attribute(session, index, &key, &value)
        }
        Commands::Read {
            address,
            length,
            output,
        } => commands::run_read(session, address, length, output.as_deref()),
        Commands::Exit => commands::run_exit(session),
        Commands::ListBoards | Commands::ListChannels | Commands::Listen => Ok(()),
    }
}
