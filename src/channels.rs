//! Channel registration and dispatch
//!
//! A channel string names a transport and its options, e.g.
//! `serial:port=/dev/ttyACM0,baud=115200` or `dummy`.

use std::error::Error;

use tockloader_core::board::BoardProfile;
use tockloader_core::Transport;

/// Information about a channel
pub struct ChannelInfo {
    pub name: &'static str,
    pub description: &'static str,
}

/// Channels enabled at compile time
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_channels() -> Vec<ChannelInfo> {
    let mut channels = Vec::new();

    #[cfg(feature = "serial")]
    channels.push(ChannelInfo {
        name: "serial",
        description: "UART bootloader (port=<path>,baud=<rate>,entry=none|dtr|1200)",
    });

    #[cfg(feature = "dummy")]
    channels.push(ChannelInfo {
        name: "dummy",
        description: "In-memory emulated bootloader for testing",
    });

    channels
}

/// Short list of channel names for CLI help
pub fn channel_names_short() -> String {
    let names: Vec<&str> = available_channels().iter().map(|c| c.name).collect();
    names.join(", ")
}

/// Split `name:options` into its parts
pub fn parse_channel_string(s: &str) -> (&str, &str) {
    s.split_once(':').unwrap_or((s, ""))
}

/// Open the transport a channel string describes
#[allow(unused_variables)]
pub fn open_channel(
    channel: &str,
    profile: &BoardProfile,
) -> Result<Box<dyn Transport>, Box<dyn Error>> {
    let (name, options) = parse_channel_string(channel);

    match name {
        #[cfg(feature = "serial")]
        "serial" => open_serial(serial_target(options, profile)?),

        #[cfg(feature = "dummy")]
        "dummy" => {
            use tockloader_core::Connect;
            use tockloader_dummy::{DummyBootloader, DummyConfig};

            let config = DummyConfig {
                flash_size: dummy_flash_size(profile)?,
                page_size: profile.page_size as usize,
                board: profile.name.clone(),
                ..DummyConfig::default()
            };
            log::info!("Using emulated bootloader ({} KiB flash)", config.flash_size / 1024);
            Ok(Box::new(DummyBootloader::open(&config)?))
        }

        _ => Err(unknown_channel_error(name)),
    }
}

/// Open the serial port a channel string names, without entering the
/// bootloader, for talking to the running kernel's console
pub fn open_console(
    channel: &str,
    profile: &BoardProfile,
) -> Result<Box<dyn Transport>, Box<dyn Error>> {
    let (name, options) = parse_channel_string(channel);
    match name {
        #[cfg(feature = "serial")]
        "serial" => {
            let mut target = serial_target(options, profile)?;
            target.entry = tockloader_serial::EntryMethod::None;
            open_serial(target)
        }
        _ => Err(format!("listen needs a serial channel, got '{}'", name).into()),
    }
}

/// Parse serial options, taking the baud rate from the board unless given
#[cfg(feature = "serial")]
fn serial_target(
    options: &str,
    profile: &BoardProfile,
) -> Result<tockloader_serial::SerialTarget, Box<dyn Error>> {
    let mut target = tockloader_serial::SerialTarget::parse(options)
        .map_err(|e| format!("Invalid serial parameters: {}", e))?;
    let explicit_baud = options.split(',').any(|opt| opt.starts_with("baud="));
    if let (false, Some(baud_rate)) = (explicit_baud, profile.baud_rate) {
        target.baud_rate = baud_rate;
    }
    Ok(target)
}

#[cfg(feature = "serial")]
fn open_serial(
    target: tockloader_serial::SerialTarget,
) -> Result<Box<dyn Transport>, Box<dyn Error>> {
    log::info!("Opening serial port {}...", target.port);
    let transport = tockloader_serial::SerialTransport::open(&target).map_err(|e| {
        format!(
            "Failed to open {}: {}\nMake sure the board is connected and you have permissions.",
            target.port, e
        )
    })?;
    Ok(Box::new(transport))
}

/// Emulated flash large enough to hold the board's whole application region
#[cfg_attr(not(feature = "dummy"), allow(dead_code))]
fn dummy_flash_size(profile: &BoardProfile) -> Result<usize, String> {
    let end = u64::from(profile.app_address) + u64::from(profile.app_region_len);
    usize::try_from(end).map_err(|_| {
        format!(
            "Board {}: application region ends at 0x{:X}, too large to emulate",
            profile.name, end
        )
    })
}

fn unknown_channel_error(name: &str) -> Box<dyn Error> {
    let mut msg = format!("Unknown channel: {}\n\nAvailable channels:\n", name);
    for c in available_channels() {
        msg.push_str(&format!("  {:8} - {}\n", c.name, c.description));
    }
    msg.into()
}
