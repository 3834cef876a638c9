//! Serial connection descriptors

use tockloader_core::ConnectError;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// How to get the board into its bootloader when the port is opened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EntryMethod {
    /// The bootloader is already running
    None,
    /// Reset with DTR while RTS holds the bootloader select pin
    #[default]
    DtrRts,
    /// Briefly switch the port to 1200 baud
    Touch1200,
}

/// Which port to open and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialTarget {
    pub port: String,
    pub baud_rate: u32,
    pub entry: EntryMethod,
}

impl SerialTarget {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            entry: EntryMethod::default(),
        }
    }

    /// Parse `port=<path>[,baud=<rate>][,entry=none|dtr|1200]`
    pub fn parse(params: &str) -> Result<Self, ConnectError> {
        let mut port = None;
        let mut baud_rate = DEFAULT_BAUD_RATE;
        let mut entry = EntryMethod::default();

        for opt in params.split(',').filter(|s| !s.is_empty()) {
            let (key, value) = opt.split_once('=').ok_or_else(|| {
                ConnectError::InvalidParameter(format!(
                    "'{}' (expected key=value)",
                    opt
                ))
            })?;
            match key {
                "port" | "dev" => port = Some(value.to_string()),
                "baud" => {
                    baud_rate = value.parse().map_err(|_| {
                        ConnectError::InvalidParameter(format!("invalid baud rate '{}'", value))
                    })?
                }
                "entry" => {
                    entry = match value {
                        "none" => EntryMethod::None,
                        "dtr" => EntryMethod::DtrRts,
                        "1200" => EntryMethod::Touch1200,
                        other => {
                            return Err(ConnectError::InvalidParameter(format!(
                                "unknown entry method '{}'",
                                other
                            )))
                        }
                    }
                }
                other => {
                    return Err(ConnectError::InvalidParameter(format!(
                        "unknown serial option '{}'",
                        other
                    )))
                }
            }
        }

        let port = port.ok_or_else(|| {
            ConnectError::InvalidParameter("serial channel requires port=<path>".into())
        })?;
        Ok(Self {
            port,
            baud_rate,
            entry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let target = SerialTarget::parse("port=/dev/ttyACM0").unwrap();
        assert_eq!(target, SerialTarget::new("/dev/ttyACM0"));
        assert_eq!(target.baud_rate, 115_200);
        assert_eq!(target.entry, EntryMethod::DtrRts);
    }

    #[test]
    fn test_parse_all_options() {
        let target = SerialTarget::parse("dev=COM3,baud=921600,entry=none").unwrap();
        assert_eq!(target.port, "COM3");
        assert_eq!(target.baud_rate, 921_600);
        assert_eq!(target.entry, EntryMethod::None);

        let target = SerialTarget::parse("port=/dev/ttyUSB1,entry=1200").unwrap();
        assert_eq!(target.entry, EntryMethod::Touch1200);
    }

    #[test]
    fn test_parse_errors() {
        assert!(SerialTarget::parse("").is_err());
        assert!(SerialTarget::parse("baud=9600").is_err());
        assert!(SerialTarget::parse("port=/dev/ttyACM0,baud=fast").is_err());
        assert!(SerialTarget::parse("port=/dev/ttyACM0,parity").is_err());
        assert!(SerialTarget::parse("port=/dev/ttyACM0,entry=magic").is_err());
        assert!(SerialTarget::parse("port=/dev/ttyACM0,speed=1").is_err());
    }
}
