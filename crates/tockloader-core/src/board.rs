//! Board profiles
//!
//! A profile carries the flash geometry a session needs: page size and where
//! the application region starts and ends. A few boards are built in; more
//! can be described in a TOML file:
//!
//! ```toml
//! [[board]]
//! name = "my_board"
//! page_size = 512
//! app_address = 0x40000
//! app_region_size = "256 KiB"
//! verify = "read-back"
//! baud_rate = 115200
//! ```
//!
//! Profiles from a file replace built-in ones of the same name.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::flash::{SessionConfig, VerifyMode};
use crate::framing::MAX_PAYLOAD_LEN;

/// Errors loading board profiles
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("failed to read board file: {0}")]
    Io(String),

    #[error("failed to parse board file: {0}")]
    Parse(String),

    #[error("unknown board: {0}")]
    UnknownBoard(String),

    #[error("board {name}: {reason}")]
    Invalid { name: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BoardProfile {
    pub name: String,
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub page_size: u32,
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub app_address: u32,
    #[serde(rename = "app_region_size", deserialize_with = "deserialize_size")]
    pub app_region_len: u32,
    #[serde(default)]
    pub verify: VerifyMode,
    #[serde(default)]
    pub baud_rate: Option<u32>,
}

impl BoardProfile {
    fn builtin(name: &str, page_size: u32, app_address: u32, app_region_len: u32) -> Self {
        Self {
            name: name.to_string(),
            page_size,
            app_address,
            app_region_len,
            verify: VerifyMode::Crc,
            baud_rate: None,
        }
    }

    fn validate(&self) -> Result<(), BoardError> {
        let invalid = |reason: &str| BoardError::Invalid {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.page_size == 0 || !self.page_size.is_power_of_two() {
            return Err(invalid("page_size must be a power of two"));
        }
        // A page write carries the 4 byte address in the same payload
        if self.page_size as usize > MAX_PAYLOAD_LEN - 4 {
            return Err(invalid("page_size does not fit in one write command"));
        }
        if self.app_address % self.page_size != 0 || self.app_region_len % self.page_size != 0 {
            return Err(invalid("application region must be page aligned"));
        }
        if self.app_region_len == 0 || self.app_address.checked_add(self.app_region_len - 1).is_none() {
            return Err(invalid("application region is empty or wraps"));
        }
        Ok(())
    }

    /// Session settings for this board, with default timeouts
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            page_size: self.page_size,
            app_address: self.app_address,
            app_region_len: self.app_region_len,
            verify: self.verify,
            ..SessionConfig::default()
        }
    }
}

/// Profiles shipped with the tool
pub fn builtin_profiles() -> Vec<BoardProfile> {
    vec![
        BoardProfile::builtin("generic", 512, 0x30000, 0x50000),
        BoardProfile::builtin("hail", 512, 0x30000, 0x50000),
        BoardProfile::builtin("imix", 512, 0x40000, 0x40000),
        BoardProfile::builtin("nrf52dk", 4096, 0x30000, 0x50000),
        BoardProfile::builtin("microbit_v2", 4096, 0x40000, 0x40000),
    ]
}

#[derive(Debug, Deserialize)]
struct BoardFile {
    #[serde(default)]
    board: Vec<BoardProfile>,
}

/// Lookup table of board profiles
#[derive(Debug, Clone)]
pub struct BoardRegistry {
    profiles: Vec<BoardProfile>,
}

impl Default for BoardRegistry {
    fn default() -> Self {
        Self {
            profiles: builtin_profiles(),
        }
    }
}

impl BoardRegistry {
    /// Add profiles from a TOML file on top of the built-in ones
    pub fn load_toml_file(&mut self, path: impl AsRef<Path>) -> Result<(), BoardError> {
        let content = fs::read_to_string(path).map_err(|e| BoardError::Io(e.to_string()))?;
        self.load_toml_str(&content)
    }

    pub fn load_toml_str(&mut self, content: &str) -> Result<(), BoardError> {
        let file: BoardFile =
            toml::from_str(content).map_err(|e| BoardError::Parse(e.to_string()))?;
        for profile in file.board {
            profile.validate()?;
            log::debug!("Loaded board profile {}", profile.name);
            self.profiles.retain(|p| p.name != profile.name);
            self.profiles.push(profile);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&BoardProfile, BoardError> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| BoardError::UnknownBoard(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.iter().map(|p| p.name.as_str())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HexOrInt {
    Int(u32),
    Str(String),
}

/// Deserialize a u32 that can be hex (0x...) or decimal
fn deserialize_hex_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}

/// Deserialize a size that can be a number or a string like "256 KiB"
fn deserialize_size<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}

/// Parse a number that can be hex (0x...) or decimal
pub fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

/// Parse a size such as "4096", "0x1000", "4 KiB" or "1 MiB"
pub fn parse_size(s: &str) -> Result<u32, String> {
    if let Ok(n) = parse_number(s) {
        return Ok(n);
    }

    let lower = s.trim().to_lowercase();
    let (digits, multiplier) = if let Some(n) = lower.strip_suffix("mib") {
        (n.trim(), 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("kib") {
        (n.trim(), 1024)
    } else if let Some(n) = lower.strip_suffix('k') {
        (n.trim(), 1024)
    } else {
        return Err(format!("invalid size: {}", s));
    };

    let n: u32 = digits.parse().map_err(|_| format!("invalid size: {}", s))?;
    n.checked_mul(multiplier)
        .ok_or_else(|| format!("size too large: {}", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles_are_valid() {
        for profile in builtin_profiles() {
            profile.validate().unwrap();
        }
        let registry = BoardRegistry::default();
        assert_eq!(registry.get("hail").unwrap().page_size, 512);
        assert!(matches!(
            registry.get("nope"),
            Err(BoardError::UnknownBoard(_))
        ));
    }

    #[test]
    fn test_toml_board_file() {
        let mut registry = BoardRegistry::default();
        registry
            .load_toml_str(
                r#"
                [[board]]
                name = "custom"
                page_size = "0x800"
                app_address = 0x20000
                app_region_size = "128 KiB"
                verify = "read-back"
                baud_rate = 921600

                [[board]]
                name = "hail"
                page_size = 512
                app_address = "0x40000"
                app_region_size = "0x40000"
                "#,
            )
            .unwrap();

        let custom = registry.get("custom").unwrap();
        assert_eq!(custom.page_size, 0x800);
        assert_eq!(custom.app_region_len, 128 * 1024);
        assert_eq!(custom.verify, VerifyMode::ReadBack);
        assert_eq!(custom.baud_rate, Some(921_600));

        let hail = registry.get("hail").unwrap();
        assert_eq!(hail.app_address, 0x40000);
        assert_eq!(registry.names().filter(|&n| n == "hail").count(), 1);

        let config = hail.session_config();
        assert_eq!(config.app_address, 0x40000);
        assert_eq!(config.page_size, 512);
    }

    #[test]
    fn test_invalid_board_is_rejected() {
        let mut registry = BoardRegistry::default();
        let err = registry
            .load_toml_str(
                r#"
                [[board]]
                name = "odd"
                page_size = 500
                app_address = 0
                app_region_size = 1000
                "#,
            )
            .unwrap_err();
        assert!(matches!(err, BoardError::Invalid { .. }));
        assert!(matches!(
            registry.load_toml_str("[[board]]\nname = 3"),
            Err(BoardError::Parse(_))
        ));
    }

    #[test]
    fn test_page_size_must_fit_a_write_command() {
        let mut profile = BoardProfile::builtin("big", 16 * 1024, 0, 0x40000);
        assert!(matches!(
            profile.validate(),
            Err(BoardError::Invalid { .. })
        ));
        profile.page_size = 8 * 1024;
        assert!(profile.validate().is_ok());

        let mut registry = BoardRegistry::default();
        assert!(matches!(
            registry.load_toml_str(
                r#"
                [[board]]
                name = "huge-pages"
                page_size = "0x4000"
                app_address = 0
                app_region_size = "256 KiB"
                "#,
            ),
            Err(BoardError::Invalid { .. })
        ));
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096"), Ok(4096));
        assert_eq!(parse_size("0x1000"), Ok(4096));
        assert_eq!(parse_size("4 KiB"), Ok(4096));
        assert_eq!(parse_size("1MiB"), Ok(1024 * 1024));
        assert!(parse_size("lots").is_err());
    }
}
