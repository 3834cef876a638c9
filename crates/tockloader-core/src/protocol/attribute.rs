//! Bootloader key/value attributes
//!
//! The bootloader keeps a small table of attributes (board name, architecture,
//! app address, ...) in flash. Each slot is 64 bytes:
//!
//! ```text
//! key[8] (NUL padded)  value_len: u8  value[55]
//! ```

use thiserror::Error;

/// Size of one attribute slot on the wire
pub const ATTRIBUTE_LEN: usize = 64;
/// Maximum key length
pub const KEY_LEN: usize = 8;
/// Maximum value length
pub const VALUE_LEN: usize = 55;

/// Errors building or decoding an attribute
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttributeError {
    #[error("attribute key {0:?} is longer than 8 bytes")]
    KeyTooLong(String),

    #[error("attribute value is {0} bytes, at most 55 fit")]
    ValueTooLong(usize),

    #[error("attribute slot is {0} bytes, expected 64")]
    BadLength(usize),

    #[error("attribute key is not valid ASCII")]
    BadKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    key: String,
    value: Vec<u8>,
}

impl Attribute {
    pub fn new(key: &str, value: impl Into<Vec<u8>>) -> Result<Self, AttributeError> {
        let value = value.into();
        if key.len() > KEY_LEN {
            return Err(AttributeError::KeyTooLong(key.to_string()));
        }
        if !key.is_ascii() {
            return Err(AttributeError::BadKey);
        }
        if value.len() > VALUE_LEN {
            return Err(AttributeError::ValueTooLong(value.len()));
        }
        Ok(Self {
            key: key.to_string(),
            value,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Value as text, lossy for non UTF-8 values
    pub fn value_str(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }

    /// Decode a 64-byte slot; `None` for an unused (erased or zeroed) slot
    pub fn parse(raw: &[u8]) -> Result<Option<Self>, AttributeError> {
        if raw.len() != ATTRIBUTE_LEN {
            return Err(AttributeError::BadLength(raw.len()));
        }
        let key_bytes = &raw[..KEY_LEN];
        if key_bytes.iter().all(|&b| b == 0x00) || key_bytes.iter().all(|&b| b == 0xFF) {
            return Ok(None);
        }

        let key_end = key_bytes.iter().position(|&b| b == 0).unwrap_or(KEY_LEN);
        let key = std::str::from_utf8(&key_bytes[..key_end]).map_err(|_| AttributeError::BadKey)?;
        if !key.is_ascii() {
            return Err(AttributeError::BadKey);
        }

        let len = raw[KEY_LEN] as usize;
        if len > VALUE_LEN {
            return Err(AttributeError::ValueTooLong(len));
        }
        let value = raw[KEY_LEN + 1..KEY_LEN + 1 + len].to_vec();
        Ok(Some(Self {
            key: key.to_string(),
            value,
        }))
    }

    pub fn to_bytes(&self) -> [u8; ATTRIBUTE_LEN] {
        let mut raw = [0u8; ATTRIBUTE_LEN];
        raw[..self.key.len()].copy_from_slice(self.key.as_bytes());
        raw[KEY_LEN] = self.value.len() as u8;
        raw[KEY_LEN + 1..KEY_LEN + 1 + self.value.len()].copy_from_slice(&self.value);
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_layout() {
        let attr = Attribute::new("board", "hail").unwrap();
        let raw = attr.to_bytes();
        assert_eq!(&raw[..8], b"board\0\0\0");
        assert_eq!(raw[8], 4);
        assert_eq!(&raw[9..13], b"hail");
        assert!(raw[13..].iter().all(|&b| b == 0));
        assert_eq!(Attribute::parse(&raw), Ok(Some(attr)));
    }

    #[test]
    fn test_empty_slots() {
        assert_eq!(Attribute::parse(&[0xFF; 64]), Ok(None));
        assert_eq!(Attribute::parse(&[0x00; 64]), Ok(None));
    }

    #[test]
    fn test_limits() {
        assert!(matches!(
            Attribute::new("too-long-key", "x"),
            Err(AttributeError::KeyTooLong(_))
        ));
        assert_eq!(
            Attribute::new("k", vec![0; 56]),
            Err(AttributeError::ValueTooLong(56))
        );
        assert!(Attribute::new("appaddr", vec![0; 55]).is_ok());

        let mut raw = Attribute::new("arch", "cortex-m4").unwrap().to_bytes();
        raw[8] = 60;
        assert_eq!(Attribute::parse(&raw), Err(AttributeError::ValueTooLong(60)));
        assert_eq!(
            Attribute::parse(&raw[..10]),
            Err(AttributeError::BadLength(10))
        );
    }
}
