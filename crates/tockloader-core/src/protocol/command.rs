//! Command and response types

use std::fmt;

use super::attribute::Attribute;
use super::codes::*;
use crate::error::{FramingError, ProtocolError};
use crate::framing::{self, Frame};

/// Error status codes a bootloader can answer with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    Overflow,
    BadAddress,
    InternalError,
    BadArguments,
    UnknownCommand,
    ExternalFlashTimeout,
    ExternalFlashPageError,
    ChangeBaudFailed,
}

impl Rejection {
    /// Map a response code to a rejection, `None` for non-error codes
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            RES_OVERFLOW => Some(Rejection::Overflow),
            RES_BADADDR => Some(Rejection::BadAddress),
            RES_INTERROR => Some(Rejection::InternalError),
            RES_BADARGS => Some(Rejection::BadArguments),
            RES_UNKNOWN => Some(Rejection::UnknownCommand),
            RES_XFTIMEOUT => Some(Rejection::ExternalFlashTimeout),
            RES_XFEPE => Some(Rejection::ExternalFlashPageError),
            RES_CHANGE_BAUD_FAIL => Some(Rejection::ChangeBaudFailed),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Rejection::Overflow => RES_OVERFLOW,
            Rejection::BadAddress => RES_BADADDR,
            Rejection::InternalError => RES_INTERROR,
            Rejection::BadArguments => RES_BADARGS,
            Rejection::UnknownCommand => RES_UNKNOWN,
            Rejection::ExternalFlashTimeout => RES_XFTIMEOUT,
            Rejection::ExternalFlashPageError => RES_XFEPE,
            Rejection::ChangeBaudFailed => RES_CHANGE_BAUD_FAIL,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Rejection::Overflow => "receive buffer overflow",
            Rejection::BadAddress => "bad address",
            Rejection::InternalError => "internal error",
            Rejection::BadArguments => "bad arguments",
            Rejection::UnknownCommand => "unknown command",
            Rejection::ExternalFlashTimeout => "external flash timeout",
            Rejection::ExternalFlashPageError => "external flash page error",
            Rejection::ChangeBaudFailed => "baud rate change failed",
        };
        write!(f, "{} (0x{:02X})", text, self.code())
    }
}

/// A request to the bootloader
///
/// `expects` is the response code that completes the request; any error
/// status code completes it too. `context` is an opaque tag that shows up in
/// logs so a response can be matched to the call that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub opcode: u8,
    pub payload: Vec<u8>,
    pub expects: u8,
    pub context: u64,
}

impl Command {
    pub fn new(opcode: u8, payload: impl Into<Vec<u8>>, expects: u8) -> Self {
        Self {
            opcode,
            payload: payload.into(),
            expects,
            context: 0,
        }
    }

    pub fn with_context(mut self, context: u64) -> Self {
        self.context = context;
        self
    }

    pub fn frame(&self) -> Frame {
        Frame::new(self.opcode, self.payload.clone())
    }

    /// Wire bytes for this command
    pub fn encode(&self) -> Result<Vec<u8>, FramingError> {
        framing::encode(&self.frame())
    }

    /// Payload length of the answer to a read, zero for other commands
    pub fn read_len(&self) -> usize {
        match (self.opcode, &self.payload[..]) {
            (CMD_READ_RANGE, [_, _, _, _, lo, hi]) => u16::from_le_bytes([*lo, *hi]) as usize,
            _ => 0,
        }
    }

    pub fn ping() -> Self {
        Self::new(CMD_PING, [], RES_PONG)
    }

    pub fn info() -> Self {
        Self::new(CMD_INFO, [], RES_INFO)
    }

    /// Clears the bootloader's receive state; it sends no answer
    ///
    /// The leading zero completes any escape a previous, interrupted command
    /// left open.
    pub fn sync() -> Self {
        Self::new(CMD_RESET, [0x00], RES_OK)
    }

    pub fn erase_page(address: u32) -> Self {
        Self::new(CMD_ERASE_PAGE, address.to_le_bytes(), RES_OK)
    }

    pub fn write_page(address: u32, data: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(4 + data.len());
        payload.extend_from_slice(&address.to_le_bytes());
        payload.extend_from_slice(data);
        Self::new(CMD_WRITE_PAGE, payload, RES_OK)
    }

    pub fn read_range(address: u32, len: u16) -> Self {
        let mut payload = address.to_le_bytes().to_vec();
        payload.extend_from_slice(&len.to_le_bytes());
        Self::new(CMD_READ_RANGE, payload, RES_READ_RANGE)
    }

    pub fn crc_internal_flash(address: u32, len: u32) -> Self {
        let mut payload = address.to_le_bytes().to_vec();
        payload.extend_from_slice(&len.to_le_bytes());
        Self::new(CMD_CRC_INTERNAL_FLASH, payload, RES_CRC_INTERNAL_FLASH)
    }

    pub fn get_attribute(index: u8) -> Self {
        Self::new(CMD_GET_ATTRIBUTE, [index], RES_GET_ATTRIBUTE)
    }

    pub fn set_attribute(index: u8, attribute: &Attribute) -> Self {
        let mut payload = vec![index];
        payload.extend_from_slice(&attribute.to_bytes());
        Self::new(CMD_SET_ATTRIBUTE, payload, RES_OK)
    }

    /// First stage of a baud rate change (mode byte 0x01)
    pub fn change_baud_rate(baud: u32) -> Self {
        let mut payload = vec![0x01];
        payload.extend_from_slice(&baud.to_le_bytes());
        Self::new(CMD_CHANGE_BAUD_RATE, payload, RES_OK)
    }

    /// Second stage of a baud rate change, sent at the new rate (mode 0x02)
    pub fn confirm_baud_rate(baud: u32) -> Self {
        let mut payload = vec![0x02];
        payload.extend_from_slice(&baud.to_le_bytes());
        Self::new(CMD_CHANGE_BAUD_RATE, payload, RES_OK)
    }

    pub fn set_start_address(address: u32) -> Self {
        Self::new(CMD_SET_START_ADDRESS, address.to_le_bytes(), RES_OK)
    }

    /// Leaves the bootloader; there is nobody left to answer
    pub fn exit() -> Self {
        Self::new(CMD_EXIT, [], RES_OK)
    }
}

/// Outcome reported by the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Rejected(Rejection),
}

/// A decoded answer from the bootloader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u8,
    pub status: Status,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn from_frame(frame: Frame) -> Self {
        let status = match Rejection::from_code(frame.opcode) {
            Some(rejection) => Status::Rejected(rejection),
            None => Status::Success,
        };
        Self {
            code: frame.opcode,
            status,
            payload: frame.payload,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Payload as a little-endian u32, for CRC style answers
    pub fn payload_u32(&self, opcode: u8) -> Result<u32, ProtocolError> {
        match self.payload[..] {
            [a, b, c, d, ..] => Ok(u32::from_le_bytes([a, b, c, d])),
            _ => Err(ProtocolError::MalformedResponse {
                opcode,
                reason: format!("expected 4 bytes, got {}", self.payload.len()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_codes_roundtrip() {
        for code in 0u8..=0xFF {
            if let Some(rejection) = Rejection::from_code(code) {
                assert_eq!(rejection.code(), code);
            }
        }
        assert_eq!(Rejection::from_code(RES_OK), None);
        assert_eq!(Rejection::from_code(RES_PONG), None);
    }

    #[test]
    fn test_command_payloads() {
        let cmd = Command::read_range(0x0003_0000, 0x200);
        assert_eq!(cmd.opcode, CMD_READ_RANGE);
        assert_eq!(cmd.payload, vec![0x00, 0x00, 0x03, 0x00, 0x00, 0x02]);
        assert_eq!(cmd.expects, RES_READ_RANGE);

        let cmd = Command::write_page(0x400, &[0xAA; 4]);
        assert_eq!(cmd.payload, vec![0x00, 0x04, 0, 0, 0xAA, 0xAA, 0xAA, 0xAA]);

        let cmd = Command::change_baud_rate(921_600);
        assert_eq!(cmd.payload[0], 0x01);
        assert_eq!(&cmd.payload[1..], &921_600u32.to_le_bytes());
    }

    #[test]
    fn test_command_encoding() {
        assert_eq!(Command::ping().encode(), Ok(vec![0xFC, 0x01]));
        assert_eq!(Command::sync().encode(), Ok(vec![0x00, 0xFC, 0x05]));
        assert_eq!(
            Command::erase_page(0x30000).encode(),
            Ok(vec![0x00, 0x00, 0x03, 0x00, 0xFC, 0x06])
        );
        assert_eq!(
            Command::get_attribute(2).encode(),
            Ok(vec![0x02, 0xFC, 0x14])
        );
        // 0xFC inside the address is doubled
        assert_eq!(
            Command::set_start_address(0x0000_FC00).encode(),
            Ok(vec![0x00, 0xFC, 0xFC, 0x00, 0x00, 0xFC, 0x23])
        );
    }

    #[test]
    fn test_read_len() {
        assert_eq!(Command::read_range(0x1000, 0x180).read_len(), 0x180);
        assert_eq!(Command::ping().read_len(), 0);
        assert_eq!(Command::crc_internal_flash(0, 0x180).read_len(), 0);
    }

    #[test]
    fn test_response_status() {
        let ok = Response::from_frame(Frame::new(RES_CRC_INTERNAL_FLASH, [1, 0, 0, 0]));
        assert!(ok.is_success());
        assert_eq!(ok.payload_u32(CMD_CRC_INTERNAL_FLASH), Ok(1));

        let bad = Response::from_frame(Frame::empty(RES_BADADDR));
        assert_eq!(bad.status, Status::Rejected(Rejection::BadAddress));
        assert!(bad.payload_u32(CMD_CRC_INTERNAL_FLASH).is_err());
    }
}
