//! Tock bootloader command and response codes

use crc::{Crc, CRC_32_ISO_HDLC};

use super::attribute::ATTRIBUTE_LEN;

// Command opcodes
/// Liveness check, answered with [`RES_PONG`]
pub const CMD_PING: u8 = 0x01;
/// Query the bootloader info string
pub const CMD_INFO: u8 = 0x03;
/// Reset the bootloader's receive state
pub const CMD_RESET: u8 = 0x05;
/// Erase one flash page
pub const CMD_ERASE_PAGE: u8 = 0x06;
/// Write one flash page
pub const CMD_WRITE_PAGE: u8 = 0x07;
/// Read a range of internal flash
pub const CMD_READ_RANGE: u8 = 0x11;
/// Store a key/value attribute
pub const CMD_SET_ATTRIBUTE: u8 = 0x13;
/// Load a key/value attribute
pub const CMD_GET_ATTRIBUTE: u8 = 0x14;
/// CRC-32 of a range of internal flash
pub const CMD_CRC_INTERNAL_FLASH: u8 = 0x15;
/// Change the link baud rate
pub const CMD_CHANGE_BAUD_RATE: u8 = 0x21;
/// Leave the bootloader and jump to the kernel
pub const CMD_EXIT: u8 = 0x22;
/// Set the address the bootloader jumps to on exit
pub const CMD_SET_START_ADDRESS: u8 = 0x23;

// Response codes
/// Receive buffer overflowed
pub const RES_OVERFLOW: u8 = 0x10;
/// Answer to [`CMD_PING`]
pub const RES_PONG: u8 = 0x11;
/// Address out of range or misaligned
pub const RES_BADADDR: u8 = 0x12;
/// Internal bootloader failure
pub const RES_INTERROR: u8 = 0x13;
/// Malformed command arguments
pub const RES_BADARGS: u8 = 0x14;
/// Generic success
pub const RES_OK: u8 = 0x15;
/// Command not implemented by this bootloader
pub const RES_UNKNOWN: u8 = 0x16;
/// External flash timed out
pub const RES_XFTIMEOUT: u8 = 0x17;
/// External flash erase/page error
pub const RES_XFEPE: u8 = 0x18;
/// Answer to [`CMD_READ_RANGE`]
pub const RES_READ_RANGE: u8 = 0x20;
/// Answer to [`CMD_GET_ATTRIBUTE`]
pub const RES_GET_ATTRIBUTE: u8 = 0x22;
/// Answer to [`CMD_CRC_INTERNAL_FLASH`]
pub const RES_CRC_INTERNAL_FLASH: u8 = 0x23;
/// Answer to [`CMD_INFO`]
pub const RES_INFO: u8 = 0x25;
/// The requested baud rate could not be applied
pub const RES_CHANGE_BAUD_FAIL: u8 = 0x26;

/// Number of attribute slots the bootloader provides
pub const ATTRIBUTE_COUNT: u8 = 16;

/// Longest info string the bootloader returns
pub const INFO_MAX_LEN: usize = 192;

/// CRC used by [`CMD_CRC_INTERNAL_FLASH`]
pub const FLASH_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Payload length that follows a response header with `code`
///
/// `read_len` is the length a read command asked for. `None` means no
/// bootloader sends `code`.
pub fn response_len(code: u8, read_len: usize) -> Option<usize> {
    match code {
        RES_OVERFLOW | RES_PONG | RES_BADADDR | RES_INTERROR | RES_BADARGS | RES_OK
        | RES_UNKNOWN | RES_XFTIMEOUT | RES_XFEPE | RES_CHANGE_BAUD_FAIL => Some(0),
        RES_READ_RANGE => Some(read_len),
        RES_GET_ATTRIBUTE => Some(ATTRIBUTE_LEN),
        RES_CRC_INTERNAL_FLASH => Some(4),
        // Length byte, then the NUL padded string
        RES_INFO => Some(1 + INFO_MAX_LEN),
        _ => None,
    }
}
