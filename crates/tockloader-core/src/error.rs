//! Error types for tockloader-core
//!
//! Each layer has its own error enum; lower layers convert into higher ones
//! with `From` so `?` carries a failure up to the session that caused it.

use thiserror::Error;

use crate::flash::FlashRegion;
use crate::protocol::attribute::AttributeError;
use crate::protocol::Rejection;

/// Errors produced while encoding or decoding frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FramingError {
    /// The input ended in the middle of a frame
    #[error("frame truncated")]
    Truncated,

    /// A response header carried a code no bootloader sends
    #[error("unknown response code 0x{code:02X}")]
    UnknownResponse { code: u8 },

    /// Bytes were found that do not belong to any frame
    #[error("lost frame synchronization ({discarded} bytes discarded)")]
    Desynchronized { discarded: usize },

    /// The payload does not fit the bootloader's receive buffer
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    /// 0xFC is the sync marker and cannot be an opcode
    #[error("0xFC cannot be used as an opcode")]
    ReservedOpcode,
}

/// Errors produced by a transport while moving bytes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No data arrived before the deadline
    #[error("timed out waiting for the target")]
    Timeout,

    /// The underlying device failed
    #[error("I/O error: {0}")]
    Io(String),

    /// The transport was already closed
    #[error("transport is closed")]
    Closed,

    /// This kind of link cannot do what was asked
    #[error("not supported by this transport: {0}")]
    Unsupported(&'static str),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                TransportError::Timeout
            }
            _ => TransportError::Io(e.to_string()),
        }
    }
}

/// Errors produced while opening a transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The named device does not exist
    #[error("device not found: {0}")]
    NotFound(String),

    /// The device exists but could not be opened (busy, permissions, ...)
    #[error("failed to open {device}: {reason}")]
    Open { device: String, reason: String },

    /// The device was opened but no bootloader answered on it
    #[error("bootloader not detected: {0}")]
    BootloaderNotDetected(String),

    /// Invalid connection parameters
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors produced by the protocol engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Every attempt timed out or returned a corrupted frame
    #[error("target unresponsive after {attempts} attempt(s)")]
    Unresponsive { attempts: u32 },

    /// The target answered with an error status
    #[error("target rejected the command: {0}")]
    TargetRejected(Rejection),

    /// The target answered with the right code but an unusable payload
    #[error("malformed response to command 0x{opcode:02X}: {reason}")]
    MalformedResponse { opcode: u8, reason: String },

    /// The command could not be put on the wire
    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors produced while parsing a TBF header
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    /// The leading word cannot start a TBF header (erased flash or zeroes)
    #[error("not a TBF header (version word 0x{0:04X})")]
    BadMagic(u16),

    /// The header version is not one this codec understands
    #[error("unsupported TBF version {0}")]
    UnsupportedVersion(u16),

    /// The header checksum does not match its contents
    #[error("TBF header checksum mismatch: stored 0x{stored:08X}, computed 0x{computed:08X}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    /// The buffer is shorter than the header claims to be
    #[error("TBF header truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// A metadata entry extends past the end of the header
    #[error("TBF entry {tag} declares {length} bytes but only {remaining} remain")]
    TruncatedEntry {
        tag: u16,
        length: u16,
        remaining: usize,
    },

    /// A known entry has a length that does not match its layout
    #[error("TBF entry {tag} has invalid length {length}")]
    BadEntry { tag: u16, length: u16 },

    /// The package name is not valid UTF-8
    #[error("TBF package name is not valid UTF-8")]
    BadPackageName,

    /// Header size is below the base header or not a multiple of 4
    #[error("invalid TBF header size {0}")]
    BadHeaderSize(u16),

    /// The total size is smaller than the header itself
    #[error("TBF total size {total_size} is smaller than header size {header_size}")]
    BadTotalSize { header_size: u16, total_size: u32 },

    /// The header would not fit in the 16-bit header size field
    #[error("TBF header too large ({0} bytes)")]
    TooLarge(usize),

    /// An offset field plus the header size does not fit in 32 bits
    #[error("TBF {field} 0x{value:08X} overflows past the header")]
    OffsetOverflow { field: &'static str, value: u32 },
}

/// Errors produced when describing a flash region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegionError {
    /// Start or length is not a multiple of the page size
    #[error("region 0x{start:08X}+0x{len:X} is not aligned to {page_size}-byte pages")]
    Unaligned { start: u32, len: u32, page_size: u32 },

    /// Zero-length region
    #[error("region is empty")]
    Empty,

    /// Region would wrap the 32-bit address space
    #[error("region 0x{start:08X}+0x{len:X} overflows the address space")]
    Overflow { start: u32, len: u32 },

    /// Page size is zero or not a power of two
    #[error("invalid page size {0}")]
    InvalidPageSize(u32),
}

/// Errors produced by flash session operations other than install
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Region(#[from] RegionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Attribute(#[from] AttributeError),

    /// An app header claims to extend past the application region
    #[error("app at 0x{address:08X} (0x{total_size:X} bytes) runs past the application region")]
    CorruptAppList { address: u32, total_size: u32 },

    /// Attribute slot index out of range
    #[error("attribute index {0} out of range")]
    BadAttributeIndex(u8),
}

/// Errors produced while installing an image
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstallError {
    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Region(#[from] RegionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The header's total size disagrees with the image length
    #[error("image is {actual} bytes but its header declares {declared}")]
    ImageSizeMismatch { declared: u32, actual: usize },

    /// The image does not fit inside the application region
    #[error("{region} lies outside the application region {app_region}")]
    OutsideAppRegion {
        region: FlashRegion,
        app_region: FlashRegion,
    },

    /// A page write was requested outside any region erased in this session
    #[error("refusing to write 0x{len:X} bytes at 0x{address:08X}: not erased")]
    NotErased { address: u32, len: u32 },

    /// What was read back does not match what was written
    #[error("verification failed for {region}")]
    VerificationFailed { region: FlashRegion },
}
