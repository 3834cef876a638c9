//! Error types for probe drivers

use thiserror::Error;
use tockloader_core::TransportError;

/// Errors reported by a [`DebugProbe`](crate::DebugProbe) driver
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no probe attached")]
    NotAttached,

    #[error("memory access of {len} bytes at 0x{address:08X} failed: {reason}")]
    Access {
        address: u32,
        len: usize,
        reason: String,
    },

    #[error("unaligned {len} byte access at 0x{address:08X}")]
    Unaligned { address: u32, len: usize },

    #[error("probe I/O error: {0}")]
    Io(String),
}

impl From<ProbeError> for TransportError {
    fn from(e: ProbeError) -> Self {
        TransportError::Io(e.to_string())
    }
}
