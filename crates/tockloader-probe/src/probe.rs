//! Debug probe driver interface

use std::fmt;
use std::time::Duration;

use crate::error::ProbeError;

/// Memory access to a target through SWD/JTAG
pub trait DebugProbe {
    /// Fill `buf` from target memory starting at `address`
    fn read_memory(&mut self, address: u32, buf: &mut [u8]) -> Result<(), ProbeError>;

    /// Store `data` into target memory starting at `address`
    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), ProbeError>;

    /// Reset the core, leaving it halted if `halt` is set
    fn reset_core(&mut self, halt: bool) -> Result<(), ProbeError>;

    /// Let the target run free and release the probe
    fn detach(&mut self) -> Result<(), ProbeError> {
        Ok(())
    }
}

/// Probe drivers that can be attached from a configuration value
pub trait Attach: DebugProbe + Sized {
    type Config;

    fn attach(config: &Self::Config) -> Result<Self, ProbeError>;
}

/// Which debugger family sits behind a [`DebugProbe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    JLink,
    OpenOcd,
}

impl ProbeKind {
    /// Granularity of memory accesses, in bytes
    pub fn access_width(self) -> usize {
        match self {
            ProbeKind::JLink => 4,
            ProbeKind::OpenOcd => 1,
        }
    }

    /// Delay between mailbox polls
    pub fn poll_interval(self) -> Duration {
        match self {
            ProbeKind::JLink => Duration::from_millis(1),
            ProbeKind::OpenOcd => Duration::from_millis(10),
        }
    }

    /// Round `len` up to a whole number of accesses
    pub fn access_len(self, len: usize) -> usize {
        let width = self.access_width();
        len.div_ceil(width) * width
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::JLink => write!(f, "J-Link"),
            ProbeKind::OpenOcd => write!(f, "OpenOCD"),
        }
    }
}
