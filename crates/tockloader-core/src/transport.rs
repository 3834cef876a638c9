//! Transport abstraction
//!
//! A transport moves raw bytes between the host and the bootloader. It knows
//! nothing about frames; the [`ProtocolEngine`](crate::protocol::ProtocolEngine)
//! layers framing and retries on top.
//!
//! Variants live in their own crates:
//!
//! - `tockloader-serial`: UART link to the bootloader
//! - `tockloader-probe`: RAM mailbox through a J-Link or OpenOCD debug probe
//! - `tockloader-dummy`: in-memory emulated bootloader

use std::time::{Duration, Instant};

use crate::error::{ConnectError, TransportError};

/// Upper bound on bytes thrown away by [`Transport::discard_input`]
const DISCARD_LIMIT: usize = 64 * 1024;

/// Byte pipe to a bootloader
pub trait Transport {
    /// Read up to `max` bytes, blocking no later than `deadline`
    ///
    /// Returns at least one byte, or [`TransportError::Timeout`] if nothing
    /// arrived in time.
    fn read(&mut self, max: usize, deadline: Instant) -> Result<Vec<u8>, TransportError>;

    /// Write all of `data`
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Reset the target (and re-enter the bootloader where the variant can)
    fn reset(&mut self) -> Result<(), TransportError>;

    /// Release the underlying device
    ///
    /// Calling this more than once is harmless; later I/O fails with
    /// [`TransportError::Closed`].
    fn close(&mut self) -> Result<(), TransportError>;

    /// Change the host side line speed
    fn set_baud_rate(&mut self, _baud_rate: u32) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("baud rate change"))
    }

    /// Throw away any input that is already buffered
    fn discard_input(&mut self) -> Result<(), TransportError> {
        let mut dropped = 0;
        while dropped < DISCARD_LIMIT {
            match self.read(DISCARD_LIMIT - dropped, Instant::now()) {
                Ok(bytes) if bytes.is_empty() => break,
                Ok(bytes) => dropped += bytes.len(),
                Err(TransportError::Timeout) => break,
                Err(e) => return Err(e),
            }
        }
        if dropped > 0 {
            log::debug!("discarded {} stale input bytes", dropped);
        }
        Ok(())
    }
}

/// Transports that can be opened from a descriptor
pub trait Connect: Transport + Sized {
    /// What identifies the device (port name and options, probe selection, ...)
    type Descriptor;

    fn open(descriptor: &Self::Descriptor) -> Result<Self, ConnectError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read(&mut self, max: usize, deadline: Instant) -> Result<Vec<u8>, TransportError> {
        (**self).read(max, deadline)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).write(data)
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        (**self).reset()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError> {
        (**self).set_baud_rate(baud_rate)
    }

    fn discard_input(&mut self) -> Result<(), TransportError> {
        (**self).discard_input()
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn read(&mut self, max: usize, deadline: Instant) -> Result<Vec<u8>, TransportError> {
        (**self).read(max, deadline)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).write(data)
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        (**self).reset()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError> {
        (**self).set_baud_rate(baud_rate)
    }

    fn discard_input(&mut self) -> Result<(), TransportError> {
        (**self).discard_input()
    }
}

/// Time left until `deadline`, zero if it has passed
pub fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
