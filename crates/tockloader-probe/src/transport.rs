//! Mailbox transport over a debug probe

use std::collections::VecDeque;
use std::thread::sleep;
use std::time::{Duration, Instant};

use tockloader_core::transport::{remaining, Connect, Transport};
use tockloader_core::{ConnectError, TransportError};

use crate::error::ProbeError;
use crate::mailbox::{self, MailboxLayout, MAILBOX_MAGIC};
use crate::probe::{Attach, DebugProbe, ProbeKind};

/// How to reach the bootloader mailbox
#[derive(Debug, Clone)]
pub struct ProbeTarget<C> {
    /// Driver configuration handed to [`Attach::attach`]
    pub config: C,
    pub kind: ProbeKind,
    /// RAM address of the mailbox header
    pub mailbox_address: u32,
    /// Reset the core before looking for the mailbox
    pub reset_on_open: bool,
    /// How long to wait for the mailbox to appear and for requests to be taken
    pub ack_timeout: Duration,
}

impl<C> ProbeTarget<C> {
    pub fn new(kind: ProbeKind, mailbox_address: u32, config: C) -> Self {
        Self {
            config,
            kind,
            mailbox_address,
            reset_on_open: false,
            ack_timeout: Duration::from_secs(1),
        }
    }
}

fn read_word<P: DebugProbe>(probe: &mut P, address: u32) -> Result<u32, ProbeError> {
    let mut buf = [0u8; 4];
    probe.read_memory(address, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn write_word<P: DebugProbe>(probe: &mut P, address: u32, value: u32) -> Result<(), ProbeError> {
    probe.write_memory(address, &value.to_le_bytes())
}

fn read_block<P: DebugProbe>(
    probe: &mut P,
    kind: ProbeKind,
    address: u32,
    len: usize,
) -> Result<Vec<u8>, ProbeError> {
    let mut buf = vec![0u8; kind.access_len(len)];
    probe.read_memory(address, &mut buf)?;
    buf.truncate(len);
    Ok(buf)
}

fn write_block<P: DebugProbe>(
    probe: &mut P,
    kind: ProbeKind,
    address: u32,
    data: &[u8],
) -> Result<(), ProbeError> {
    let padded_len = kind.access_len(data.len());
    if padded_len == data.len() {
        return probe.write_memory(address, data);
    }
    let mut padded = data.to_vec();
    padded.resize(padded_len, 0);
    probe.write_memory(address, &padded)
}

/// Poll until the magic word shows up; returns the last value seen on timeout
fn wait_for_magic<P: DebugProbe>(
    probe: &mut P,
    kind: ProbeKind,
    base: u32,
    timeout: Duration,
) -> Result<Result<(), u32>, ProbeError> {
    let deadline = Instant::now() + timeout;
    loop {
        let magic = read_word(probe, base + mailbox::MAGIC)?;
        if magic == MAILBOX_MAGIC {
            return Ok(Ok(()));
        }
        if remaining(deadline).is_zero() {
            return Ok(Err(magic));
        }
        sleep(kind.poll_interval());
    }
}

/// Bootloader link through a RAM mailbox
pub struct ProbeTransport<P: DebugProbe> {
    probe: Option<P>,
    kind: ProbeKind,
    layout: MailboxLayout,
    ack_timeout: Duration,
    /// Last request sequence number posted
    req_seq: u32,
    /// Last response sequence number consumed
    rsp_seq: u32,
    pending: VecDeque<u8>,
}

impl<P: DebugProbe> ProbeTransport<P> {
    /// Locate the mailbox through an already attached probe
    pub fn with_probe<C>(mut probe: P, target: &ProbeTarget<C>) -> Result<Self, ConnectError> {
        let base = target.mailbox_address;
        if base % 4 != 0 {
            return Err(ConnectError::InvalidParameter(format!(
                "mailbox address 0x{:08X} is not word aligned",
                base
            )));
        }
        if target.reset_on_open {
            probe.reset_core(false).map_err(TransportError::from)?;
        }

        let found = wait_for_magic(&mut probe, target.kind, base, target.ack_timeout)
            .map_err(TransportError::from)?;
        if let Err(magic) = found {
            return Err(ConnectError::BootloaderNotDetected(format!(
                "no mailbox at 0x{:08X} (read 0x{:08X})",
                base, magic
            )));
        }

        let capacity = read_word(&mut probe, base + mailbox::CAPACITY)
            .map_err(TransportError::from)?;
        let layout = MailboxLayout::new(base, capacity).ok_or_else(|| {
            ConnectError::BootloaderNotDetected(format!(
                "mailbox at 0x{:08X} reports unusable capacity {}",
                base, capacity
            ))
        })?;

        let mut transport = Self {
            probe: Some(probe),
            kind: target.kind,
            layout,
            ack_timeout: target.ack_timeout,
            req_seq: 0,
            rsp_seq: 0,
            pending: VecDeque::new(),
        };
        transport.resync()?;

        log::info!(
            "Found bootloader mailbox at 0x{:08X} via {} ({} byte buffers)",
            base,
            target.kind,
            capacity
        );
        Ok(transport)
    }

    pub fn kind(&self) -> ProbeKind {
        self.kind
    }

    pub fn layout(&self) -> MailboxLayout {
        self.layout
    }

    /// The driver, unless the transport has been closed
    pub fn probe(&self) -> Option<&P> {
        self.probe.as_ref()
    }

    /// Adopt the target's sequence numbers and drop anything in flight
    fn resync(&mut self) -> Result<(), TransportError> {
        let layout = self.layout;
        let probe = self.probe.as_mut().ok_or(TransportError::Closed)?;
        self.req_seq = read_word(probe, layout.field(mailbox::REQ_SEQ))?;
        self.rsp_seq = read_word(probe, layout.field(mailbox::RSP_SEQ))?;
        write_word(probe, layout.field(mailbox::RSP_ACK), self.rsp_seq)?;
        self.pending.clear();
        Ok(())
    }

    /// Move the next response chunk into `pending`, polling until `deadline`
    fn poll_response(&mut self, deadline: Instant) -> Result<(), TransportError> {
        let kind = self.kind;
        let layout = self.layout;
        let probe = self.probe.as_mut().ok_or(TransportError::Closed)?;

        loop {
            let seq = read_word(probe, layout.field(mailbox::RSP_SEQ))?;
            if seq != self.rsp_seq {
                let len = read_word(probe, layout.field(mailbox::RSP_LEN))?;
                if len > layout.capacity() {
                    return Err(TransportError::Io(format!(
                        "mailbox response of {} bytes exceeds capacity {}",
                        len,
                        layout.capacity()
                    )));
                }
                let data = read_block(probe, kind, layout.response_buffer(), len as usize)?;
                self.rsp_seq = seq;
                write_word(probe, layout.field(mailbox::RSP_ACK), seq)?;
                log::trace!("mailbox rx seq {}: {:02X?}", seq, data);
                if !data.is_empty() {
                    self.pending.extend(data);
                    return Ok(());
                }
                continue;
            }

            let left = remaining(deadline);
            if left.is_zero() {
                return Err(TransportError::Timeout);
            }
            sleep(kind.poll_interval().min(left));
        }
    }
}

impl<P: DebugProbe> Transport for ProbeTransport<P> {
    fn read(&mut self, max: usize, deadline: Instant) -> Result<Vec<u8>, TransportError> {
        if self.pending.is_empty() {
            self.poll_response(deadline)?;
        }
        let n = max.min(self.pending.len());
        Ok(self.pending.drain(..n).collect())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let kind = self.kind;
        let layout = self.layout;
        let ack_timeout = self.ack_timeout;
        let probe = self.probe.as_mut().ok_or(TransportError::Closed)?;

        for chunk in data.chunks(layout.capacity() as usize) {
            // The target must have taken the previous chunk before the
            // request buffer is reused
            let deadline = Instant::now() + ack_timeout;
            while read_word(probe, layout.field(mailbox::REQ_ACK))? != self.req_seq {
                let left = remaining(deadline);
                if left.is_zero() {
                    log::debug!("mailbox request {} never acknowledged", self.req_seq);
                    return Err(TransportError::Timeout);
                }
                sleep(kind.poll_interval().min(left));
            }

            write_block(probe, kind, layout.request_buffer(), chunk)?;
            write_word(probe, layout.field(mailbox::REQ_LEN), chunk.len() as u32)?;
            let seq = self.req_seq.wrapping_add(1);
            write_word(probe, layout.field(mailbox::REQ_SEQ), seq)?;
            self.req_seq = seq;
            log::trace!("mailbox tx seq {}: {:02X?}", seq, chunk);
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        let kind = self.kind;
        let base = self.layout.base();
        let timeout = self.ack_timeout;
        let probe = self.probe.as_mut().ok_or(TransportError::Closed)?;

        probe.reset_core(false)?;
        if let Err(magic) = wait_for_magic(probe, kind, base, timeout)? {
            return Err(TransportError::Io(format!(
                "mailbox did not come back after reset (read 0x{:08X})",
                magic
            )));
        }
        self.resync()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut probe) = self.probe.take() {
            probe.detach()?;
            log::debug!("Detached {} probe", self.kind);
        }
        Ok(())
    }
}

impl<P: Attach> Connect for ProbeTransport<P> {
    type Descriptor = ProbeTarget<P::Config>;

    fn open(descriptor: &Self::Descriptor) -> Result<Self, ConnectError> {
        let probe = P::attach(&descriptor.config).map_err(|e| ConnectError::Open {
            device: descriptor.kind.to_string(),
            reason: e.to_string(),
        })?;
        Self::with_probe(probe, descriptor)
    }
}

impl<P: DebugProbe> Drop for ProbeTransport<P> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
