//! tockloader-dummy - In-memory emulated Tock bootloader
//!
//! [`DummyBootloader`] implements [`Transport`] by decoding the commands
//! written to it and answering them from an in-memory flash array, the way a
//! board running the Tock bootloader would. It records everything it receives so
//! tests can check ordering, and it can be told to misbehave (drop or corrupt
//! answers, prefix them with noise, ignore page writes).

use std::collections::VecDeque;
use std::time::Instant;

use tockloader_core::framing::{self, CommandDecoder, Frame, MAX_PAYLOAD_LEN, SYNC};
use tockloader_core::protocol::attribute::ATTRIBUTE_LEN;
use tockloader_core::protocol::codes::*;
use tockloader_core::transport::{Connect, Transport};
use tockloader_core::{ConnectError, TransportError};

/// Configuration for the emulated board
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Address of the first flash byte
    pub flash_base: u32,
    /// Flash size in bytes
    pub flash_size: usize,
    /// Erase/write granularity
    pub page_size: usize,
    /// Whether the CRC-of-flash command is implemented
    pub supports_crc: bool,
    /// Text returned by the info command
    pub info: String,
    /// Value of the "board" attribute in slot 0
    pub board: String,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            flash_base: 0,
            flash_size: 512 * 1024,
            page_size: 512,
            supports_crc: true,
            info: "{\"version\":\"1.1.0\",\"name\":\"Tock Bootloader\"}".to_string(),
            board: "dummy".to_string(),
        }
    }
}

/// Misbehaviour applied to the next command with a given opcode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Carry out the command but lose its answer
    DropResponse,
    /// Answer with a response code no bootloader sends
    CorruptResponse,
    /// Send these bytes before the answer
    GarbagePrefix(Vec<u8>),
    /// Acknowledge a page write without programming the page
    SkipWrite,
}

/// Emulated bootloader
pub struct DummyBootloader {
    config: DummyConfig,
    flash: Vec<u8>,
    attributes: Vec<[u8; ATTRIBUTE_LEN]>,
    decoder: CommandDecoder,
    output: VecDeque<u8>,
    faults: Vec<(u8, Fault)>,
    received: Vec<Frame>,
    writes: Vec<Vec<u8>>,
    start_address: Option<u32>,
    baud_rate: Option<u32>,
    pending_baud_rate: Option<u32>,
    host_baud_rate: Option<u32>,
    resets: usize,
    exited: bool,
    closed: bool,
}

impl DummyBootloader {
    /// Create an emulator with erased flash
    pub fn new(config: DummyConfig) -> Self {
        let flash = vec![0xFF; config.flash_size];
        let mut attributes = vec![[0xFF; ATTRIBUTE_LEN]; ATTRIBUTE_COUNT as usize];
        attributes[0] = encode_attribute("board", config.board.as_bytes());
        Self {
            config,
            flash,
            attributes,
            decoder: CommandDecoder::new(),
            output: VecDeque::new(),
            faults: Vec::new(),
            received: Vec::new(),
            writes: Vec::new(),
            start_address: None,
            baud_rate: None,
            pending_baud_rate: None,
            host_baud_rate: None,
            resets: 0,
            exited: false,
            closed: false,
        }
    }

    /// Create an emulator with the default configuration
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut [u8] {
        &mut self.flash
    }

    /// Every command frame decoded so far, in arrival order
    pub fn received(&self) -> &[Frame] {
        &self.received
    }

    /// Opcodes of every command received so far
    pub fn received_opcodes(&self) -> Vec<u8> {
        self.received.iter().map(|f| f.opcode).collect()
    }

    /// Raw buffers passed to `write`, one entry per call
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    pub fn start_address(&self) -> Option<u32> {
        self.start_address
    }

    pub fn baud_rate(&self) -> Option<u32> {
        self.baud_rate
    }

    pub fn resets(&self) -> usize {
        self.resets
    }

    pub fn exited(&self) -> bool {
        self.exited
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Apply `fault` to the next command with `opcode`
    ///
    /// Faults for the same opcode are used in the order they were injected.
    pub fn inject(&mut self, opcode: u8, fault: Fault) {
        self.faults.push((opcode, fault));
    }

    fn take_fault(&mut self, opcode: u8) -> Option<Fault> {
        let index = self.faults.iter().position(|(op, _)| *op == opcode)?;
        Some(self.faults.remove(index).1)
    }

    /// Offset into the flash array, if `address..address + len` is inside it
    fn offset(&self, address: u32, len: usize) -> Option<usize> {
        let offset = address.checked_sub(self.config.flash_base)? as usize;
        (offset + len <= self.flash.len()).then_some(offset)
    }

    fn page_offset(&self, address: u32) -> Option<usize> {
        if address as usize % self.config.page_size != 0 {
            return None;
        }
        self.offset(address, self.config.page_size)
    }

    fn process(&mut self, frame: Frame) {
        let fault = self.take_fault(frame.opcode);
        let response = if fault == Some(Fault::SkipWrite) {
            log::debug!("dummy: ignoring page write");
            Some(Frame::empty(RES_OK))
        } else {
            self.handle(&frame)
        };
        self.received.push(frame);

        let Some(response) = response else {
            return;
        };
        let wire = match framing::encode_response(&response) {
            Ok(wire) => wire,
            Err(e) => {
                log::debug!("dummy: cannot answer 0x{:02X}: {}", response.opcode, e);
                return;
            }
        };
        match fault {
            Some(Fault::DropResponse) => {
                log::debug!("dummy: dropping response 0x{:02X}", response.opcode)
            }
            Some(Fault::CorruptResponse) => self.output.extend(corrupt(wire)),
            Some(Fault::GarbagePrefix(garbage)) => {
                self.output.extend(garbage);
                self.output.extend(wire);
            }
            Some(Fault::SkipWrite) | None => self.output.extend(wire),
        }
    }

    fn handle(&mut self, frame: &Frame) -> Option<Frame> {
        let payload = &frame.payload[..];
        let response = match frame.opcode {
            CMD_PING => Frame::empty(RES_PONG),
            CMD_RESET => return None,
            CMD_EXIT => {
                self.exited = true;
                return None;
            }
            CMD_INFO => {
                let text = self.config.info.as_bytes();
                let len = text.len().min(INFO_MAX_LEN);
                let mut out = vec![len as u8];
                out.extend_from_slice(&text[..len]);
                out.resize(1 + INFO_MAX_LEN, 0);
                Frame::new(RES_INFO, out)
            }
            CMD_ERASE_PAGE => match payload {
                [a, b, c, d] => match self.page_offset(u32::from_le_bytes([*a, *b, *c, *d])) {
                    Some(offset) => {
                        self.flash[offset..offset + self.config.page_size].fill(0xFF);
                        Frame::empty(RES_OK)
                    }
                    None => Frame::empty(RES_BADADDR),
                },
                _ => Frame::empty(RES_BADARGS),
            },
            CMD_WRITE_PAGE => {
                if payload.len() != 4 + self.config.page_size {
                    return Some(Frame::empty(RES_BADARGS));
                }
                let address = le_u32(payload);
                match self.page_offset(address) {
                    Some(offset) => {
                        // Programming can only clear bits
                        for (cell, byte) in self.flash[offset..].iter_mut().zip(&payload[4..]) {
                            *cell &= byte;
                        }
                        Frame::empty(RES_OK)
                    }
                    None => Frame::empty(RES_BADADDR),
                }
            }
            CMD_READ_RANGE => {
                if payload.len() != 6 {
                    return Some(Frame::empty(RES_BADARGS));
                }
                let address = le_u32(payload);
                let len = u16::from_le_bytes([payload[4], payload[5]]) as usize;
                if len > MAX_PAYLOAD_LEN {
                    return Some(Frame::empty(RES_BADARGS));
                }
                match self.offset(address, len) {
                    Some(offset) => {
                        Frame::new(RES_READ_RANGE, self.flash[offset..offset + len].to_vec())
                    }
                    None => Frame::empty(RES_BADADDR),
                }
            }
            CMD_CRC_INTERNAL_FLASH => {
                if !self.config.supports_crc {
                    return Some(Frame::empty(RES_UNKNOWN));
                }
                if payload.len() != 8 {
                    return Some(Frame::empty(RES_BADARGS));
                }
                let address = le_u32(payload);
                let len = le_u32(&payload[4..]) as usize;
                match self.offset(address, len) {
                    Some(offset) => {
                        let crc = FLASH_CRC.checksum(&self.flash[offset..offset + len]);
                        Frame::new(RES_CRC_INTERNAL_FLASH, crc.to_le_bytes())
                    }
                    None => Frame::empty(RES_BADADDR),
                }
            }
            CMD_GET_ATTRIBUTE => match payload {
                [index] if *index < ATTRIBUTE_COUNT => Frame::new(
                    RES_GET_ATTRIBUTE,
                    self.attributes[*index as usize].to_vec(),
                ),
                _ => Frame::empty(RES_BADARGS),
            },
            CMD_SET_ATTRIBUTE => {
                if payload.len() != 1 + ATTRIBUTE_LEN || payload[0] >= ATTRIBUTE_COUNT {
                    return Some(Frame::empty(RES_BADARGS));
                }
                self.attributes[payload[0] as usize].copy_from_slice(&payload[1..]);
                Frame::empty(RES_OK)
            }
            CMD_SET_START_ADDRESS => match payload {
                [a, b, c, d] => {
                    self.start_address = Some(u32::from_le_bytes([*a, *b, *c, *d]));
                    Frame::empty(RES_OK)
                }
                _ => Frame::empty(RES_BADARGS),
            },
            CMD_CHANGE_BAUD_RATE => match payload {
                [0x01, a, b, c, d] => {
                    self.pending_baud_rate = Some(u32::from_le_bytes([*a, *b, *c, *d]));
                    Frame::empty(RES_OK)
                }
                // The confirmation only gets through if the host switched too
                [0x02, a, b, c, d] => {
                    let baud_rate = u32::from_le_bytes([*a, *b, *c, *d]);
                    if self.pending_baud_rate.take() == Some(baud_rate)
                        && self.host_baud_rate == Some(baud_rate)
                    {
                        self.baud_rate = Some(baud_rate);
                        Frame::empty(RES_OK)
                    } else {
                        Frame::empty(RES_CHANGE_BAUD_FAIL)
                    }
                }
                _ => Frame::empty(RES_BADARGS),
            },
            other => {
                log::debug!("dummy: unknown command 0x{:02X}", other);
                Frame::empty(RES_UNKNOWN)
            }
        };
        Some(response)
    }
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn encode_attribute(key: &str, value: &[u8]) -> [u8; ATTRIBUTE_LEN] {
    let mut raw = [0u8; ATTRIBUTE_LEN];
    let key = &key.as_bytes()[..key.len().min(8)];
    let value = &value[..value.len().min(ATTRIBUTE_LEN - 9)];
    raw[..key.len()].copy_from_slice(key);
    raw[8] = value.len() as u8;
    raw[9..9 + value.len()].copy_from_slice(value);
    raw
}

/// Response code that no bootloader sends
const BOGUS_RESPONSE: u8 = 0x00;

/// Replace the response code of an encoded answer
fn corrupt(mut wire: Vec<u8>) -> Vec<u8> {
    if let Some(code) = wire.get_mut(1) {
        *code = BOGUS_RESPONSE;
    }
    wire
}

impl Transport for DummyBootloader {
    fn read(&mut self, max: usize, _deadline: Instant) -> Result<Vec<u8>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.output.is_empty() {
            return Err(TransportError::Timeout);
        }
        let n = max.min(self.output.len());
        Ok(self.output.drain(..n).collect())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.writes.push(data.to_vec());
        for &byte in data {
            match self.decoder.feed(byte) {
                Some(Ok(frame)) => self.process(frame),
                Some(Err(e)) => {
                    log::debug!("dummy: {}", e);
                    self.output.extend([SYNC, RES_OVERFLOW]);
                }
                None => {}
            }
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.resets += 1;
        self.decoder.reset();
        self.output.clear();
        self.exited = false;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.host_baud_rate = Some(baud_rate);
        Ok(())
    }
}

impl Connect for DummyBootloader {
    type Descriptor = DummyConfig;

    fn open(descriptor: &DummyConfig) -> Result<Self, ConnectError> {
        if descriptor.page_size == 0 || descriptor.flash_size % descriptor.page_size != 0 {
            return Err(ConnectError::InvalidParameter(
                "flash size must be a multiple of the page size".into(),
            ));
        }
        Ok(Self::new(descriptor.clone()))
    }
}
