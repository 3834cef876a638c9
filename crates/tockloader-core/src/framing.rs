//! Byte-level framing for the bootloader link
//!
//! The two directions are framed differently. A command ends with a two
//! byte trailer, and a response starts with a two byte header:
//!
//! ```text
//! command:   escape(payload...)  0xFC  opcode
//! response:  0xFC  code  escape(payload...)
//! ```
//!
//! `escape` doubles every `0xFC` byte, so an unpaired `0xFC` always marks a
//! trailer or header. Neither direction carries a length or a checksum: the
//! length of a response payload is fixed by its code (see
//! [`response_len`](crate::protocol::codes::response_len)), except for reads,
//! whose length is the one the host asked for. Integrity is limited to what
//! the framing itself can show: a missing sync marker, a response code no
//! bootloader sends, or a response cut short by the next header.

use crate::error::FramingError;
use crate::protocol::codes::response_len;

/// Marker byte that starts a response header and a command trailer
pub const SYNC: u8 = 0xFC;

/// Largest payload a frame may carry
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024;

/// A decoded message: an opcode (or response code) plus its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    /// A frame with no payload
    pub fn empty(opcode: u8) -> Self {
        Self::new(opcode, Vec::new())
    }
}

fn push_escaped(out: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        out.push(b);
        if b == SYNC {
            out.push(SYNC);
        }
    }
}

fn check_frame(frame: &Frame) -> Result<(), FramingError> {
    if frame.opcode == SYNC {
        return Err(FramingError::ReservedOpcode);
    }
    if frame.payload.len() > MAX_PAYLOAD_LEN {
        return Err(FramingError::PayloadTooLarge {
            len: frame.payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    Ok(())
}

/// Encode a command into its wire representation
pub fn encode(frame: &Frame) -> Result<Vec<u8>, FramingError> {
    check_frame(frame)?;
    let mut out = Vec::with_capacity(frame.payload.len() + frame.payload.len() / 8 + 2);
    push_escaped(&mut out, &frame.payload);
    out.push(SYNC);
    out.push(frame.opcode);
    Ok(out)
}

/// Encode a response the way the bootloader sends it
pub fn encode_response(frame: &Frame) -> Result<Vec<u8>, FramingError> {
    check_frame(frame)?;
    let mut out = Vec::with_capacity(frame.payload.len() + frame.payload.len() / 8 + 2);
    out.push(SYNC);
    out.push(frame.opcode);
    push_escaped(&mut out, &frame.payload);
    Ok(out)
}

/// Decode exactly one response from the start of `wire`
///
/// `read_len` is the payload length of a read answer, as requested by the
/// command. The buffer must begin with the sync marker; bytes after the
/// first complete response are ignored.
pub fn decode(wire: &[u8], read_len: usize) -> Result<Frame, FramingError> {
    match wire.first() {
        None => return Err(FramingError::Truncated),
        Some(&first) if first != SYNC => {
            let discarded = wire.iter().position(|&b| b == SYNC).unwrap_or(wire.len());
            return Err(FramingError::Desynchronized { discarded });
        }
        Some(_) => {}
    }

    let mut decoder = ResponseDecoder::new();
    decoder.set_read_len(read_len);
    for &byte in wire {
        if let Some(result) = decoder.feed(byte) {
            return result;
        }
    }
    if decoder.is_idle() && decoder.discarded() > 0 {
        return Err(FramingError::Desynchronized {
            discarded: decoder.discarded(),
        });
    }
    Err(FramingError::Truncated)
}

/// Decode one command from a buffer that ends with its trailer
pub fn decode_command(wire: &[u8]) -> Result<Frame, FramingError> {
    let mut decoder = CommandDecoder::new();
    for (index, &byte) in wire.iter().enumerate() {
        if let Some(result) = decoder.feed(byte) {
            let trailing = wire.len() - index - 1;
            if trailing > 0 {
                return Err(FramingError::Desynchronized {
                    discarded: trailing,
                });
            }
            return result;
        }
    }
    Err(FramingError::Truncated)
}

/// States of the streaming response decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Discarding bytes until a sync marker is seen
    WaitingForSync,
    /// Sync marker seen, the next byte is the response code
    ReadingCode,
    /// Collecting the payload the response code calls for
    ReadingPayload,
    /// A response (or an error) was just produced
    Complete,
}

/// Incremental response decoder, fed one byte at a time
///
/// After producing a response or an error the decoder goes back to waiting
/// for the next sync marker, so one bad response never poisons the ones
/// after it.
#[derive(Debug, Clone)]
pub struct ResponseDecoder {
    state: DecoderState,
    /// Previous payload byte was an unpaired sync marker
    escape: bool,
    code: u8,
    expected_len: usize,
    read_len: usize,
    payload: Vec<u8>,
    /// Wire bytes consumed by the response in progress
    frame_bytes: usize,
    discarded: usize,
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::WaitingForSync,
            escape: false,
            code: 0,
            expected_len: 0,
            read_len: 0,
            payload: Vec::new(),
            frame_bytes: 0,
            discarded: 0,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Set the payload length expected from read answers
    pub fn set_read_len(&mut self, len: usize) {
        self.read_len = len.min(MAX_PAYLOAD_LEN);
    }

    /// Total number of bytes thrown away while resynchronizing
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// True when no partial response is buffered
    pub fn is_idle(&self) -> bool {
        matches!(
            self.state,
            DecoderState::WaitingForSync | DecoderState::Complete
        )
    }

    /// Drop any partial response and forget the discard counter
    ///
    /// The read length survives a reset.
    pub fn reset(&mut self) {
        let read_len = self.read_len;
        *self = Self::new();
        self.read_len = read_len;
    }

    /// Feed one byte from the wire
    ///
    /// Returns `Some` when a response completes or when framing is lost. A
    /// `Desynchronized` error is informational: the decoder has already
    /// started on the response that interrupted the previous one.
    pub fn feed(&mut self, byte: u8) -> Option<Result<Frame, FramingError>> {
        match self.state {
            DecoderState::WaitingForSync | DecoderState::Complete => {
                self.state = DecoderState::WaitingForSync;
                if byte == SYNC {
                    self.state = DecoderState::ReadingCode;
                } else {
                    self.discarded += 1;
                }
                None
            }
            DecoderState::ReadingCode => {
                if byte == SYNC {
                    // Escaped literal outside any response
                    self.discarded += 2;
                    self.state = DecoderState::WaitingForSync;
                    return None;
                }
                self.begin(byte)
            }
            DecoderState::ReadingPayload => {
                if self.escape {
                    self.escape = false;
                    if byte == SYNC {
                        self.frame_bytes += 2;
                        return self.accept(SYNC);
                    }
                    return self.interrupted(byte);
                }
                if byte == SYNC {
                    self.escape = true;
                    return None;
                }
                self.frame_bytes += 1;
                self.accept(byte)
            }
        }
    }

    fn begin(&mut self, code: u8) -> Option<Result<Frame, FramingError>> {
        self.code = code;
        self.payload.clear();
        self.escape = false;
        self.frame_bytes = 2;

        let Some(len) = response_len(code, self.read_len) else {
            self.discarded += 2;
            self.frame_bytes = 0;
            self.state = DecoderState::Complete;
            return Some(Err(FramingError::UnknownResponse { code }));
        };
        self.expected_len = len;
        if len == 0 {
            return Some(Ok(self.finish()));
        }
        self.payload.reserve(len);
        self.state = DecoderState::ReadingPayload;
        None
    }

    /// A new header arrived before the payload was complete
    fn interrupted(&mut self, code: u8) -> Option<Result<Frame, FramingError>> {
        let lost = self.frame_bytes;
        self.discarded += lost;
        log::trace!("response cut short by a new header after {} bytes", lost);
        match self.begin(code) {
            // Complete answers win over reporting the lost bytes
            Some(result) => Some(result),
            None => Some(Err(FramingError::Desynchronized { discarded: lost })),
        }
    }

    fn accept(&mut self, byte: u8) -> Option<Result<Frame, FramingError>> {
        self.payload.push(byte);
        if self.payload.len() == self.expected_len {
            return Some(Ok(self.finish()));
        }
        None
    }

    fn finish(&mut self) -> Frame {
        self.state = DecoderState::Complete;
        self.frame_bytes = 0;
        Frame {
            opcode: self.code,
            payload: std::mem::take(&mut self.payload),
        }
    }
}

/// Incremental command decoder, the bootloader's side of the link
///
/// Payload bytes are collected until the `0xFC opcode` trailer. A command
/// whose payload outgrows [`MAX_PAYLOAD_LEN`] is still consumed up to its
/// trailer and then reported as too large.
#[derive(Debug, Clone, Default)]
pub struct CommandDecoder {
    escape: bool,
    payload: Vec<u8>,
    overflow: usize,
}

impl CommandDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn feed(&mut self, byte: u8) -> Option<Result<Frame, FramingError>> {
        if self.escape {
            self.escape = false;
            if byte != SYNC {
                let payload = std::mem::take(&mut self.payload);
                let overflow = std::mem::take(&mut self.overflow);
                if overflow > 0 {
                    return Some(Err(FramingError::PayloadTooLarge {
                        len: payload.len() + overflow,
                        max: MAX_PAYLOAD_LEN,
                    }));
                }
                return Some(Ok(Frame {
                    opcode: byte,
                    payload,
                }));
            }
        } else if byte == SYNC {
            self.escape = true;
            return None;
        }

        if self.payload.len() < MAX_PAYLOAD_LEN {
            self.payload.push(byte);
        } else {
            self.overflow += 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codes::*;

    fn feed_all(
        decoder: &mut ResponseDecoder,
        bytes: &[u8],
    ) -> Vec<Result<Frame, FramingError>> {
        bytes.iter().filter_map(|&b| decoder.feed(b)).collect()
    }

    #[test]
    fn test_command_wire_layout() {
        assert_eq!(encode(&Frame::empty(CMD_PING)), Ok(vec![0xFC, 0x01]));
        assert_eq!(
            encode(&Frame::new(CMD_ERASE_PAGE, 0x0003_0000u32.to_le_bytes())),
            Ok(vec![0x00, 0x00, 0x03, 0x00, 0xFC, 0x06])
        );
        assert_eq!(
            encode(&Frame::new(CMD_GET_ATTRIBUTE, [0x03])),
            Ok(vec![0x03, 0xFC, 0x14])
        );
        assert_eq!(
            encode(&Frame::new(CMD_WRITE_PAGE, [0xFC, 0x01])),
            Ok(vec![0xFC, 0xFC, 0x01, 0xFC, 0x07])
        );
    }

    #[test]
    fn test_response_wire_layout() {
        assert_eq!(decode(&[0xFC, 0x11], 0), Ok(Frame::empty(RES_PONG)));
        assert_eq!(
            decode(&[0xFC, 0x23, 0x78, 0x56, 0x34, 0x12], 0),
            Ok(Frame::new(RES_CRC_INTERNAL_FLASH, [0x78, 0x56, 0x34, 0x12]))
        );
        assert_eq!(
            encode_response(&Frame::new(RES_READ_RANGE, [0xFC, 0x00])),
            Ok(vec![0xFC, 0x20, 0xFC, 0xFC, 0x00])
        );
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let frame = Frame::new(CMD_WRITE_PAGE, vec![0; MAX_PAYLOAD_LEN + 1]);
        assert_eq!(
            encode(&frame),
            Err(FramingError::PayloadTooLarge {
                len: MAX_PAYLOAD_LEN + 1,
                max: MAX_PAYLOAD_LEN
            })
        );
        assert!(encode(&Frame::new(CMD_WRITE_PAGE, vec![0; MAX_PAYLOAD_LEN])).is_ok());
        assert_eq!(encode(&Frame::empty(SYNC)), Err(FramingError::ReservedOpcode));
    }

    #[test]
    fn test_roundtrip_with_sync_bytes_in_payload() {
        let payloads: [&[u8]; 5] = [
            &[],
            &[0xFC],
            &[0xFC, 0xFC, 0xFC],
            &[0x01, 0xFC, 0x00, 0xFC, 0xFF],
            &[0xFC; 300],
        ];
        for payload in payloads {
            let command = Frame::new(CMD_WRITE_PAGE, payload);
            assert_eq!(decode_command(&encode(&command).unwrap()), Ok(command));

            let response = Frame::new(RES_READ_RANGE, payload);
            let wire = encode_response(&response).unwrap();
            assert_eq!(decode(&wire, payload.len()), Ok(response));
        }
    }

    #[test]
    fn test_fixed_length_responses() {
        let attribute = Frame::new(RES_GET_ATTRIBUTE, vec![0xFC; 64]);
        let wire = encode_response(&attribute).unwrap();
        assert_eq!(wire.len(), 2 + 128);
        assert_eq!(decode(&wire, 0), Ok(attribute));

        let info = Frame::new(RES_INFO, vec![0x20; 1 + INFO_MAX_LEN]);
        assert_eq!(decode(&encode_response(&info).unwrap(), 0), Ok(info));

        // Extra bytes after a fixed length answer are not part of it
        assert_eq!(decode(&[0xFC, 0x15, 0xAA], 0), Ok(Frame::empty(RES_OK)));
    }

    #[test]
    fn test_truncated_response() {
        let wire = encode_response(&Frame::new(RES_CRC_INTERNAL_FLASH, [1, 2, 3, 4])).unwrap();
        for cut in 0..wire.len() {
            assert_eq!(decode(&wire[..cut], 0), Err(FramingError::Truncated));
        }
        // Unpaired marker at the very end
        assert_eq!(decode(&[0xFC, 0x20, 0x01, 0xFC], 2), Err(FramingError::Truncated));
    }

    #[test]
    fn test_single_byte_corruption_errors() {
        let payload = [0x01, 0x02, 0x03, 0x04];
        let wire = encode_response(&Frame::new(RES_CRC_INTERNAL_FLASH, payload)).unwrap();

        for value in 0..=0xFFu8 {
            // Sync marker
            if value != SYNC {
                let mut corrupted = wire.clone();
                corrupted[0] = value;
                assert_eq!(
                    decode(&corrupted, 0),
                    Err(FramingError::Desynchronized {
                        discarded: wire.len()
                    }),
                    "sync byte 0x{:02X}",
                    value
                );
            }

            // Response code
            let mut corrupted = wire.clone();
            corrupted[1] = value;
            let expected = if value == SYNC {
                Err(FramingError::Desynchronized {
                    discarded: wire.len(),
                })
            } else {
                match response_len(value, 0) {
                    None => Err(FramingError::UnknownResponse { code: value }),
                    Some(len) if len <= payload.len() => {
                        Ok(Frame::new(value, &payload[..len]))
                    }
                    Some(_) => Err(FramingError::Truncated),
                }
            };
            assert_eq!(decode(&corrupted, 0), expected, "code byte 0x{:02X}", value);

            // Payload: only an unpaired marker is visible at this layer
            for index in 2..wire.len() {
                let mut corrupted = wire.clone();
                corrupted[index] = value;
                let expected = if value != SYNC {
                    Ok(Frame::new(RES_CRC_INTERNAL_FLASH, &corrupted[2..]))
                } else if index == wire.len() - 1 {
                    Err(FramingError::Truncated)
                } else {
                    let next = corrupted[index + 1];
                    match response_len(next, 0) {
                        None => Err(FramingError::UnknownResponse { code: next }),
                        Some(0) => Ok(Frame::empty(next)),
                        Some(_) => Err(FramingError::Desynchronized { discarded: index }),
                    }
                };
                assert_eq!(
                    decode(&corrupted, 0),
                    expected,
                    "payload byte {} = 0x{:02X}",
                    index,
                    value
                );
            }
        }
    }

    #[test]
    fn test_unknown_response_code() {
        assert_eq!(
            decode(&[0xFC, 0x00, 0x01], 0),
            Err(FramingError::UnknownResponse { code: 0x00 })
        );
        let mut decoder = ResponseDecoder::new();
        let results = feed_all(&mut decoder, &[0xFC, 0x42, 0x01, 0x02, 0xFC, 0x11]);
        assert_eq!(
            results,
            vec![
                Err(FramingError::UnknownResponse { code: 0x42 }),
                Ok(Frame::empty(RES_PONG)),
            ]
        );
        assert_eq!(decoder.discarded(), 4);
    }

    #[test]
    fn test_leading_garbage_is_desynchronized() {
        let wire = [0x00, 0x42, 0xFC, 0x11];
        assert_eq!(
            decode(&wire, 0),
            Err(FramingError::Desynchronized { discarded: 2 })
        );
    }

    #[test]
    fn test_stream_skips_garbage_and_counts_it() {
        let mut decoder = ResponseDecoder::new();
        let mut wire = vec![0x13, 0x37, SYNC, SYNC, 0x00];
        wire.extend(encode_response(&Frame::new(RES_CRC_INTERNAL_FLASH, [9, 8, 7, 6])).unwrap());
        let results = feed_all(&mut decoder, &wire);
        assert_eq!(
            results,
            vec![Ok(Frame::new(RES_CRC_INTERNAL_FLASH, [9, 8, 7, 6]))]
        );
        assert_eq!(decoder.discarded(), 5);
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_stream_interrupted_response() {
        let partial = [SYNC, RES_CRC_INTERNAL_FLASH, 1, 2];

        let mut decoder = ResponseDecoder::new();
        let mut wire = partial.to_vec();
        wire.extend([SYNC, RES_CRC_INTERNAL_FLASH, 5, 6, 7, 8]);
        assert_eq!(
            feed_all(&mut decoder, &wire),
            vec![
                Err(FramingError::Desynchronized { discarded: 4 }),
                Ok(Frame::new(RES_CRC_INTERNAL_FLASH, [5, 6, 7, 8])),
            ]
        );

        // A complete empty answer is reported instead of the lost bytes
        let mut decoder = ResponseDecoder::new();
        let mut wire = partial.to_vec();
        wire.extend([SYNC, RES_PONG]);
        assert_eq!(feed_all(&mut decoder, &wire), vec![Ok(Frame::empty(RES_PONG))]);
        assert_eq!(decoder.discarded(), 4);
    }

    #[test]
    fn test_read_length_follows_request() {
        let mut decoder = ResponseDecoder::new();
        decoder.set_read_len(3);
        decoder.reset();
        let results = feed_all(&mut decoder, &[SYNC, RES_READ_RANGE, 1, SYNC, SYNC, 3, 4]);
        assert_eq!(results, vec![Ok(Frame::new(RES_READ_RANGE, [1, SYNC, 3]))]);

        decoder.set_read_len(usize::MAX);
        let results = feed_all(&mut decoder, &[SYNC, RES_READ_RANGE]);
        assert!(results.is_empty());
        assert_eq!(decoder.state(), DecoderState::ReadingPayload);
    }

    #[test]
    fn test_states_progress() {
        let mut decoder = ResponseDecoder::new();
        assert_eq!(decoder.state(), DecoderState::WaitingForSync);
        decoder.feed(SYNC);
        assert_eq!(decoder.state(), DecoderState::ReadingCode);
        decoder.feed(RES_CRC_INTERNAL_FLASH);
        assert_eq!(decoder.state(), DecoderState::ReadingPayload);
        decoder.feed(1);
        decoder.feed(2);
        decoder.feed(3);
        assert!(decoder.feed(4).is_some());
        assert_eq!(decoder.state(), DecoderState::Complete);
        assert!(decoder.feed(SYNC).is_none());
        assert_eq!(decoder.feed(RES_OK), Some(Ok(Frame::empty(RES_OK))));
    }

    #[test]
    fn test_command_decoder() {
        // Sync message: a lone zero ends any half-sent escape
        assert_eq!(
            decode_command(&[0x00, 0xFC, 0x05]),
            Ok(Frame::new(CMD_RESET, [0x00]))
        );
        assert_eq!(
            decode_command(&[0xFC, 0x01, 0x00]),
            Err(FramingError::Desynchronized { discarded: 1 })
        );
        assert_eq!(decode_command(&[0x01, 0x02, 0xFC]), Err(FramingError::Truncated));

        let mut decoder = CommandDecoder::new();
        let mut results = Vec::new();
        for &byte in vec![0u8; MAX_PAYLOAD_LEN + 2].iter().chain(&[0xFC, 0x07, 0xFC, 0x01]) {
            results.extend(decoder.feed(byte));
        }
        assert_eq!(
            results,
            vec![
                Err(FramingError::PayloadTooLarge {
                    len: MAX_PAYLOAD_LEN + 2,
                    max: MAX_PAYLOAD_LEN
                }),
                Ok(Frame::empty(CMD_PING)),
            ]
        );
    }
}
