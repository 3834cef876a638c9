//! Request/response engine with timeouts and retries
//!
//! The engine owns a transport and runs exactly one request at a time:
//! drain stale input, send the command, then decode incoming bytes until the
//! expected answer, an error status, or the deadline. Timeouts and answers
//! with an unknown response code restart the whole cycle; an error status
//! from the target does not.

use std::time::{Duration, Instant};

use super::command::{Command, Rejection, Response, Status};
use crate::error::{FramingError, ProtocolError, TransportError};
use crate::framing::ResponseDecoder;
use crate::transport::Transport;

/// Bytes requested from the transport per read
const READ_CHUNK: usize = 512;

/// Lifecycle of the request currently in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Sent,
    AwaitingResponse,
    Resolved,
    TimedOut,
}

/// Counters kept across the engine's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub commands: u64,
    pub attempts: u64,
    pub retries: u64,
    pub corrupt_frames: u64,
    pub unrelated_frames: u64,
}

enum Attempt {
    Resolved(Response),
    Corrupted,
    TimedOut,
}

pub struct ProtocolEngine<T: Transport> {
    transport: T,
    decoder: ResponseDecoder,
    next_context: u64,
    state: Option<RequestState>,
    stats: EngineStats,
}

impl<T: Transport> ProtocolEngine<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            decoder: ResponseDecoder::new(),
            next_context: 1,
            state: None,
            stats: EngineStats::default(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// State of the most recent request, `None` before the first one
    pub fn request_state(&self) -> Option<RequestState> {
        self.state
    }

    /// Hand out a fresh context tag for a command
    pub fn next_context(&mut self) -> u64 {
        let context = self.next_context;
        self.next_context = self.next_context.wrapping_add(1);
        context
    }

    /// Send a command that the target never answers (sync, exit)
    pub fn post(&mut self, command: &Command) -> Result<(), ProtocolError> {
        let wire = command.encode()?;
        log::trace!(
            "post 0x{:02X} ({} bytes, context {})",
            command.opcode,
            wire.len(),
            command.context
        );
        self.transport.write(&wire)?;
        Ok(())
    }

    /// Run one command to completion
    ///
    /// Makes at most `max_retries + 1` attempts, each bounded by `timeout`,
    /// so the call never blocks much longer than `(max_retries + 1) * timeout`.
    pub fn execute(
        &mut self,
        command: &Command,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Response, ProtocolError> {
        let wire = command.encode()?;
        let attempts = max_retries.saturating_add(1);
        self.stats.commands += 1;

        for attempt in 1..=attempts {
            if attempt > 1 {
                self.stats.retries += 1;
                log::warn!(
                    "Retrying command 0x{:02X} (context {}), attempt {}/{}",
                    command.opcode,
                    command.context,
                    attempt,
                    attempts
                );
            }
            self.stats.attempts += 1;

            self.transport.discard_input()?;
            self.decoder.reset();
            self.decoder.set_read_len(command.read_len());

            match self.transport.write(&wire) {
                Ok(()) => {}
                Err(TransportError::Timeout) => {
                    self.state = Some(RequestState::TimedOut);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            self.state = Some(RequestState::Sent);
            log::trace!(
                "sent 0x{:02X} ({} payload bytes, context {})",
                command.opcode,
                command.payload.len(),
                command.context
            );

            let deadline = Instant::now() + timeout;
            self.state = Some(RequestState::AwaitingResponse);
            match self.await_response(command, deadline)? {
                Attempt::Resolved(response) => {
                    self.state = Some(RequestState::Resolved);
                    return match response.status {
                        Status::Success => Ok(response),
                        Status::Rejected(reason) => {
                            log::debug!(
                                "command 0x{:02X} (context {}) rejected: {}",
                                command.opcode,
                                command.context,
                                reason
                            );
                            Err(ProtocolError::TargetRejected(reason))
                        }
                    };
                }
                Attempt::Corrupted => {
                    self.stats.corrupt_frames += 1;
                }
                Attempt::TimedOut => {
                    self.state = Some(RequestState::TimedOut);
                    log::debug!(
                        "command 0x{:02X} (context {}) timed out after {:?}",
                        command.opcode,
                        command.context,
                        timeout
                    );
                }
            }
        }

        Err(ProtocolError::Unresponsive { attempts })
    }

    fn await_response(
        &mut self,
        command: &Command,
        deadline: Instant,
    ) -> Result<Attempt, ProtocolError> {
        loop {
            if Instant::now() >= deadline {
                return Ok(Attempt::TimedOut);
            }

            let bytes = match self.transport.read(READ_CHUNK, deadline) {
                Ok(bytes) => bytes,
                Err(TransportError::Timeout) => {
                    if !self.decoder.is_idle() {
                        log::debug!("{} at deadline", FramingError::Truncated);
                    }
                    return Ok(Attempt::TimedOut);
                }
                Err(e) => return Err(e.into()),
            };

            for byte in bytes {
                match self.decoder.feed(byte) {
                    None => {}
                    Some(Ok(frame))
                        if frame.opcode == command.expects
                            || Rejection::from_code(frame.opcode).is_some() =>
                    {
                        log::trace!(
                            "received 0x{:02X} ({} payload bytes, context {})",
                            frame.opcode,
                            frame.payload.len(),
                            command.context
                        );
                        return Ok(Attempt::Resolved(Response::from_frame(frame)));
                    }
                    Some(Ok(frame)) => {
                        self.stats.unrelated_frames += 1;
                        log::debug!(
                            "ignoring unexpected response 0x{:02X} while waiting for 0x{:02X}",
                            frame.opcode,
                            command.expects
                        );
                    }
                    Some(Err(e @ FramingError::UnknownResponse { .. })) => {
                        log::debug!("{}", e);
                        return Ok(Attempt::Corrupted);
                    }
                    Some(Err(e)) => log::debug!("{}", e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{self, encode_response, Frame};
    use crate::protocol::codes::*;
    use crate::transport::remaining;
    use std::collections::VecDeque;

    enum Reply {
        Frame(Frame),
        Raw(Vec<u8>),
        Silence,
    }

    #[derive(Default)]
    struct Scripted {
        replies: VecDeque<Reply>,
        input: VecDeque<u8>,
        writes: Vec<Vec<u8>>,
        /// Sleep until the deadline when there is nothing to read
        block: bool,
        closed: bool,
    }

    impl Scripted {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: replies.into(),
                ..Default::default()
            }
        }
    }

    impl Transport for Scripted {
        fn read(&mut self, max: usize, deadline: Instant) -> Result<Vec<u8>, TransportError> {
            if self.closed {
                return Err(TransportError::Closed);
            }
            if self.input.is_empty() {
                if self.block {
                    std::thread::sleep(remaining(deadline));
                }
                return Err(TransportError::Timeout);
            }
            let n = max.min(self.input.len());
            Ok(self.input.drain(..n).collect())
        }

        fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
            if self.closed {
                return Err(TransportError::Closed);
            }
            self.writes.push(data.to_vec());
            match self.replies.pop_front() {
                Some(Reply::Frame(frame)) => self.input.extend(encode_response(&frame).unwrap()),
                Some(Reply::Raw(bytes)) => self.input.extend(bytes),
                Some(Reply::Silence) | None => {}
            }
            Ok(())
        }

        fn reset(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), TransportError> {
            self.closed = true;
            Ok(())
        }
    }

    const TIMEOUT: Duration = Duration::from_millis(20);

    #[test]
    fn test_execute_success() {
        let transport = Scripted::new(vec![Reply::Frame(Frame::empty(RES_PONG))]);
        let mut engine = ProtocolEngine::new(transport);
        let response = engine.execute(&Command::ping(), TIMEOUT, 3).unwrap();
        assert_eq!(response.code, RES_PONG);
        assert_eq!(engine.request_state(), Some(RequestState::Resolved));
        assert_eq!(engine.stats().attempts, 1);
        assert_eq!(engine.transport().writes, vec![vec![0xFC, CMD_PING]]);
    }

    #[test]
    fn test_unresponsive_within_cumulative_deadline() {
        let mut transport = Scripted::new(vec![]);
        transport.block = true;
        let mut engine = ProtocolEngine::new(transport);

        let start = Instant::now();
        let result = engine.execute(&Command::ping(), TIMEOUT, 2);
        let elapsed = start.elapsed();

        assert_eq!(result, Err(ProtocolError::Unresponsive { attempts: 3 }));
        assert_eq!(engine.transport().writes.len(), 3);
        assert_eq!(engine.request_state(), Some(RequestState::TimedOut));
        assert!(elapsed >= TIMEOUT * 3);
        assert!(elapsed < TIMEOUT * 3 + Duration::from_millis(500));
    }

    #[test]
    fn test_zero_retries_is_single_attempt() {
        let mut engine = ProtocolEngine::new(Scripted::new(vec![]));
        assert_eq!(
            engine.execute(&Command::ping(), TIMEOUT, 0),
            Err(ProtocolError::Unresponsive { attempts: 1 })
        );
        assert_eq!(engine.transport().writes.len(), 1);
    }

    #[test]
    fn test_corrupted_response_is_retried() {
        let mut corrupted = encode_response(&Frame::new(RES_READ_RANGE, [1, 2, 3, 4])).unwrap();
        corrupted[1] = 0x00;
        let transport = Scripted::new(vec![
            Reply::Raw(corrupted),
            Reply::Frame(Frame::new(RES_READ_RANGE, [1, 2, 3, 4])),
        ]);
        let mut engine = ProtocolEngine::new(transport);

        let response = engine
            .execute(&Command::read_range(0, 4), TIMEOUT, 3)
            .unwrap();
        assert_eq!(response.payload, vec![1, 2, 3, 4]);
        assert_eq!(engine.stats().retries, 1);
        assert_eq!(engine.stats().corrupt_frames, 1);
        assert_eq!(engine.transport().writes.len(), 2);
    }

    #[test]
    fn test_timeout_then_success() {
        let transport = Scripted::new(vec![
            Reply::Silence,
            Reply::Frame(Frame::empty(RES_OK)),
        ]);
        let mut engine = ProtocolEngine::new(transport);
        assert!(engine.execute(&Command::erase_page(0x400), TIMEOUT, 1).is_ok());
        assert_eq!(engine.stats().retries, 1);
    }

    #[test]
    fn test_rejection_is_not_retried() {
        let transport = Scripted::new(vec![
            Reply::Frame(Frame::empty(RES_BADADDR)),
            Reply::Frame(Frame::empty(RES_OK)),
        ]);
        let mut engine = ProtocolEngine::new(transport);
        assert_eq!(
            engine.execute(&Command::erase_page(0x1234), TIMEOUT, 3),
            Err(ProtocolError::TargetRejected(Rejection::BadAddress))
        );
        assert_eq!(engine.transport().writes.len(), 1);
    }

    #[test]
    fn test_unrelated_frames_are_skipped() {
        let mut raw = encode_response(&Frame::empty(RES_PONG)).unwrap();
        raw.extend([0x00, 0x01, 0x02]);
        raw.extend(encode_response(&Frame::new(RES_READ_RANGE, [0xFC, 0xFC])).unwrap());
        let mut engine = ProtocolEngine::new(Scripted::new(vec![Reply::Raw(raw)]));

        let response = engine
            .execute(&Command::read_range(0, 2), TIMEOUT, 0)
            .unwrap();
        assert_eq!(response.payload, vec![0xFC, 0xFC]);
        assert_eq!(engine.stats().unrelated_frames, 1);
    }

    #[test]
    fn test_stale_input_is_drained() {
        let mut transport = Scripted::new(vec![Reply::Frame(Frame::empty(RES_OK))]);
        transport.input.extend(encode_response(&Frame::empty(RES_BADADDR)).unwrap());
        let mut engine = ProtocolEngine::new(transport);
        assert!(engine.execute(&Command::erase_page(0), TIMEOUT, 0).is_ok());
    }

    #[test]
    fn test_transport_failure_is_not_retried() {
        let mut engine = ProtocolEngine::new(Scripted::new(vec![]));
        engine.transport_mut().close().unwrap();
        assert_eq!(
            engine.execute(&Command::ping(), TIMEOUT, 5),
            Err(ProtocolError::Transport(TransportError::Closed))
        );
        assert_eq!(engine.stats().attempts, 1);
    }

    #[test]
    fn test_post_does_not_wait() {
        let mut engine = ProtocolEngine::new(Scripted::new(vec![]));
        engine.post(&Command::exit()).unwrap();
        assert_eq!(engine.transport().writes.len(), 1);
        assert_eq!(engine.request_state(), None);
    }

    #[test]
    fn test_oversized_command_is_not_sent() {
        let mut engine = ProtocolEngine::new(Scripted::new(vec![]));
        let command = Command::write_page(0, &vec![0; framing::MAX_PAYLOAD_LEN]);
        assert!(matches!(
            engine.execute(&command, TIMEOUT, 3),
            Err(ProtocolError::Framing(FramingError::PayloadTooLarge { .. }))
        ));
        assert!(engine.transport().writes.is_empty());
        assert_eq!(engine.stats().attempts, 0);
    }

    #[test]
    fn test_contexts_are_unique() {
        let mut engine = ProtocolEngine::new(Scripted::new(vec![]));
        let a = engine.next_context();
        let b = engine.next_context();
        assert_ne!(a, b);
    }
}
