//! Serial console terminal
//!
//! Shows whatever the board prints and forwards stdin to it, line by line,
//! until Ctrl-C.

use std::error::Error;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tockloader_core::board::BoardProfile;
use tockloader_core::{Transport, TransportError};

use crate::channels;

/// How long one port read may block before stdin is checked again
const POLL_INTERVAL: Duration = Duration::from_millis(50);

const READ_CHUNK: usize = 256;

/// Open the console on `channel` and run the terminal
pub fn run_listen(channel: &str, profile: &BoardProfile) -> Result<(), Box<dyn Error>> {
    let mut transport = channels::open_console(channel, profile)?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))?;
    }

    eprintln!("Listening on {} (Ctrl-C to quit)", channel);
    let input = spawn_stdin_reader();
    let result = pump(&mut transport, &input, &mut io::stdout(), &running);
    if let Err(e) = transport.close() {
        log::warn!("Failed to close channel: {}", e);
    }
    result
}

/// Read stdin on its own thread; a blocking read cannot be interrupted
fn spawn_stdin_reader() -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::debug!("stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Move bytes both ways until `running` is cleared
fn pump<T: Transport, W: Write>(
    transport: &mut T,
    input: &Receiver<Vec<u8>>,
    output: &mut W,
    running: &AtomicBool,
) -> Result<(), Box<dyn Error>> {
    let mut text = Utf8Stream::default();
    while running.load(Ordering::SeqCst) {
        while let Ok(bytes) = input.try_recv() {
            transport.write(&bytes)?;
        }

        match transport.read(READ_CHUNK, Instant::now() + POLL_INTERVAL) {
            Ok(bytes) => {
                output.write_all(text.push(&bytes).as_bytes())?;
                // Prompts do not end in a newline
                output.flush()?;
            }
            Err(TransportError::Timeout) => {}
            Err(e) => return Err(e.into()),
        }
    }
    output.write_all(text.finish().as_bytes())?;
    output.flush()?;
    Ok(())
}

/// Turns a byte stream into text, holding back split UTF-8 sequences
#[derive(Debug, Default)]
struct Utf8Stream {
    pending: Vec<u8>,
}

impl Utf8Stream {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        // Incomplete sequence at the end; wait for the rest
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Whatever is still held back, lossily
    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
