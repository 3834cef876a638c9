//! Serial port transport

use std::io::{Read, Write};
use std::thread::sleep;
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tockloader_core::transport::{remaining, Connect, Transport};
use tockloader_core::{ConnectError, TransportError};

use crate::target::{EntryMethod, SerialTarget};

/// Shortest timeout handed to the OS; zero means "block forever" on some
/// platforms
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

fn port_error(e: serialport::Error) -> TransportError {
    match e.kind() {
        serialport::ErrorKind::Io(std::io::ErrorKind::TimedOut) => TransportError::Timeout,
        _ => TransportError::Io(e.to_string()),
    }
}

fn open_error(device: &str, e: serialport::Error) -> ConnectError {
    match e.kind() {
        serialport::ErrorKind::NoDevice
        | serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
            ConnectError::NotFound(device.to_string())
        }
        _ => ConnectError::Open {
            device: device.to_string(),
            reason: e.to_string(),
        },
    }
}

/// Serial link to a board running the Tock bootloader
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
    baud_rate: u32,
}

impl SerialTransport {
    /// Open the port and run the configured bootloader entry sequence
    pub fn open(target: &SerialTarget) -> Result<Self, ConnectError> {
        let port = serialport::new(&target.port, target.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(500))
            .open()
            .map_err(|e| open_error(&target.port, e))?;

        log::info!("Opened serial port {} at {} baud", target.port, target.baud_rate);

        let mut transport = Self {
            port: Some(port),
            name: target.port.clone(),
            baud_rate: target.baud_rate,
        };
        match target.entry {
            EntryMethod::None => {}
            EntryMethod::DtrRts => transport.toggle_bootloader_entry()?,
            EntryMethod::Touch1200 => transport.touch_1200()?,
        }
        Ok(transport)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }

    /// Reset the chip with DTR while RTS selects the bootloader
    fn toggle_bootloader_entry(&mut self) -> Result<(), TransportError> {
        log::debug!("Entering bootloader via DTR/RTS on {}", self.name);
        let port = self.port()?;
        port.write_data_terminal_ready(true).map_err(port_error)?;
        port.write_request_to_send(true).map_err(port_error)?;
        sleep(Duration::from_millis(100));
        port.write_data_terminal_ready(false).map_err(port_error)?;
        // Give the bootloader time to sample the select pin
        sleep(Duration::from_millis(500));
        port.write_request_to_send(false).map_err(port_error)?;
        Ok(())
    }

    /// Boards with native USB enter their bootloader when opened at 1200 baud
    fn touch_1200(&mut self) -> Result<(), TransportError> {
        log::debug!("Entering bootloader via 1200 baud touch on {}", self.name);
        let baud_rate = self.baud_rate;
        self.port()?.set_baud_rate(1200).map_err(port_error)?;
        sleep(Duration::from_millis(1000));
        self.port()?.set_baud_rate(baud_rate).map_err(port_error)?;
        sleep(Duration::from_millis(1000));
        Ok(())
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, max: usize, deadline: Instant) -> Result<Vec<u8>, TransportError> {
        let left = remaining(deadline);
        let port = self.port()?;

        if left.is_zero() && port.bytes_to_read().map_err(port_error)? == 0 {
            return Err(TransportError::Timeout);
        }
        port.set_timeout(left.max(MIN_READ_TIMEOUT))
            .map_err(port_error)?;

        let mut buf = vec![0u8; max.max(1)];
        match port.read(&mut buf) {
            Ok(0) => Err(TransportError::Timeout),
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let port = self.port()?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.toggle_bootloader_entry()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            log::debug!("Closed serial port {}", self.name);
        }
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError> {
        self.port()?.set_baud_rate(baud_rate).map_err(port_error)?;
        self.baud_rate = baud_rate;
        log::debug!("{} now at {} baud", self.name, baud_rate);
        Ok(())
    }

    fn discard_input(&mut self) -> Result<(), TransportError> {
        self.port()?
            .clear(ClearBuffer::Input)
            .map_err(port_error)
    }
}

impl Connect for SerialTransport {
    type Descriptor = SerialTarget;

    fn open(descriptor: &SerialTarget) -> Result<Self, ConnectError> {
        SerialTransport::open(descriptor)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
