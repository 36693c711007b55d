//! Serial port handling
//!
//! Provides low-level serial port access for drive communication and the
//! [`Transport`] abstraction the transceive engine is written against.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::time::{Duration, Instant};

use super::{LineErrorKind, ProtocolError};

/// Poll interval while waiting for receive data
const POLL_INTERVAL_MS: u64 = 2;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.product)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// List all available serial ports in deterministic order
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect();
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    ports
}

/// Condition reported by one transport wait cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialEvent {
    /// The wait timed out without activity
    None,
    /// A break was detected on the line
    Break,
    /// A line-status error occurred; query [`Transport::last_line_error`]
    LineError,
    /// Receive data is pending
    DataAvailable,
}

/// Byte-oriented, timeout-bounded channel to the drive
///
/// The engine assumes half-duplex request/response traffic and no message
/// framing from the transport; reads may return any number of pending bytes
/// including zero.
pub trait Transport: Send {
    /// Discard stale bytes in both directions
    fn purge(&mut self) -> Result<(), ProtocolError>;

    /// Write a full frame, returning the number of bytes accepted
    fn write(&mut self, frame: &[u8]) -> Result<usize, ProtocolError>;

    /// Read whatever bytes are pending, up to `buf.len()`, waiting at most
    /// `timeout`; zero is not an error
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ProtocolError>;

    /// Wait for line activity, bounded by `timeout`
    fn wait_event(&mut self, timeout: Duration) -> Result<SerialEvent, ProtocolError>;

    /// The line error behind the most recent [`SerialEvent::LineError`]
    fn last_line_error(&self) -> LineErrorKind;
}

/// [`Transport`] backed by a real serial port
///
/// Uses non-blocking reads with `bytes_to_read()` polling for reliable
/// timeout behavior; the OS read timeout stays short so the engine's own
/// deadlines govern.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    last_error: LineErrorKind,
}

impl SerialTransport {
    /// Open and configure a port for drive communication (8N1, no flow
    /// control)
    pub fn open(name: &str, baud_rate: u32) -> Result<Self, ProtocolError> {
        let port = serialport::new(name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| match e.kind {
                serialport::ErrorKind::NoDevice => ProtocolError::PortNotFound(name.to_string()),
                _ => ProtocolError::SerialError(e.to_string()),
            })?;

        tracing::debug!(port = name, baud_rate, "serial port opened");
        Ok(Self {
            port,
            last_error: LineErrorKind::Unknown(0),
        })
    }
}

impl Transport for SerialTransport {
    fn purge(&mut self) -> Result<(), ProtocolError> {
        self.port
            .clear(serialport::ClearBuffer::All)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))
    }

    fn write(&mut self, frame: &[u8]) -> Result<usize, ProtocolError> {
        self.port.write_all(frame).map_err(|e| {
            self.last_error = LineErrorKind::Io;
            ProtocolError::SerialError(e.to_string())
        })?;
        self.port
            .flush()
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
        Ok(frame.len())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, ProtocolError> {
        let available = self
            .port
            .bytes_to_read()
            .map_err(|e| ProtocolError::SerialError(e.to_string()))? as usize;

        let to_read = available.min(buf.len());
        if to_read == 0 {
            return Ok(0);
        }

        match self.port.read(&mut buf[..to_read]) {
            Ok(n) => Ok(n),
            Err(ref e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(0)
            }
            Err(e) => {
                self.last_error = LineErrorKind::Io;
                Err(ProtocolError::SerialError(e.to_string()))
            }
        }
    }

    fn wait_event(&mut self, timeout: Duration) -> Result<SerialEvent, ProtocolError> {
        let start = Instant::now();
        loop {
            let available = self
                .port
                .bytes_to_read()
                .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
            if available > 0 {
                return Ok(SerialEvent::DataAvailable);
            }
            if start.elapsed() > timeout {
                return Ok(SerialEvent::None);
            }
            std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
        }
    }

    fn last_line_error(&self) -> LineErrorKind {
        self.last_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // Just ensure enumeration does not panic and ordering is stable
        let ports = list_ports();
        for pair in ports.windows(2) {
            assert!(pair[0].name <= pair[1].name);
        }
    }
}
