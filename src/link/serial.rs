//! Serial-line transport (`serialport` crate).

use std::io::{self, Read, Write};
use std::time::Duration;

use log::debug;
use serialport::{ClearBuffer, SerialPort};

use super::transport::{ByteStream, LineTransport};
use crate::error::TransportError;

/// Serial port wrapped as a [`ByteStream`].
pub struct SerialStream {
    port: Box<dyn SerialPort>,
}

impl Read for SerialStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialStream {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.port.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl ByteStream for SerialStream {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::from)
    }

    fn discard_input(&mut self) -> io::Result<usize> {
        let pending = self.port.bytes_to_read().map_err(io::Error::from)? as usize;
        if pending > 0 {
            self.port
                .clear(ClearBuffer::Input)
                .map_err(io::Error::from)?;
        }
        Ok(pending)
    }
}

pub type SerialTransport = LineTransport<SerialStream>;

/// Open `path` at `baud` with a bounded read timeout.
pub fn open(path: &str, baud: u32, timeout: Duration) -> Result<SerialTransport, TransportError> {
    let port = serialport::new(path, baud)
        .timeout(timeout)
        .open()
        .map_err(|e| TransportError::Open(format!("{path}: {e}")))?;
    debug!("Serial: opened {} at {} baud", path, baud);
    Ok(LineTransport::new(SerialStream { port }, format!("serial {path}")).with_serial_path(path))
}

/// Device paths of every serial port the OS reports.
pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            debug!("Serial: port enumeration failed: {}", e);
            Vec::new()
        }
    }
}
