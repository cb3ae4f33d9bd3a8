//! Transport abstraction: a line-oriented channel to one endpoint.
//!
//! Concrete implementations:
//! - serial line ([`SerialTransport`](super::serial::SerialTransport))
//! - TCP socket ([`TcpTransport`](super::tcp::TcpTransport))
//!
//! Both wrap a [`ByteStream`] in a [`LineTransport`], so the session and
//! supervisor logic never see the difference.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use log::debug;

use crate::codec::{encode_line, LineDecoder};
use crate::error::TransportError;

/// Line-oriented channel to one endpoint.
pub trait Transport: Send {
    /// Write one command line (a trailing `\n` is added when missing).
    fn write_line(&mut self, line: &str) -> Result<(), TransportError>;

    /// Read one line, waiting at most `timeout`.
    ///
    /// `Ok(None)` means the timeout elapsed; `Err` means the stream is
    /// unusable.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError>;

    /// Discard everything already received without blocking.
    /// Returns the number of bytes dropped.
    fn discard_pending(&mut self) -> Result<usize, TransportError>;

    /// Human-readable description, e.g. `tcp 10.0.0.5:8888`.
    fn label(&self) -> String;

    /// Local serial device path, if this transport owns one.
    fn serial_path(&self) -> Option<&str> {
        None
    }
}

/// Raw byte stream underneath a [`LineTransport`].
pub trait ByteStream: Read + Write + Send {
    /// Bound the next blocking read.
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Throw away input the OS has already buffered, without blocking.
    fn discard_input(&mut self) -> io::Result<usize>;
}

/// Line framing over any [`ByteStream`].
pub struct LineTransport<S: ByteStream> {
    stream: S,
    decoder: LineDecoder,
    label: String,
    serial_path: Option<String>,
}

impl<S: ByteStream> LineTransport<S> {
    pub fn new(stream: S, label: impl Into<String>) -> Self {
        Self {
            stream,
            decoder: LineDecoder::new(),
            label: label.into(),
            serial_path: None,
        }
    }

    pub fn with_serial_path(mut self, path: impl Into<String>) -> Self {
        self.serial_path = Some(path.into());
        self
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }
}

impl<S: ByteStream> Transport for LineTransport<S> {
    fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.stream.write_all(encode_line(line).as_bytes())?;
        self.stream.flush()?;
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 128];
        loop {
            if let Some(bytes) = self.decoder.next_line() {
                return Ok(Some(String::from_utf8(bytes).unwrap_or_else(|_| {
                    debug!("{}: dropping non-UTF-8 reply", self.label);
                    String::new()
                })));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            // Zero is not a valid socket timeout.
            self.stream
                .set_read_timeout(remaining.max(Duration::from_millis(1)))?;
            match self.stream.read(&mut buf) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => self.decoder.feed(&buf[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn discard_pending(&mut self) -> Result<usize, TransportError> {
        let buffered = self.decoder.reset();
        let os = self.stream.discard_input()?;
        Ok(buffered + os)
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn serial_path(&self) -> Option<&str> {
        self.serial_path.as_deref()
    }
}
