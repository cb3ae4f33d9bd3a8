//! TCP transport to a networked endpoint or serial bridge.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{debug, warn};

use super::transport::{ByteStream, LineTransport};
use crate::error::TransportError;

/// Connected TCP socket wrapped as a [`ByteStream`].
pub struct TcpByteStream {
    socket: TcpStream,
}

impl Read for TcpByteStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.read(buf)
    }
}

impl Write for TcpByteStream {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.socket.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.socket.flush()
    }
}

impl ByteStream for TcpByteStream {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.socket.set_read_timeout(Some(timeout))
    }

    fn discard_input(&mut self) -> io::Result<usize> {
        self.socket.set_nonblocking(true)?;
        let mut dropped = 0;
        let mut buf = [0u8; 256];
        let result = loop {
            match self.socket.read(&mut buf) {
                Ok(0) => break Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
                Ok(n) => dropped += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(dropped),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => break Err(e),
            }
        };
        self.socket.set_nonblocking(false)?;
        result
    }
}

pub type TcpTransport = LineTransport<TcpByteStream>;

/// Connect to `host:port` within `timeout`, trying each resolved address.
pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpTransport, TransportError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::Open(format!("{host}:{port}: {e}")))?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(socket) => {
                socket
                    .set_write_timeout(Some(timeout))
                    .map_err(TransportError::from)?;
                if let Err(e) = socket.set_nodelay(true) {
                    warn!("Tcp: TCP_NODELAY on {} failed: {}", addr, e);
                }
                debug!("Tcp: connected to {}", addr);
                return Ok(LineTransport::new(
                    TcpByteStream { socket },
                    format!("tcp {host}:{port}"),
                ));
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(TransportError::Open(match last_err {
        Some(e) => format!("{host}:{port}: {e}"),
        None => format!("{host}:{port}: no addresses"),
    }))
}
