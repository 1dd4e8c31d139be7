//! Transport seam: an ordered byte stream with a readiness poll, plus the TCP implementation.
//!
//! Bluetooth RFCOMM sockets behave the same way from the protocol's point of view; hosts that
//! have one implement [`Transport`] for it.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Connection handle used by the framing layer.
pub trait Transport {
    /// True when a read would not block: content is pending, or the peer closed the stream.
    /// A zero timeout only peeks.
    fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    /// Release the connection. Closing twice is not an error.
    fn close(&mut self) -> io::Result<()>;
}

/// TCP stream as a transport.
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    peer: SocketAddr,
}

impl TcpTransport {
    /// Open a connection to `addr`.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        Self::from_stream(TcpStream::connect(addr)?)
    }

    pub fn connect_timeout(addr: &SocketAddr, timeout: Duration) -> io::Result<Self> {
        Self::from_stream(TcpStream::connect_timeout(addr, timeout)?)
    }

    /// Wrap an accepted stream. The stream is switched to blocking mode.
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok(Self {
            stream: Some(stream),
            peer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport closed"))
    }
}

impl Transport for TcpTransport {
    fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let stream = self.stream()?;
        let mut probe = [0u8; 1];
        let peeked = if timeout.is_zero() {
            stream.set_nonblocking(true)?;
            let r = stream.peek(&mut probe);
            stream.set_nonblocking(false)?;
            r
        } else {
            stream.set_read_timeout(Some(timeout))?;
            let r = stream.peek(&mut probe);
            stream.set_read_timeout(None)?;
            r
        };
        match peeked {
            // Zero bytes peeked means end of stream: readable, and the read reports it.
            Ok(_) => Ok(true),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let stream = self.stream()?;
        let n = stream.write(buf)?;
        stream.flush()?;
        Ok(n)
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(stream) = self.stream.take() {
            tracing::debug!(peer = %self.peer, "closing connection");
            match stream.shutdown(Shutdown::Both) {
                Err(e) if e.kind() != io::ErrorKind::NotConnected => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }
}
