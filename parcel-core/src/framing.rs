//! Socket framing: cut one encoded package out of the raw byte stream, and write frames whole.
//!
//! A frame ends with the trailer marker at the end the package declares for itself. Reading
//! stops as soon as that trailer arrives; the marker value showing up inside a payload does not
//! end a frame because it does not sit at the declared end. Partial frames are kept across
//! calls that find no more pending content.

use std::io;

use crate::byte_array::ByteArray;
use crate::config::{FramingMode, ProtocolConfig};
use crate::protocol::PACKAGE_TRAILER;
use crate::transport::Transport;
use crate::wire::{self, TRAILER_LEN};

/// Result of one framed read.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Exactly one package's bytes, trailer included.
    Framed(ByteArray),
    /// Nothing (complete) to read right now.
    NoContent,
}

/// Framing failure. Disconnection is kept apart from other I/O errors.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("peer disconnected")]
    Disconnected,
    #[error("transport error: {0}")]
    Transport(io::Error),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

/// Error kinds meaning the peer is gone rather than a transient failure.
pub fn is_disconnect(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}

impl From<io::Error> for FramingError {
    fn from(e: io::Error) -> Self {
        if is_disconnect(e.kind()) {
            FramingError::Disconnected
        } else {
            FramingError::Transport(e)
        }
    }
}

/// Frames packages over a transport.
#[derive(Debug)]
pub struct Framer<T> {
    transport: T,
    pending: ByteArray,
    mode: FramingMode,
    read_buffer_size: usize,
    max_frame_len: usize,
    poll_timeout: std::time::Duration,
}

impl<T: Transport> Framer<T> {
    pub fn new(transport: T, config: &ProtocolConfig) -> Self {
        Self {
            transport,
            pending: ByteArray::default(),
            mode: config.framing,
            read_buffer_size: config.effective_read_buffer_size(),
            max_frame_len: config.max_frame_len,
            poll_timeout: config.poll_timeout(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Bytes received but not yet handed out as a frame.
    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Read until one complete frame is available or the transport has nothing more pending.
    /// Never waits beyond the configured poll timeout.
    pub fn read_framed(&mut self) -> Result<ReadOutcome, FramingError> {
        if let Some(frame) = self.take_frame()? {
            return Ok(ReadOutcome::Framed(frame));
        }
        let mut buf = vec![0u8; self.read_buffer_size];
        loop {
            if !self.transport.poll_readable(self.poll_timeout)? {
                if !self.pending.is_empty() {
                    tracing::trace!(buffered = self.pending.len(), "partial package pending");
                }
                return Ok(ReadOutcome::NoContent);
            }
            let n = match self.transport.read(&mut buf) {
                Ok(0) => {
                    tracing::debug!("zero-byte read on a ready transport");
                    self.pending.delete();
                    return Err(FramingError::Disconnected);
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::NoContent)
                }
                Err(e) => {
                    tracing::error!("error reading transport: {e}");
                    return Err(e.into());
                }
            };
            self.pending.append(&buf[..n]);
            tracing::trace!(read = n, buffered = self.pending.len(), "read from transport");

            if let Some(frame) = self.take_frame()? {
                if self.mode == FramingMode::Strict && !self.pending.is_empty() {
                    let extra = self.pending.len();
                    self.pending.delete();
                    return Err(self.violation(format!(
                        "{extra} byte(s) received after a package trailer"
                    )));
                }
                return Ok(ReadOutcome::Framed(frame));
            }
            if self.pending.len() > self.max_frame_len {
                self.pending.delete();
                return Err(self.violation(format!(
                    "no package trailer within {} bytes",
                    self.max_frame_len
                )));
            }
        }
    }

    /// Write every byte or fail. A transport that accepts nothing is an error.
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), FramingError> {
        let mut written = 0;
        while written < bytes.len() {
            match self.transport.write(&bytes[written..]) {
                Ok(0) => {
                    tracing::error!("transport accepted no bytes");
                    return Err(FramingError::Transport(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "transport accepted no bytes",
                    )));
                }
                Ok(n) => {
                    written += n;
                    tracing::trace!(written, total = bytes.len(), "wrote to transport");
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::error!("error writing transport: {e}");
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Release the transport.
    pub fn close(&mut self) -> Result<(), FramingError> {
        self.pending.delete();
        self.transport.close().map_err(FramingError::from)
    }

    fn violation(&self, what: String) -> FramingError {
        tracing::error!("protocol violation: {what}");
        FramingError::ProtocolViolation(what)
    }

    /// Hand out the first buffered frame if it is complete. Malformed framing resets the buffer.
    fn take_frame(&mut self) -> Result<Option<ByteArray>, FramingError> {
        match self.frame_end() {
            Ok(Some(end)) => Ok(Some(self.pending.drain_front(end))),
            Ok(None) => Ok(None),
            Err(what) => {
                self.pending.delete();
                Err(self.violation(what))
            }
        }
    }

    fn frame_end(&self) -> Result<Option<usize>, String> {
        let buf = self.pending.as_slice();
        let trailer = PACKAGE_TRAILER.to_le_bytes();
        match wire::frame_length(buf) {
            Ok(None) => Ok(None),
            Ok(Some(len)) if len > self.max_frame_len => Err(format!(
                "declared package length {len} exceeds limit {}",
                self.max_frame_len
            )),
            Ok(Some(len)) if buf.len() < len => Ok(None),
            Ok(Some(len)) => {
                if buf[len - TRAILER_LEN..len] == trailer {
                    Ok(Some(len))
                } else {
                    Err(format!("package trailer missing at offset {}", len - TRAILER_LEN))
                }
            }
            // Unknown type: the declared length is unknowable, so the first aligned trailer ends
            // it and the decoder rejects the package.
            Err(_) => Ok(buf
                .chunks_exact(TRAILER_LEN)
                .position(|word| *word == trailer)
                .map(|i| (i + 1) * TRAILER_LEN)),
        }
    }
}
