//! In-memory doubles for protocol tests: a scripted transport that can play the peer,
//! a recording delay and a file system with controllable metadata.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fs::FileSystem;
use crate::protocol::Package;
use crate::retry::{Delay, DelayError};
use crate::transport::Transport;
use crate::wire::{decode_package, encode_package, frame_length};

/// One scripted read result.
#[derive(Debug)]
pub(crate) enum Inbound {
    Bytes(Vec<u8>),
    Error(io::ErrorKind),
    Eof,
}

type Responder = Box<dyn FnMut(&Package) -> Vec<Package>>;

/// Transport fed from a queue. Written bytes are recorded and decoded; a responder can answer
/// each decoded package, which is how tests play the remote peer.
pub(crate) struct ScriptedTransport {
    inbound: VecDeque<Inbound>,
    pub written: Vec<u8>,
    pub write_calls: usize,
    /// Packages decoded from `written`, in order.
    pub sent: Vec<Package>,
    /// Cap on bytes accepted per write call.
    pub max_write_chunk: Option<usize>,
    pub closed: bool,
    write_failures: VecDeque<io::ErrorKind>,
    unparsed: Vec<u8>,
    responder: Option<Responder>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            inbound: VecDeque::new(),
            written: Vec::new(),
            write_calls: 0,
            sent: Vec::new(),
            max_write_chunk: None,
            closed: false,
            write_failures: VecDeque::new(),
            unparsed: Vec::new(),
            responder: None,
        }
    }

    /// A peer that confirms every package needing confirmation.
    pub fn confirming_peer() -> Self {
        Self::new().respond_with(|p| {
            if p.requires_confirmation() {
                vec![Package::confirmation(p.id)]
            } else {
                Vec::new()
            }
        })
    }

    pub fn respond_with(mut self, f: impl FnMut(&Package) -> Vec<Package> + 'static) -> Self {
        self.responder = Some(Box::new(f));
        self
    }

    pub fn push_bytes(&mut self, bytes: Vec<u8>) {
        self.inbound.push_back(Inbound::Bytes(bytes));
    }

    pub fn push_package(&mut self, p: &Package) {
        self.push_bytes(encode_package(p).unwrap().into_vec());
    }

    pub fn push_error(&mut self, kind: io::ErrorKind) {
        self.inbound.push_back(Inbound::Error(kind));
    }

    pub fn push_eof(&mut self) {
        self.inbound.push_back(Inbound::Eof);
    }

    /// Fail the next `n` write calls with `kind`.
    pub fn fail_writes(&mut self, n: usize, kind: io::ErrorKind) {
        self.write_failures.extend(std::iter::repeat(kind).take(n));
    }

    pub fn sent_of_type(&self, t: crate::protocol::PackageType) -> Vec<&Package> {
        self.sent.iter().filter(|p| p.package_type() == t).collect()
    }

    fn parse_written(&mut self) {
        while let Ok(Some(len)) = frame_length(&self.unparsed) {
            if self.unparsed.len() < len {
                break;
            }
            let rest = self.unparsed.split_off(len);
            let frame = std::mem::replace(&mut self.unparsed, rest);
            let package = decode_package(&frame).unwrap();
            if let Some(responder) = self.responder.as_mut() {
                for reply in responder(&package) {
                    self.inbound
                        .push_back(Inbound::Bytes(encode_package(&reply).unwrap().into_vec()));
                }
            }
            self.sent.push(package);
        }
    }
}

impl Transport for ScriptedTransport {
    fn poll_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
        Ok(!self.inbound.is_empty())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inbound.pop_front() {
            None => Err(io::ErrorKind::WouldBlock.into()),
            Some(Inbound::Eof) => Ok(0),
            Some(Inbound::Error(kind)) => Err(kind.into()),
            Some(Inbound::Bytes(mut bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    self.inbound.push_front(Inbound::Bytes(bytes.split_off(n)));
                }
                Ok(n)
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_calls += 1;
        if let Some(kind) = self.write_failures.pop_front() {
            return Err(kind.into());
        }
        let n = self.max_write_chunk.map_or(buf.len(), |max| max.min(buf.len()));
        self.written.extend_from_slice(&buf[..n]);
        self.unparsed.extend_from_slice(&buf[..n]);
        self.parse_written();
        Ok(n)
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Records requested delays without sleeping; optionally fails after a number of delays.
#[derive(Debug, Default)]
pub(crate) struct RecordingDelay {
    pub delays: Vec<Duration>,
    fail_after: Option<usize>,
}

impl RecordingDelay {
    pub fn failing_after(n: usize) -> Self {
        Self {
            delays: Vec::new(),
            fail_after: Some(n),
        }
    }
}

impl Delay for RecordingDelay {
    fn delay(&mut self, duration: Duration) -> Result<(), DelayError> {
        if self.fail_after.is_some_and(|n| self.delays.len() >= n) {
            return Err(DelayError("interrupted by test".into()));
        }
        self.delays.push(duration);
        Ok(())
    }
}

/// A file whose reported size and actual content can disagree.
#[derive(Debug, Clone)]
pub(crate) struct FakeFile {
    pub reported_size: u64,
    pub content: Vec<u8>,
    pub readable: bool,
}

#[derive(Debug, Default)]
pub(crate) struct FakeFileSystem {
    files: HashMap<PathBuf, FakeFile>,
}

impl FakeFileSystem {
    pub fn with_file(mut self, path: impl Into<PathBuf>, content: Vec<u8>) -> Self {
        let reported_size = content.len() as u64;
        self.files.insert(
            path.into(),
            FakeFile {
                reported_size,
                content,
                readable: true,
            },
        );
        self
    }

    pub fn with_fake(mut self, path: impl Into<PathBuf>, file: FakeFile) -> Self {
        self.files.insert(path.into(), file);
        self
    }
}

impl FileSystem for FakeFileSystem {
    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    fn readable(&self, path: &Path) -> bool {
        self.files.get(path).is_some_and(|f| f.readable)
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        self.files
            .get(path)
            .map(|f| f.reported_size)
            .ok_or_else(|| io::ErrorKind::NotFound.into())
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read>> {
        let file = self
            .files
            .get(path)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        Ok(Box::new(Cursor::new(file.content.clone())))
    }
}
