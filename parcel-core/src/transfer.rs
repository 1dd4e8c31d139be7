//! File transfer: header, chunks, trailer, each confirmed before the next. Also the receiving
//! side, which tracks one incoming file and writes it through a [`FileSink`].

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::communication::{CommunicationError, Connection};
use crate::fs::{FileSystem, LocalFileSystem};
use crate::protocol::{Package, PackageContent, PackageType};
use crate::retry::Delay;
use crate::transport::Transport;

/// File transfer failure, on either side.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("file not readable: {}", .0.display())]
    NotReadable(PathBuf),
    #[error("path has no file name: {}", .0.display())]
    NoFileName(PathBuf),
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("file size mismatch: declared {declared} bytes, got {actual}")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("file has more than the declared {declared} bytes")]
    Overflow { declared: u64 },
    #[error("unexpected {0:?} package during file transfer")]
    UnexpectedPackage(PackageType),
    #[error("file header received while {0} is still open")]
    HeaderWhileOpen(String),
    #[error("file chunk received without a file header")]
    ChunkWithoutHeader,
    #[error("file trailer received without a file header")]
    TrailerWithoutHeader,
    #[error("refusing file name {0:?}")]
    InvalidName(String),
}

impl<T: Transport, D: Delay> Connection<T, D> {
    /// Send the file at `path`: header, content, trailer. Any failure aborts the transfer.
    pub fn send_file<F: FileSystem + ?Sized>(
        &mut self,
        fs: &F,
        path: &Path,
    ) -> Result<(), CommunicationError> {
        self.config().validate().map_err(|e| {
            tracing::error!("refusing to send {}: {e}", path.display());
            e
        })?;
        if !fs.exists(path) {
            tracing::error!(path = %path.display(), "file not found");
            return Err(TransferError::NotFound(path.to_path_buf()).into());
        }
        if !fs.readable(path) {
            tracing::error!(path = %path.display(), "file not readable");
            return Err(TransferError::NotReadable(path.to_path_buf()).into());
        }
        let size = fs.size(path).map_err(|source| {
            tracing::error!(path = %path.display(), "could not read file size: {source}");
            TransferError::Io {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::NoFileName(path.to_path_buf()))?;

        tracing::info!(path = %path.display(), size, "sending file");
        self.send_file_header(size, &name)?;
        self.send_file_content(fs, path, size)?;
        self.send_file_trailer()?;
        tracing::info!(name = %name, size, "file sent");
        Ok(())
    }

    /// [`send_file`](Self::send_file) from the local file system.
    pub fn send_local_file(&mut self, path: &Path) -> Result<(), CommunicationError> {
        self.send_file(&LocalFileSystem, path)
    }

    pub fn send_file_header(&mut self, file_size: u64, file_name: &str) -> Result<(), CommunicationError> {
        self.send_package(&Package::file_header(file_size, file_name))
            .map_err(|e| {
                tracing::error!("could not send file header: {e}");
                e
            })
    }

    /// Stream the file in chunks until end of file. The byte total must equal `file_size`.
    pub fn send_file_content<F: FileSystem + ?Sized>(
        &mut self,
        fs: &F,
        path: &Path,
        file_size: u64,
    ) -> Result<(), CommunicationError> {
        let io_error = |source| TransferError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = fs.open(path).map_err(|e| {
            tracing::error!(path = %path.display(), "could not open file: {e}");
            io_error(e)
        })?;
        let mut buf = vec![0u8; self.config().effective_chunk_size()];
        let mut total: u64 = 0;
        let mut chunks: u64 = 0;
        loop {
            let n = read_chunk(&mut file, &mut buf).map_err(|e| {
                tracing::error!(path = %path.display(), "could not read file: {e}");
                io_error(e)
            })?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if total > file_size {
                tracing::error!(declared = file_size, "file grew while being sent");
                return Err(TransferError::Overflow {
                    declared: file_size,
                }
                .into());
            }
            self.send_package(&Package::file_chunk(&buf[..n]))
                .map_err(|e| {
                    tracing::error!(chunk = chunks, "could not send file content: {e}");
                    e
                })?;
            chunks += 1;
        }
        if total != file_size {
            tracing::error!(declared = file_size, actual = total, "file size mismatch");
            return Err(TransferError::SizeMismatch {
                declared: file_size,
                actual: total,
            }
            .into());
        }
        tracing::debug!(chunks, bytes = total, "file content sent");
        Ok(())
    }

    pub fn send_file_trailer(&mut self) -> Result<(), CommunicationError> {
        self.send_package(&Package::file_trailer()).map_err(|e| {
            tracing::error!("could not send file trailer: {e}");
            e
        })
    }

    /// Receive one file into `reception`. Each package is confirmed once the reception accepted
    /// it; a rejected package is left unconfirmed and ends the transfer. Returns once a trailer
    /// completes the file. A failure discards the partial file.
    pub fn receive_file<S: FileSink>(
        &mut self,
        reception: &mut FileReception<S>,
    ) -> Result<ReceivedFile, CommunicationError> {
        let result = self.receive_file_inner(reception);
        if result.is_err() {
            reception.abort();
        }
        result
    }

    fn receive_file_inner<S: FileSink>(
        &mut self,
        reception: &mut FileReception<S>,
    ) -> Result<ReceivedFile, CommunicationError> {
        loop {
            let Some(package) = self.receive_package()? else {
                tracing::debug!(open = reception.is_open(), "no file package received");
                return Err(CommunicationError::RetryExhausted {
                    operation: "receive file",
                    attempts: self.config().max_read_attempts,
                });
            };
            let completed = reception.on_package(&package).map_err(|e| {
                tracing::error!(id = package.id, "rejecting package: {e}");
                e
            })?;
            if package.requires_confirmation() {
                self.send_confirmation(&package)?;
            }
            if let Some(file) = completed {
                return Ok(file);
            }
        }
    }
}

/// Fill `buf` from `reader` unless end of file comes first. Returns the bytes read.
fn read_chunk(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// A completely received file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub name: String,
    pub size: u64,
    /// Where the sink put it.
    pub location: PathBuf,
}

/// Destination of received files.
pub trait FileSink {
    type Writer: Write;

    fn create(&mut self, name: &str, size: u64) -> io::Result<Self::Writer>;
    /// All bytes arrived; make the file visible. Returns its location.
    fn complete(&mut self, name: &str, writer: Self::Writer) -> io::Result<PathBuf>;
    /// The transfer failed; drop whatever was written.
    fn discard(&mut self, name: &str, writer: Self::Writer);
}

/// Writes received files into a directory. Data goes to a hidden `.name.part` file that is
/// renamed once the trailer arrives.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn part_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!(".{name}.part"))
    }

    /// Target path of `name`, or `AlreadyExists` if something is there.
    fn ensure_free(&self, name: &str) -> io::Result<PathBuf> {
        let target = self.dir.join(name);
        if target.symlink_metadata().is_ok() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", target.display()),
            ));
        }
        Ok(target)
    }
}

impl FileSink for DirectorySink {
    type Writer = BufWriter<File>;

    /// Refuses a name already taken in the directory.
    fn create(&mut self, name: &str, _size: u64) -> io::Result<Self::Writer> {
        fs::create_dir_all(&self.dir)?;
        self.ensure_free(name)?;
        Ok(BufWriter::new(File::create(self.part_path(name))?))
    }

    fn complete(&mut self, name: &str, writer: Self::Writer) -> io::Result<PathBuf> {
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        let part = self.part_path(name);
        let target = match self.ensure_free(name) {
            Ok(t) => t,
            Err(e) => {
                let _ = fs::remove_file(&part);
                return Err(e);
            }
        };
        fs::rename(part, &target)?;
        Ok(target)
    }

    fn discard(&mut self, name: &str, writer: Self::Writer) {
        drop(writer);
        let part = self.part_path(name);
        if let Err(e) = fs::remove_file(&part) {
            tracing::warn!(path = %part.display(), "could not remove partial file: {e}");
        }
    }
}

struct Incoming<W> {
    name: String,
    declared: u64,
    received: u64,
    writer: W,
}

/// Receiving state of one file transfer session.
pub struct FileReception<S: FileSink> {
    sink: S,
    current: Option<Incoming<S::Writer>>,
}

impl<S: FileSink> FileReception<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            current: None,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// A header was accepted and its trailer has not arrived yet.
    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Feed one received package. Returns the file once its trailer arrives. Connection probes
    /// are accepted at any point; other non-transfer packages are rejected.
    pub fn on_package(&mut self, package: &Package) -> Result<Option<ReceivedFile>, TransferError> {
        match &package.content {
            PackageContent::FileHeader {
                file_size,
                file_name,
            } => self.on_header(*file_size, file_name).map(|()| None),
            PackageContent::FileChunk { data } => self.on_chunk(data).map(|()| None),
            PackageContent::FileTrailer => self.on_trailer().map(Some),
            PackageContent::CheckConnection => Ok(None),
            other => Err(TransferError::UnexpectedPackage(other.package_type())),
        }
    }

    pub fn on_header(&mut self, file_size: u64, file_name: &str) -> Result<(), TransferError> {
        if let Some(open) = &self.current {
            return Err(TransferError::HeaderWhileOpen(open.name.clone()));
        }
        if !is_plain_file_name(file_name) {
            tracing::error!(name = file_name, "rejecting file name");
            return Err(TransferError::InvalidName(file_name.to_string()));
        }
        let writer = self
            .sink
            .create(file_name, file_size)
            .map_err(|source| TransferError::Io {
                path: PathBuf::from(file_name),
                source,
            })?;
        tracing::info!(name = file_name, size = file_size, "receiving file");
        self.current = Some(Incoming {
            name: file_name.to_string(),
            declared: file_size,
            received: 0,
            writer,
        });
        Ok(())
    }

    pub fn on_chunk(&mut self, data: &[u8]) -> Result<(), TransferError> {
        let Some(incoming) = self.current.as_mut() else {
            return Err(TransferError::ChunkWithoutHeader);
        };
        let received = incoming.received + data.len() as u64;
        if received > incoming.declared {
            let declared = incoming.declared;
            self.abort();
            return Err(TransferError::Overflow { declared });
        }
        if let Err(source) = incoming.writer.write_all(data) {
            let path = PathBuf::from(&incoming.name);
            self.abort();
            return Err(TransferError::Io { path, source });
        }
        incoming.received = received;
        tracing::trace!(received, declared = incoming.declared, "file chunk stored");
        Ok(())
    }

    pub fn on_trailer(&mut self) -> Result<ReceivedFile, TransferError> {
        let Some(incoming) = self.current.take() else {
            return Err(TransferError::TrailerWithoutHeader);
        };
        let Incoming {
            name,
            declared,
            received,
            writer,
        } = incoming;
        if received != declared {
            self.sink.discard(&name, writer);
            return Err(TransferError::SizeMismatch {
                declared,
                actual: received,
            });
        }
        let location = self
            .sink
            .complete(&name, writer)
            .map_err(|source| TransferError::Io {
                path: PathBuf::from(&name),
                source,
            })?;
        tracing::info!(name = %name, size = received, location = %location.display(), "file received");
        Ok(ReceivedFile {
            name,
            size: received,
            location,
        })
    }

    /// Drop the open file, if any.
    pub fn abort(&mut self) {
        if let Some(incoming) = self.current.take() {
            tracing::warn!(
                name = %incoming.name,
                received = incoming.received,
                "discarding partial file"
            );
            self.sink.discard(&incoming.name, incoming.writer);
        }
    }
}

/// A bare file name: no separators, no parent references, nothing hidden behind a NUL.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
