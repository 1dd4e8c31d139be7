//! Parcel protocol reference implementation.
//! Typed, confirmed packages over an ordered byte stream; the host supplies the transport.

pub mod byte_array;
pub mod communication;
pub mod config;
pub mod framing;
pub mod fs;
pub mod protocol;
pub mod retry;
pub mod status;
pub mod transfer;
pub mod transport;
pub mod wire;

pub use byte_array::ByteArray;
pub use communication::{CommunicationError, Connection};
pub use config::{Backoff, BackoffKind, ConfigError, FramingMode, ProtocolConfig};
pub use fs::{FileSystem, LocalFileSystem};
pub use protocol::{Package, PackageContent, PackageType, PACKAGE_TRAILER};
pub use retry::{Delay, DelayError, RetryInformations, ThreadSleep, WaitOutcome};
pub use status::{ErrorMessage, StatusCode};
pub use transfer::{DirectorySink, FileReception, FileSink, ReceivedFile, TransferError};
pub use transport::{TcpTransport, Transport};
pub use wire::{decode_package, encode_package, DecodeError, EncodeError};

#[cfg(test)]
pub(crate) mod test_helpers;
