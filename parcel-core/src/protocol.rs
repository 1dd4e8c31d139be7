//! Parcel wire protocol: package types, type codes and the trailer marker.

use crate::status::ErrorMessage;

/// Marker written as the last four bytes of every framed package.
pub const PACKAGE_TRAILER: u32 = 0xFEED_FACE;

/// Type code carried in the first four bytes of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PackageType {
    Confirmation = 1,
    CheckConnection = 2,
    FileHeader = 3,
    FileChunk = 4,
    FileTrailer = 5,
    CommandResult = 6,
    Error = 7,
}

impl PackageType {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => PackageType::Confirmation,
            2 => PackageType::CheckConnection,
            3 => PackageType::FileHeader,
            4 => PackageType::FileChunk,
            5 => PackageType::FileTrailer,
            6 => PackageType::CommandResult,
            7 => PackageType::Error,
            _ => return None,
        })
    }

    /// Every package is confirmed by the receiver, except confirmations themselves.
    pub fn requires_confirmation(self) -> bool {
        self != PackageType::Confirmation
    }
}

/// Typed payload of a package. The variant determines the type code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageContent {
    /// Acknowledges delivery of the package with `package_id`.
    Confirmation { package_id: u32 },
    /// Liveness probe.
    CheckConnection,
    /// Opens a file transfer.
    FileHeader { file_size: u64, file_name: String },
    /// One segment of file content; the chunk size is the data length.
    FileChunk { data: Vec<u8> },
    /// Closes a file transfer.
    FileTrailer,
    /// Outcome of a remote command.
    CommandResult { result_code: i32 },
    /// Out-of-band failure report.
    Error {
        error_code: i32,
        error_message: String,
    },
}

impl PackageContent {
    pub fn package_type(&self) -> PackageType {
        match self {
            PackageContent::Confirmation { .. } => PackageType::Confirmation,
            PackageContent::CheckConnection => PackageType::CheckConnection,
            PackageContent::FileHeader { .. } => PackageType::FileHeader,
            PackageContent::FileChunk { .. } => PackageType::FileChunk,
            PackageContent::FileTrailer => PackageType::FileTrailer,
            PackageContent::CommandResult { .. } => PackageType::CommandResult,
            PackageContent::Error { .. } => PackageType::Error,
        }
    }
}

/// One discrete protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub id: u32,
    pub content: PackageContent,
}

impl Package {
    /// New package with a random id.
    pub fn new(content: PackageContent) -> Self {
        Self::with_id(rand::random(), content)
    }

    pub fn with_id(id: u32, content: PackageContent) -> Self {
        Self { id, content }
    }

    pub fn confirmation(package_id: u32) -> Self {
        Self::new(PackageContent::Confirmation { package_id })
    }

    pub fn check_connection() -> Self {
        Self::new(PackageContent::CheckConnection)
    }

    pub fn file_header(file_size: u64, file_name: impl Into<String>) -> Self {
        Self::new(PackageContent::FileHeader {
            file_size,
            file_name: file_name.into(),
        })
    }

    pub fn file_chunk(data: impl Into<Vec<u8>>) -> Self {
        Self::new(PackageContent::FileChunk { data: data.into() })
    }

    pub fn file_trailer() -> Self {
        Self::new(PackageContent::FileTrailer)
    }

    pub fn command_result(result_code: i32) -> Self {
        Self::new(PackageContent::CommandResult { result_code })
    }

    pub fn error(error_code: i32, error_message: impl Into<String>) -> Self {
        Self::new(PackageContent::Error {
            error_code,
            error_message: error_message.into(),
        })
    }

    /// Error package for a catalogued message.
    pub fn error_message(message: ErrorMessage) -> Self {
        Self::error(message.code(), message.text())
    }

    pub fn package_type(&self) -> PackageType {
        self.content.package_type()
    }

    pub fn requires_confirmation(&self) -> bool {
        self.package_type().requires_confirmation()
    }

    /// True if this is a confirmation of the package with id `id`.
    pub fn confirms(&self, id: u32) -> bool {
        matches!(self.content, PackageContent::Confirmation { package_id } if package_id == id)
    }
}
