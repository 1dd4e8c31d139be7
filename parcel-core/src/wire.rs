//! Framing: `[type:4][id:4][content][zero padding to 4][trailer:4]`, all integers little-endian.
//!
//! Fixed-size content fields come first, variable-length fields follow with a 4-byte length
//! prefix. Padding keeps the trailer on a 4-byte boundary so the framing layer can look for
//! it word by word.

use crate::byte_array::ByteArray;
use crate::protocol::{Package, PackageContent, PackageType, PACKAGE_TRAILER};

const WORD: usize = 4;
/// Type code + id.
pub const HEADER_LEN: usize = 8;
pub const TRAILER_LEN: usize = 4;
/// Smallest possible frame: a package without content.
pub const MIN_FRAME_LEN: usize = HEADER_LEN + TRAILER_LEN;

fn padded(len: usize) -> usize {
    len.saturating_add(WORD - 1) / WORD * WORD
}

fn full_frame_len(content_len: usize) -> usize {
    padded(HEADER_LEN.saturating_add(content_len)).saturating_add(TRAILER_LEN)
}

/// Frame length of a file chunk package carrying `data_len` bytes.
pub fn chunk_frame_len(data_len: usize) -> usize {
    full_frame_len(data_len.saturating_add(4))
}

fn length_prefix(len: usize, field: &'static str) -> Result<u32, EncodeError> {
    u32::try_from(len).map_err(|_| EncodeError::FieldTooLong { field, len })
}

/// Encode a package into one frame.
pub fn encode_package(package: &Package) -> Result<ByteArray, EncodeError> {
    let mut out = ByteArray::with_capacity(MIN_FRAME_LEN + 16);
    out.push_u32(package.package_type().code());
    out.push_u32(package.id);
    match &package.content {
        PackageContent::Confirmation { package_id } => out.push_u32(*package_id),
        PackageContent::CheckConnection | PackageContent::FileTrailer => {}
        PackageContent::FileHeader {
            file_size,
            file_name,
        } => {
            out.push_u64(*file_size);
            out.push_u32(length_prefix(file_name.len(), "file_name")?);
            out.append(file_name.as_bytes());
        }
        PackageContent::FileChunk { data } => {
            out.push_u32(length_prefix(data.len(), "chunk_data")?);
            out.append(data);
        }
        PackageContent::CommandResult { result_code } => out.push_i32(*result_code),
        PackageContent::Error {
            error_code,
            error_message,
        } => {
            out.push_i32(*error_code);
            out.push_u32(length_prefix(error_message.len(), "error_message")?);
            out.append(error_message.as_bytes());
        }
    }
    let pad = padded(out.len()) - out.len();
    out.append(&[0u8; WORD][..pad]);
    out.push_u32(PACKAGE_TRAILER);
    Ok(out)
}

/// Error encoding a package.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("{field} is {len} bytes, longer than a length prefix can describe")]
    FieldTooLong { field: &'static str, len: usize },
    #[error("encoded package is {len} bytes, limit is {max}")]
    TooLarge { len: usize, max: usize },
}

fn read_u32_at(bytes: &[u8], at: usize) -> Option<u32> {
    let word = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
}

/// Full frame length of the package whose first bytes are `prefix`, trailer included.
/// `Ok(None)` means more bytes are needed before the length is known.
pub fn frame_length(prefix: &[u8]) -> Result<Option<usize>, DecodeError> {
    let Some(code) = read_u32_at(prefix, 0) else {
        return Ok(None);
    };
    let package_type = PackageType::from_code(code).ok_or(DecodeError::UnknownType(code))?;
    let content_len = match package_type {
        PackageType::CheckConnection | PackageType::FileTrailer => Some(0),
        PackageType::Confirmation | PackageType::CommandResult => Some(4),
        PackageType::FileHeader => read_u32_at(prefix, HEADER_LEN + 8).map(|n| 8 + 4 + n as usize),
        PackageType::FileChunk => read_u32_at(prefix, HEADER_LEN).map(|n| 4 + n as usize),
        PackageType::Error => read_u32_at(prefix, HEADER_LEN + 4).map(|n| 4 + 4 + n as usize),
    };
    Ok(content_len.map(full_frame_len))
}

/// Cursor over the content section of a frame whose length was already validated.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::Truncated {
            expected: usize::MAX,
            actual: self.bytes.len(),
        })?;
        let slice = self.bytes.get(self.pos..end).ok_or(DecodeError::Truncated {
            expected: end,
            actual: self.bytes.len(),
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(b);
        Ok(u64::from_le_bytes(word))
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let len = self.u32()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(DecodeError::InvalidUtf8)
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}

/// Decode exactly one frame. `bytes` must hold the whole frame and nothing else.
pub fn decode_package(bytes: &[u8]) -> Result<Package, DecodeError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(DecodeError::Truncated {
            expected: MIN_FRAME_LEN,
            actual: bytes.len(),
        });
    }
    let expected = frame_length(bytes)?.ok_or(DecodeError::Truncated {
        expected: MIN_FRAME_LEN + WORD,
        actual: bytes.len(),
    })?;
    if bytes.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }
    if bytes.len() > expected {
        return Err(DecodeError::TooLong {
            expected,
            actual: bytes.len(),
        });
    }
    let trailer_at = bytes.len() - TRAILER_LEN;
    let trailer = read_u32_at(bytes, trailer_at).unwrap_or_default();
    if trailer != PACKAGE_TRAILER {
        return Err(DecodeError::MissingTrailer(trailer));
    }

    let mut reader = Reader {
        bytes: &bytes[..trailer_at],
        pos: 0,
    };
    let code = reader.u32()?;
    let id = reader.u32()?;
    let package_type = PackageType::from_code(code).ok_or(DecodeError::UnknownType(code))?;
    let content = match package_type {
        PackageType::Confirmation => PackageContent::Confirmation {
            package_id: reader.u32()?,
        },
        PackageType::CheckConnection => PackageContent::CheckConnection,
        PackageType::FileHeader => {
            let file_size = reader.u64()?;
            let file_name = reader.string()?;
            PackageContent::FileHeader {
                file_size,
                file_name,
            }
        }
        PackageType::FileChunk => {
            let len = reader.u32()? as usize;
            PackageContent::FileChunk {
                data: reader.take(len)?.to_vec(),
            }
        }
        PackageType::FileTrailer => PackageContent::FileTrailer,
        PackageType::CommandResult => PackageContent::CommandResult {
            result_code: reader.i32()?,
        },
        PackageType::Error => {
            let error_code = reader.i32()?;
            let error_message = reader.string()?;
            PackageContent::Error {
                error_code,
                error_message,
            }
        }
    };
    if reader.rest().iter().any(|&b| b != 0) {
        return Err(DecodeError::NonZeroPadding);
    }
    Ok(Package { id, content })
}

/// Error decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("frame too long: expected {expected} bytes, got {actual}")]
    TooLong { expected: usize, actual: usize },
    #[error("unknown package type code {0:#x}")]
    UnknownType(u32),
    #[error("package trailer missing (found {0:#010x})")]
    MissingTrailer(u32),
    #[error("non-zero padding before trailer")]
    NonZeroPadding,
    #[error("string field is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}
