//! File system collaborator used by file transfer.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Metadata queries and reading for files to be sent.
pub trait FileSystem {
    fn exists(&self, path: &Path) -> bool;
    fn readable(&self, path: &Path) -> bool;
    fn size(&self, path: &Path) -> io::Result<u64>;
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read>>;
}

/// The host's own file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    /// Only regular files count.
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn readable(&self, path: &Path) -> bool {
        File::open(path).is_ok()
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(File::open(path)?))
    }
}
