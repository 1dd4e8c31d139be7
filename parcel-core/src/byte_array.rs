//! Owned byte buffer with an explicit size. The unit of raw bytes between codec and framing.

use std::ops::Deref;

/// Growable owned buffer. `len()` is always exactly the number of valid bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteArray {
    data: Vec<u8>,
}

impl ByteArray {
    /// Empty array with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Copy `bytes` onto the end of the array.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn push_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn push_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn push_u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Free the contents and reset to empty. Safe to call any number of times.
    pub fn delete(&mut self) {
        self.data = Vec::new();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Split off the first `n` bytes (clamped to `len()`), keeping the rest in `self`.
    pub fn drain_front(&mut self, n: usize) -> ByteArray {
        let n = n.min(self.data.len());
        let rest = self.data.split_off(n);
        let front = std::mem::replace(&mut self.data, rest);
        ByteArray { data: front }
    }
}

impl Deref for ByteArray {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl AsRef<[u8]> for ByteArray {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for ByteArray {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl From<&[u8]> for ByteArray {
    fn from(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
        }
    }
}
