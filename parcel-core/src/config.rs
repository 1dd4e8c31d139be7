//! Protocol tuning passed explicitly to every component: poll timeout, retry budgets,
//! backoff policy, chunk size and framing policy.

use std::time::Duration;

use serde::Deserialize;

use crate::wire;

/// Size of each read issued against the transport.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;
/// Size of each file chunk package.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 30;
pub const DEFAULT_MAX_READ_ATTEMPTS: u32 = 30;
/// Upper bound on one framed package, trailer included.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// What framing does with bytes that arrive after a complete package in the same read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramingMode {
    /// Extra bytes are a protocol violation; the buffer is discarded.
    #[default]
    Strict,
    /// Extra bytes are kept and served by the next read.
    Buffered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Constant,
    Linear,
    Exponential,
}

/// Delay between retry attempts, as a function of the attempt number.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Backoff {
    #[serde(default = "default_backoff_kind")]
    pub kind: BackoffKind,
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
}

fn default_backoff_kind() -> BackoffKind {
    BackoffKind::Linear
}
fn default_backoff_base_ms() -> u64 {
    10
}
fn default_backoff_max_ms() -> u64 {
    500
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            kind: default_backoff_kind(),
            base_ms: default_backoff_base_ms(),
            max_ms: default_backoff_max_ms(),
        }
    }
}

impl Backoff {
    /// No delay at all. Used where the caller drives time itself.
    pub fn none() -> Self {
        Self {
            kind: BackoffKind::Constant,
            base_ms: 0,
            max_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based). Never decreases as `attempt` grows.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = match self.kind {
            BackoffKind::Constant => self.base_ms,
            BackoffKind::Linear => self.base_ms.saturating_mul(u64::from(attempt)),
            BackoffKind::Exponential => {
                let factor = 1u64
                    .checked_shl(attempt.saturating_sub(1))
                    .unwrap_or(u64::MAX);
                self.base_ms.saturating_mul(factor)
            }
        };
        Duration::from_millis(ms.min(self.max_ms))
    }
}

/// All knobs of the protocol. Deserializable so hosts can embed it in their config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocolConfig {
    /// How long a read poll waits for pending content. Zero means a pure peek.
    pub poll_timeout_ms: u64,
    pub read_buffer_size: usize,
    pub chunk_size: usize,
    pub max_write_attempts: u32,
    pub max_read_attempts: u32,
    pub max_frame_len: usize,
    pub framing: FramingMode,
    pub backoff: Backoff,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 0,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
            max_read_attempts: DEFAULT_MAX_READ_ATTEMPTS,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            framing: FramingMode::default(),
            backoff: Backoff::default(),
        }
    }
}

impl ProtocolConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Chunk size actually used; zero falls back to the default.
    pub fn effective_chunk_size(&self) -> usize {
        if self.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.chunk_size
        }
    }

    /// Reject settings the protocol cannot work with: every chunk package must fit in one frame.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let chunk_frame = wire::chunk_frame_len(self.effective_chunk_size());
        if chunk_frame > self.max_frame_len {
            return Err(ConfigError::ChunkTooLarge {
                chunk_size: self.effective_chunk_size(),
                frame_len: chunk_frame,
                max_frame_len: self.max_frame_len,
            });
        }
        Ok(())
    }

    pub fn effective_read_buffer_size(&self) -> usize {
        if self.read_buffer_size == 0 {
            DEFAULT_READ_BUFFER_SIZE
        } else {
            self.read_buffer_size
        }
    }
}

/// Invalid protocol settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("chunk size {chunk_size} needs {frame_len}-byte frames, above max_frame_len {max_frame_len}")]
    ChunkTooLarge {
        chunk_size: usize,
        frame_len: usize,
        max_frame_len: usize,
    },
}
