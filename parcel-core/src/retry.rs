//! Retry controller: bounded attempt counter plus backoff delay for the I/O loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Backoff;

/// Longest single sleep slice, so a cancellation flag is noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Result of asking the controller for another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The delay elapsed; try the operation again.
    Continue,
    /// The budget is spent; stop without further I/O.
    Exhausted,
}

/// The delay mechanism failed or was cancelled.
#[derive(Debug, thiserror::Error)]
#[error("retry delay interrupted: {0}")]
pub struct DelayError(pub String);

/// Suspension primitive used between attempts.
pub trait Delay {
    fn delay(&mut self, duration: Duration) -> Result<(), DelayError>;
}

/// Sleeps the current thread. With a cancel flag the sleep is cut short and reported as an error.
#[derive(Debug, Clone, Default)]
pub struct ThreadSleep {
    cancel: Option<Arc<AtomicBool>>,
}

impl ThreadSleep {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: Arc<AtomicBool>) -> Self {
        Self {
            cancel: Some(cancel),
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

impl Delay for ThreadSleep {
    fn delay(&mut self, duration: Duration) -> Result<(), DelayError> {
        if self.cancel.is_none() {
            std::thread::sleep(duration);
            return Ok(());
        }
        let deadline = Instant::now() + duration;
        loop {
            if self.cancelled() {
                return Err(DelayError("cancelled".into()));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

/// Attempt bookkeeping for one retry loop. `maximum` counts every I/O attempt the loop may
/// make, the first one included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryInformations {
    maximum: u32,
    attempts: u32,
}

impl RetryInformations {
    /// A zero maximum is raised to one: a loop always gets its first attempt.
    pub fn new(maximum: u32) -> Self {
        Self {
            maximum: maximum.max(1),
            attempts: 0,
        }
    }

    pub fn maximum(&self) -> u32 {
        self.maximum
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.maximum
    }

    /// Account for a failed attempt. Delays and returns `Continue` while budget remains;
    /// returns `Exhausted` (without delaying) on the call that uses it up and on every call after.
    pub fn wait(
        &mut self,
        backoff: &Backoff,
        delay: &mut dyn Delay,
    ) -> Result<WaitOutcome, DelayError> {
        if self.is_exhausted() {
            return Ok(WaitOutcome::Exhausted);
        }
        self.attempts += 1;
        if self.is_exhausted() {
            return Ok(WaitOutcome::Exhausted);
        }
        let duration = backoff.delay_for(self.attempts);
        tracing::trace!(
            attempt = self.attempts,
            maximum = self.maximum,
            ?duration,
            "waiting before retry"
        );
        delay.delay(duration)?;
        Ok(WaitOutcome::Continue)
    }
}
