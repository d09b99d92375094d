//! Progress persistence throttling.
//!
//! Live progress is published on every chunk; writes to the download record
//! are spaced out so a fast transfer does not hammer the database.

use std::time::{Duration, Instant};

/// Rate-limiter for progress writes.
///
/// Ensures the record is not written more often than the configured interval.
pub struct ProgressThrottle {
    last_emit: Option<Instant>,
    min_interval: Duration,
}

impl ProgressThrottle {
    /// Create a new throttle with the specified minimum interval.
    ///
    /// The first check only passes once `min_interval` has elapsed since
    /// construction: the transfer start itself was just written.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_emit: Some(Instant::now()),
            min_interval,
        }
    }

    /// Check if enough time has passed to write another progress update.
    pub fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }

    /// Force the next check to return true.
    pub const fn reset(&mut self) {
        self.last_emit = None;
    }
}
