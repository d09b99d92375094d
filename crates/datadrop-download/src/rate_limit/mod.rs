//! Fixed-window download rate limiting.
//!
//! Counters live in process memory and are keyed by subject and window.
//! Windows are aligned to the clock (top of the hour, midnight UTC), so
//! `retry_after` is simply the distance to the next boundary. Counts reset on
//! restart, and buckets of past windows are dropped once per hour.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use datadrop_core::{Clock, RateLimitKey, RateLimitStatus, RateLimits, RateWindow};

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    bucket: i64,
    count: u32,
}

type CounterMap = HashMap<(RateLimitKey, RateWindow), WindowCounter>;

#[derive(Default)]
struct Counters {
    by_key: CounterMap,
    /// Hour bucket of the last pass over `by_key`.
    pruned_hour: i64,
}

impl Counters {
    /// Forget counters whose window has rolled over.
    fn prune(&mut self, now: DateTime<Utc>) {
        let hour = RateWindow::Hour.bucket(now);
        if hour == self.pruned_hour {
            return;
        }
        self.pruned_hour = hour;
        self.by_key
            .retain(|(_, window), counter| counter.bucket == window.bucket(now));
    }
}

/// Proof that a request was counted, used to undo the count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitGrant {
    key: RateLimitKey,
    buckets: [(RateWindow, i64); 2],
    pub status: RateLimitStatus,
}

/// In-memory fixed-window limiter.
///
/// All windows of one key are checked and incremented under a single lock,
/// so a request is either counted in every window or in none.
pub struct WindowedRateLimiter {
    counters: Mutex<Counters>,
    clock: Arc<dyn Clock>,
}

impl WindowedRateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            clock,
        }
    }

    /// Current usage without counting anything.
    pub fn check(&self, key: &RateLimitKey, limits: &RateLimits) -> RateLimitStatus {
        let now = self.clock.now();
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        status_at(&counters.by_key, key, limits, now)
    }

    /// Count one request if every window has room.
    ///
    /// On refusal nothing is counted and the blocking status is returned.
    pub fn try_acquire(
        &self,
        key: &RateLimitKey,
        limits: &RateLimits,
    ) -> Result<RateLimitGrant, RateLimitStatus> {
        let now = self.clock.now();
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.prune(now);

        let status = status_at(&counters.by_key, key, limits, now);
        if !status.allowed {
            return Err(status);
        }

        for window in RateWindow::ALL {
            let bucket = window.bucket(now);
            let counter = counters
                .by_key
                .entry((key.clone(), window))
                .or_insert(WindowCounter { bucket, count: 0 });
            if counter.bucket != bucket {
                *counter = WindowCounter { bucket, count: 0 };
            }
            counter.count += 1;
        }

        let status = status_at(&counters.by_key, key, limits, now);
        drop(counters);

        tracing::trace!(
            target: "datadrop.validation",
            key = %key,
            hourly = status.hourly_used,
            daily = status.daily_used,
            "rate limit slot acquired"
        );
        Ok(RateLimitGrant {
            key: key.clone(),
            buckets: RateWindow::ALL.map(|w| (w, w.bucket(now))),
            status,
        })
    }

    /// Undo a counted request (e.g. the token could not be persisted).
    ///
    /// Windows that already rolled over are left alone.
    pub fn release(&self, grant: &RateLimitGrant) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        for (window, bucket) in grant.buckets {
            if let Some(counter) = counters.by_key.get_mut(&(grant.key.clone(), window)) {
                if counter.bucket == bucket {
                    counter.count = counter.count.saturating_sub(1);
                }
            }
        }
    }

    #[cfg(test)]
    fn tracked_buckets(&self) -> usize {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_key
            .len()
    }
}

fn used_in(
    counters: &CounterMap,
    key: &RateLimitKey,
    window: RateWindow,
    now: DateTime<Utc>,
) -> u32 {
    counters
        .get(&(key.clone(), window))
        .filter(|c| c.bucket == window.bucket(now))
        .map_or(0, |c| c.count)
}

fn status_at(
    counters: &CounterMap,
    key: &RateLimitKey,
    limits: &RateLimits,
    now: DateTime<Utc>,
) -> RateLimitStatus {
    let hourly_used = used_in(counters, key, RateWindow::Hour, now);
    let daily_used = used_in(counters, key, RateWindow::Day, now);

    // Longest wait wins when several windows are exhausted.
    let exceeded = RateWindow::ALL
        .into_iter()
        .rev()
        .find(|w| {
            let used = match w {
                RateWindow::Hour => hourly_used,
                RateWindow::Day => daily_used,
            };
            limits.limit_for(*w).is_some_and(|limit| used >= limit)
        });

    RateLimitStatus {
        allowed: exceeded.is_none(),
        hourly_used,
        daily_used,
        limits: *limits,
        exceeded,
        retry_after_secs: exceeded.map(|w| w.seconds_until_next(now)),
    }
}
