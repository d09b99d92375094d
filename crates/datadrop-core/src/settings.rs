//! Download subsystem tunables and their validation.
//!
//! Pure domain types with no infrastructure dependencies. Durations are stored
//! as plain integers so the struct round-trips through any config format.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default attempt window of a freshly issued token (24 hours).
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 24 * 3_600;

/// Default hard lifetime ceiling of a signed token (7 days).
pub const DEFAULT_TOKEN_MAX_LIFETIME_SECS: u64 = 7 * 24 * 3_600;

/// Default transfer chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Tunables for token lifetime, chunking and transfer liveness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DownloadSettings {
    /// Attempt window granted at issue and on every retry.
    pub token_ttl_secs: u64,

    /// Hard ceiling baked into the token signature; retries never extend past it.
    pub token_max_lifetime_secs: u64,

    /// Bytes read from the artifact store per chunk.
    pub chunk_size: usize,

    /// A send to the client stalled longer than this counts as a disconnect.
    pub idle_timeout_secs: u64,

    /// Minimum spacing between progress writes to the record.
    pub progress_persist_interval_ms: u64,

    /// `in_progress` records silent for this long are swept to `interrupted`.
    pub stale_transfer_after_secs: u64,

    /// Interval of the retention sweeper.
    pub sweep_interval_secs: u64,

    /// Chunks buffered between the worker and the client.
    pub channel_capacity: usize,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl DownloadSettings {
    /// Create settings with sensible defaults.
    #[must_use]
    pub const fn with_defaults() -> Self {
        Self {
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            token_max_lifetime_secs: DEFAULT_TOKEN_MAX_LIFETIME_SECS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            idle_timeout_secs: 30,
            progress_persist_interval_ms: 500,
            stale_transfer_after_secs: 300,
            sweep_interval_secs: 60,
            channel_capacity: 8,
        }
    }

    #[must_use]
    pub const fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl_secs = ttl.as_secs();
        self
    }

    #[must_use]
    pub const fn with_token_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_max_lifetime_secs = lifetime.as_secs();
        self
    }

    #[must_use]
    pub const fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_secs = timeout.as_secs();
        self
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_progress_persist_interval(mut self, interval: Duration) -> Self {
        self.progress_persist_interval_ms = interval.as_millis() as u64;
        self
    }

    #[must_use]
    pub const fn with_stale_transfer_after(mut self, after: Duration) -> Self {
        self.stale_transfer_after_secs = after.as_secs();
        self
    }

    #[must_use]
    pub const fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    #[must_use]
    pub const fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    /// Lifetime signed into the token: never shorter than the attempt window.
    #[must_use]
    pub const fn token_max_lifetime(&self) -> Duration {
        let secs = if self.token_max_lifetime_secs > self.token_ttl_secs {
            self.token_max_lifetime_secs
        } else {
            self.token_ttl_secs
        };
        Duration::from_secs(secs)
    }

    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    #[must_use]
    pub const fn progress_persist_interval(&self) -> Duration {
        Duration::from_millis(self.progress_persist_interval_ms)
    }

    #[must_use]
    pub const fn stale_transfer_after(&self) -> Duration {
        Duration::from_secs(self.stale_transfer_after_secs)
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Attempt window as a `chrono` duration, for record arithmetic.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn token_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_secs as i64)
    }
}

/// Settings validation error.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Token TTL must be between 60 seconds and 30 days, got {0}s")]
    InvalidTokenTtl(u64),

    #[error("Chunk size must be between 1 KiB and 8 MiB, got {0}")]
    InvalidChunkSize(usize),

    #[error("Idle timeout must be at least 1 second")]
    InvalidIdleTimeout,

    #[error("Channel capacity must be between 1 and 1024, got {0}")]
    InvalidChannelCapacity(usize),

    #[error("Sweep interval must be at least 1 second")]
    InvalidSweepInterval,

    #[error("Stale transfer threshold ({stale}s) must exceed the idle timeout ({idle}s)")]
    StaleThresholdTooShort { stale: u64, idle: u64 },
}

/// Validate download settings.
pub fn validate_settings(settings: &DownloadSettings) -> Result<(), SettingsError> {
    if !(60..=30 * 24 * 3_600).contains(&settings.token_ttl_secs) {
        return Err(SettingsError::InvalidTokenTtl(settings.token_ttl_secs));
    }
    if !(1024..=8 * 1024 * 1024).contains(&settings.chunk_size) {
        return Err(SettingsError::InvalidChunkSize(settings.chunk_size));
    }
    if settings.idle_timeout_secs == 0 {
        return Err(SettingsError::InvalidIdleTimeout);
    }
    if !(1..=1024).contains(&settings.channel_capacity) {
        return Err(SettingsError::InvalidChannelCapacity(
            settings.channel_capacity,
        ));
    }
    if settings.sweep_interval_secs == 0 {
        return Err(SettingsError::InvalidSweepInterval);
    }
    if settings.stale_transfer_after_secs <= settings.idle_timeout_secs {
        return Err(SettingsError::StaleThresholdTooShort {
            stale: settings.stale_transfer_after_secs,
            idle: settings.idle_timeout_secs,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_settings(&DownloadSettings::with_defaults()).is_ok());
    }

    #[test]
    fn max_lifetime_never_undercuts_ttl() {
        let settings = DownloadSettings::with_defaults()
            .with_token_ttl(Duration::from_secs(10 * 24 * 3_600))
            .with_token_max_lifetime(Duration::from_secs(3_600));
        assert_eq!(settings.token_max_lifetime(), settings.token_ttl());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let tiny_chunk = DownloadSettings::with_defaults().with_chunk_size(16);
        assert_eq!(
            validate_settings(&tiny_chunk),
            Err(SettingsError::InvalidChunkSize(16))
        );

        let short_ttl = DownloadSettings::with_defaults().with_token_ttl(Duration::from_secs(5));
        assert_eq!(
            validate_settings(&short_ttl),
            Err(SettingsError::InvalidTokenTtl(5))
        );

        let stale = DownloadSettings::with_defaults()
            .with_idle_timeout(Duration::from_secs(30))
            .with_stale_transfer_after(Duration::from_secs(10));
        assert!(matches!(
            validate_settings(&stale),
            Err(SettingsError::StaleThresholdTooShort { .. })
        ));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let parsed: DownloadSettings = serde_json::from_str(r#"{"chunk_size": 4096}"#).unwrap();
        assert_eq!(parsed.chunk_size, 4096);
        assert_eq!(parsed.token_ttl_secs, DEFAULT_TOKEN_TTL_SECS);
    }
}
