//! Organization download policy, rate-limit types and policy decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{Compression, FileFormat, OrganizationId, Role, Subject};

/// Answer from the policy oracle for a yes/no question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AccessDecision {
    #[must_use]
    pub const fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Per-subject download caps. Zero disables a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub hourly: u32,
    pub daily: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            hourly: 50,
            daily: 200,
        }
    }
}

impl RateLimits {
    /// Limit configured for a window, `None` when unlimited.
    #[must_use]
    pub const fn limit_for(&self, window: RateWindow) -> Option<u32> {
        let limit = match window {
            RateWindow::Hour => self.hourly,
            RateWindow::Day => self.daily,
        };
        if limit == 0 { None } else { Some(limit) }
    }
}

/// Download policy of an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrgDownloadPolicy {
    pub downloads_enabled: bool,
    pub max_file_size_mb: u64,
    pub allowed_formats: Vec<FileFormat>,
    pub allowed_compressions: Vec<Compression>,
    /// Roles that may read but never download.
    pub restricted_roles: Vec<Role>,
    pub rate_limits: RateLimits,
}

impl Default for OrgDownloadPolicy {
    fn default() -> Self {
        Self {
            downloads_enabled: true,
            max_file_size_mb: 1024,
            allowed_formats: FileFormat::ALL.to_vec(),
            allowed_compressions: vec![Compression::Zip, Compression::Gzip],
            restricted_roles: vec![Role::Guest],
            rate_limits: RateLimits::default(),
        }
    }
}

impl OrgDownloadPolicy {
    /// Size cap in bytes.
    #[must_use]
    pub const fn max_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Fixed, clock-aligned counting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateWindow {
    Hour,
    Day,
}

impl RateWindow {
    pub const ALL: [Self; 2] = [Self::Hour, Self::Day];

    /// Window length in seconds.
    #[must_use]
    pub const fn seconds(&self) -> i64 {
        match self {
            Self::Hour => 3_600,
            Self::Day => 86_400,
        }
    }

    /// Index of the bucket containing `at`.
    #[must_use]
    pub const fn bucket(&self, at: DateTime<Utc>) -> i64 {
        at.timestamp().div_euclid(self.seconds())
    }

    /// Seconds from `at` to the start of the next bucket (never zero).
    #[must_use]
    pub fn seconds_until_next(&self, at: DateTime<Utc>) -> u64 {
        let next = (self.bucket(at) + 1) * self.seconds();
        u64::try_from(next - at.timestamp()).unwrap_or(1).max(1)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hourly",
            Self::Day => "daily",
        }
    }
}

impl fmt::Display for RateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key under which rate-limit counters are kept.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Key for a subject; anonymous callers share a bucket per organization.
    #[must_use]
    pub fn for_subject(subject: &Subject, dataset_org: &OrganizationId) -> Self {
        match &subject.id {
            Some(id) => Self(format!("subject:{id}")),
            None => Self(format!("anonymous:{dataset_org}")),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub hourly_used: u32,
    pub daily_used: u32,
    pub limits: RateLimits,
    /// Window that blocked the request, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exceeded: Option<RateWindow>,
    /// Seconds until the blocking window rolls over.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl RateLimitStatus {
    /// Count used in a window.
    #[must_use]
    pub const fn used_in(&self, window: RateWindow) -> u32 {
        match window {
            RateWindow::Hour => self.hourly_used,
            RateWindow::Day => self.daily_used,
        }
    }
}

/// Outcome of a successful validation pass.
///
/// Ephemeral: built per request, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub max_size_bytes: u64,
    pub allowed_formats: Vec<FileFormat>,
    pub allowed_compressions: Vec<Compression>,
    pub rate_limit: RateLimitStatus,
}
