//! Claims carried by a download capability token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Compression, DatasetId, FileFormat, SubjectId};

/// Issuer stamped into, and required from, every token.
pub const TOKEN_ISSUER: &str = "datadrop";

/// Signed claims of a download token.
///
/// Short claim names keep the encoded token compact. `jti` identifies the
/// download record the token is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub jti: Uuid,
    pub did: DatasetId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<SubjectId>,
    pub fmt: FileFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmp: Option<Compression>,
    pub iss: String,
    /// Issued-at, seconds since the epoch.
    pub iat: i64,
    /// Hard expiry, seconds since the epoch.
    pub exp: i64,
}

impl TokenClaims {
    #[must_use]
    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.iat, 0).unwrap_or_default()
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }

    /// Whether the hard expiry has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }
}
