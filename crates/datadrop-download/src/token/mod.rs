//! Download capability tokens.
//!
//! Tokens are HS256 JWTs over [`TokenClaims`]. The signature makes every claim
//! tamper-evident; `jti` is a random UUID that keys the download record, so a
//! token cannot be guessed from the dataset or subject it is bound to.
//!
//! Expiry is judged against the injected [`Clock`] rather than the host clock,
//! which is why `jsonwebtoken`'s own `exp` validation is disabled.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;
use uuid::Uuid;

use datadrop_core::download::TOKEN_ISSUER;
use datadrop_core::{
    Clock, Compression, DatasetId, DownloadError, DownloadResult, FileFormat, SubjectId,
    TokenClaims,
};

/// Shortest accepted signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Token issuer construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenConfigError {
    #[error("token secret must be at least {MIN_SECRET_LEN} bytes, got {0}")]
    SecretTooShort(usize),
}

/// What a token is minted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub dataset_id: DatasetId,
    pub subject_id: Option<SubjectId>,
    pub format: FileFormat,
    pub compression: Option<Compression>,
}

/// A freshly minted token together with its decoded claims.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: TokenClaims,
}

/// Mints and checks signed download tokens.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    max_lifetime: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    /// Create an issuer signing with `secret`.
    ///
    /// `max_lifetime` is the hard ceiling signed into every token; it is
    /// raised to the requested TTL when that is longer.
    pub fn new(
        secret: &[u8],
        max_lifetime: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TokenConfigError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(TokenConfigError::SecretTooShort(secret.len()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            max_lifetime,
            clock,
        })
    }

    /// Mint a token for `grant`, valid for at least `ttl`.
    pub fn issue(&self, grant: TokenGrant, ttl: Duration) -> DownloadResult<IssuedToken> {
        let now = self.clock.now();
        let lifetime = ttl.max(self.max_lifetime);
        let lifetime = i64::try_from(lifetime.as_secs())
            .map_err(|_| DownloadError::validation("token lifetime out of range"))?;

        let claims = TokenClaims {
            jti: Uuid::new_v4(),
            did: grant.dataset_id,
            sub: grant.subject_id,
            fmt: grant.format,
            cmp: grant.compression,
            iss: TOKEN_ISSUER.to_string(),
            iat: now.timestamp(),
            exp: now.timestamp().saturating_add(lifetime),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| DownloadError::validation(format!("token encoding failed: {e}")))?;

        tracing::debug!(
            target: "datadrop.token",
            token_id = %claims.jti,
            dataset_id = %claims.did,
            exp = claims.exp,
            "issued download token"
        );
        Ok(IssuedToken { token, claims })
    }

    /// Check signature, issuer and hard expiry. No I/O.
    pub fn validate_structure(&self, token: &str) -> DownloadResult<TokenClaims> {
        let claims = self.inspect(token)?;
        if claims.is_expired_at(self.clock.now()) {
            return Err(DownloadError::TokenExpired {
                expired_at: claims.expires_at(),
            });
        }
        Ok(claims)
    }

    /// `bool` form of [`Self::validate_structure`].
    pub fn is_structurally_valid(&self, token: &str) -> bool {
        self.validate_structure(token).is_ok()
    }

    /// Check signature and issuer only, accepting tokens past their hard expiry.
    ///
    /// Used where a caller may still look at what happened to an old download.
    pub fn inspect(&self, token: &str) -> DownloadResult<TokenClaims> {
        decode::<TokenClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                let reason = match e.kind() {
                    ErrorKind::InvalidSignature => "signature mismatch".to_string(),
                    ErrorKind::InvalidIssuer => "unexpected issuer".to_string(),
                    ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) => {
                        "malformed token".to_string()
                    }
                    ErrorKind::MissingRequiredClaim(claim) => format!("missing claim '{claim}'"),
                    _ => format!("rejected: {e}"),
                };
                tracing::debug!(target: "datadrop.token", %reason, "token rejected");
                DownloadError::token_invalid(reason)
            })
    }
}
