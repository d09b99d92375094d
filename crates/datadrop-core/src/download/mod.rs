//! Download domain types, errors and the record state machine.
//!
//! Pure data types; no I/O, networking or runtime dependencies allowed.
//!
//! # Structure
//!
//! - `errors` - caller-facing error taxonomy and classified artifact failures
//! - `record` - `DownloadRecord`, `DownloadStatus` and their transitions
//! - `token` - signed capability claims
//! - `progress` - point-in-time progress snapshots and ETA math
//! - `range` - `Range` header parsing and resolution against an artifact size

pub mod errors;
pub mod progress;
pub mod range;
pub mod record;
pub mod token;

pub use errors::{ArtifactError, DownloadError, DownloadResult, TransientKind};
pub use progress::{ProgressSnapshot, estimate_remaining_seconds};
pub use range::{ByteRange, RangeRejection, RangeRequest};
pub use record::{ClientMetadata, DownloadRecord, DownloadStatus, TransitionError};
pub use token::{TOKEN_ISSUER, TokenClaims};
