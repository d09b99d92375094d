//! `Range` header handling for resumable transfers.
//!
//! Only single, open-ended continuations are honored (`bytes=N-`, or
//! `bytes=N-M` where `M` is the last byte). Anything else is reported as
//! unsatisfiable so the caller can fall back to the full artifact.

use std::fmt;

/// A parsed `Range` header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// `bytes=start-` or `bytes=start-end`.
    FromOffset { start: u64, end: Option<u64> },
    /// `bytes=-n`: the last `n` bytes.
    Suffix(u64),
}

/// Why a range cannot be honored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeRejection {
    Malformed(String),
    MultiRange,
    Suffix,
    EndsBeforeEof { end: u64, last: u64 },
    BeyondEof { start: u64, size: u64 },
}

impl fmt::Display for RangeRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(raw) => write!(f, "malformed range '{raw}'"),
            Self::MultiRange => f.write_str("multiple ranges are not supported"),
            Self::Suffix => f.write_str("suffix ranges are not supported"),
            Self::EndsBeforeEof { end, last } => {
                write!(f, "range ends at byte {end} before the last byte {last}")
            }
            Self::BeyondEof { start, size } => {
                write!(f, "range start {start} is beyond the artifact size {size}")
            }
        }
    }
}

impl RangeRequest {
    /// Parse a raw header value.
    pub fn parse(raw: &str) -> Result<Self, RangeRejection> {
        let malformed = || RangeRejection::Malformed(raw.to_string());
        let set = raw
            .trim()
            .strip_prefix("bytes=")
            .ok_or_else(malformed)?
            .trim();
        if set.contains(',') {
            return Err(RangeRejection::MultiRange);
        }
        let (start, end) = set.split_once('-').ok_or_else(malformed)?;
        let (start, end) = (start.trim(), end.trim());

        if start.is_empty() {
            let n = end.parse::<u64>().map_err(|_| malformed())?;
            return Ok(Self::Suffix(n));
        }
        let start = start.parse::<u64>().map_err(|_| malformed())?;
        let end = if end.is_empty() {
            None
        } else {
            let end = end.parse::<u64>().map_err(|_| malformed())?;
            if end < start {
                return Err(malformed());
            }
            Some(end)
        };
        Ok(Self::FromOffset { start, end })
    }

    /// Resolve against an artifact of `size` bytes.
    pub fn resolve(&self, size: u64) -> Result<ByteRange, RangeRejection> {
        match *self {
            Self::Suffix(_) => Err(RangeRejection::Suffix),
            Self::FromOffset { start, end } => {
                if start >= size {
                    return Err(RangeRejection::BeyondEof { start, size });
                }
                let last = size - 1;
                if let Some(end) = end {
                    if end < last {
                        return Err(RangeRejection::EndsBeforeEof { end, last });
                    }
                }
                Ok(ByteRange {
                    start,
                    total: size,
                    partial: true,
                })
            }
        }
    }
}

/// Byte span actually served, always running to the end of the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub total: u64,
    /// Served as `206 Partial Content`.
    pub partial: bool,
}

impl ByteRange {
    /// The whole artifact.
    #[must_use]
    pub const fn full(total: u64) -> Self {
        Self {
            start: 0,
            total,
            partial: false,
        }
    }

    /// Number of bytes this range covers.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.total.saturating_sub(self.start)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Content-Range` header value, for partial responses only.
    #[must_use]
    pub fn content_range(&self) -> Option<String> {
        self.partial.then(|| {
            format!(
                "bytes {}-{}/{}",
                self.start,
                self.total.saturating_sub(1),
                self.total
            )
        })
    }
}
