//! Output format and compression selectors carried by a download request.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output representation requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Csv,
    Json,
    Excel,
    Parquet,
}

impl FileFormat {
    /// Every format the subsystem knows about.
    pub const ALL: [Self; 4] = [Self::Csv, Self::Json, Self::Excel, Self::Parquet];

    /// Canonical lowercase name (also the persisted value).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Excel => "excel",
            Self::Parquet => "parquet",
        }
    }

    /// File extension used when the artifact itself has none.
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Excel => "xlsx",
            Self::Parquet => "parquet",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "excel" | "xlsx" | "xls" => Ok(Self::Excel),
            "parquet" => Ok(Self::Parquet),
            other => Err(format!("unknown file format '{other}'")),
        }
    }
}

/// Archive/compression wrapper requested on top of the format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    Zip,
    Gzip,
    Bzip2,
}

impl Compression {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zip" => Ok(Self::Zip),
            "gzip" | "gz" => Ok(Self::Gzip),
            "bzip2" | "bz2" => Ok(Self::Bzip2),
            other => Err(format!("unknown compression '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parse_accepts_aliases() {
        assert_eq!("XLSX".parse::<FileFormat>(), Ok(FileFormat::Excel));
        assert_eq!(" csv ".parse::<FileFormat>(), Ok(FileFormat::Csv));
        assert!("xml".parse::<FileFormat>().is_err());
    }

    #[test]
    fn compression_parse_accepts_aliases() {
        assert_eq!("gz".parse::<Compression>(), Ok(Compression::Gzip));
        assert!("rar".parse::<Compression>().is_err());
    }
}
