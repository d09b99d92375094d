//! Dataset metadata as seen by the download subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{DatasetId, OrganizationId, SubjectId};

/// Who may read a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharingLevel {
    /// Owner (and organization admins) only.
    Private,
    /// Any member of the owning organization.
    Organization,
    /// Members of the owning organization in the same department.
    Department,
}

impl SharingLevel {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Organization => "organization",
            Self::Department => "department",
        }
    }

    /// Human-readable summary of what grants read access at this level.
    #[must_use]
    pub const fn required_permission(&self) -> &'static str {
        match self {
            Self::Private => "dataset owner or organization admin",
            Self::Organization => "member of the dataset's organization",
            Self::Department => "member of the dataset's organization and department",
        }
    }
}

impl fmt::Display for SharingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of external system backing a connector dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorType {
    Postgresql,
    Mysql,
    Sqlite,
    Mssql,
    Mongodb,
    Api,
    S3,
    #[serde(other)]
    Other,
}

impl ConnectorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Postgresql => "postgresql",
            Self::Mysql => "mysql",
            Self::Sqlite => "sqlite",
            Self::Mssql => "mssql",
            Self::Mongodb => "mongodb",
            Self::Api => "api",
            Self::S3 => "s3",
            Self::Other => "other",
        }
    }
}

/// Native type of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Csv,
    Json,
    Excel,
    Parquet,
    #[serde(other)]
    Other,
}

impl FileType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Excel => "excel",
            Self::Parquet => "parquet",
            Self::Other => "other",
        }
    }
}

/// Where a dataset's data natively lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatasetSource {
    /// Pulled from an external system through a connector.
    Connector { connector_type: ConnectorType },
    /// Uploaded as a file.
    Upload { file_type: FileType },
}

impl DatasetSource {
    /// Short description used in error details (e.g. `connector:api`).
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Connector { connector_type } => format!("connector:{}", connector_type.as_str()),
            Self::Upload { file_type } => format!("upload:{}", file_type.as_str()),
        }
    }
}

/// Dataset metadata owned by the external catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    /// Display name, used to build the download filename.
    pub name: String,
    pub organization_id: OrganizationId,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub owner_id: Option<SubjectId>,
    pub sharing_level: SharingLevel,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Soft-delete marker.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    pub source: DatasetSource,
    /// Size of the materialized artifact, when known.
    #[serde(default)]
    pub size_bytes: Option<u64>,
    /// Location of the materialized artifact in the artifact store.
    #[serde(default)]
    pub artifact_path: Option<String>,
}

const fn default_true() -> bool {
    true
}

impl Dataset {
    /// Whether the dataset has been soft-deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Size in mebibytes, if known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn size_mb(&self) -> Option<f64> {
        self.size_bytes.map(|b| b as f64 / (1024.0 * 1024.0))
    }
}
