//! Which output formats can be produced from a dataset's native representation.
//!
//! Connector-backed and uploaded datasets have separate tables: a connector is
//! keyed by its type, an upload by the type of the uploaded file.

use datadrop_core::{ConnectorType, DatasetSource, FileFormat, FileType};

use FileFormat::{Csv, Excel, Json, Parquet};

/// Formats reachable from a connector.
pub const fn connector_formats(connector: ConnectorType) -> &'static [FileFormat] {
    match connector {
        ConnectorType::Api => &[Json, Csv],
        ConnectorType::Postgresql
        | ConnectorType::Mysql
        | ConnectorType::Sqlite
        | ConnectorType::Mssql => &[Csv, Json, Excel, Parquet],
        ConnectorType::Mongodb => &[Json, Csv],
        ConnectorType::S3 => &[Csv, Json, Parquet],
        ConnectorType::Other => &[],
    }
}

/// Formats reachable from an uploaded file.
pub const fn upload_formats(file_type: FileType) -> &'static [FileFormat] {
    match file_type {
        FileType::Csv => &[Csv, Json, Excel, Parquet],
        FileType::Json => &[Json, Csv],
        FileType::Excel => &[Excel, Csv, Json],
        FileType::Parquet => &[Parquet, Csv, Json],
        FileType::Other => &[],
    }
}

/// Formats reachable from any dataset source.
pub const fn supported_formats(source: &DatasetSource) -> &'static [FileFormat] {
    match *source {
        DatasetSource::Connector { connector_type } => connector_formats(connector_type),
        DatasetSource::Upload { file_type } => upload_formats(file_type),
    }
}
