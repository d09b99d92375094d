//! `Content-Disposition` filenames.
//!
//! The filename is the dataset's display name plus the extension of the stored
//! artifact, which may differ from the requested format (an artifact stored as
//! `orders.csv.gz` is served as `Orders.csv.gz`). Names that already carry the
//! extension are not suffixed twice.

use datadrop_core::FileFormat;

const DATA_EXTENSIONS: [&str; 6] = ["csv", "json", "xlsx", "xls", "parquet", "txt"];
const COMPRESSION_EXTENSIONS: [&str; 4] = ["gz", "zip", "bz2", "tgz"];

/// Extension of the stored artifact, including a compression suffix.
///
/// Falls back to the format's default extension when the artifact path has
/// none we recognise.
pub fn artifact_extension(artifact_path: &str, format: FileFormat) -> String {
    let file_name = artifact_path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(artifact_path)
        .to_ascii_lowercase();
    let mut parts = file_name.split('.').skip(1).collect::<Vec<_>>();

    let compression = match parts.last() {
        Some(ext) if COMPRESSION_EXTENSIONS.contains(ext) => parts.pop(),
        _ => None,
    };
    let data = match parts.last() {
        Some(ext) if DATA_EXTENSIONS.contains(ext) => Some((*ext).to_string()),
        _ => None,
    };

    match (data, compression) {
        (Some(data), Some(compression)) => format!("{data}.{compression}"),
        (Some(data), None) => data,
        (None, Some(compression)) => compression.to_string(),
        (None, None) => format.extension().to_string(),
    }
}

/// Filename offered to the client.
pub fn download_filename(dataset_name: &str, artifact_path: &str, format: FileFormat) -> String {
    let extension = artifact_extension(artifact_path, format);
    let mut stem = sanitize(dataset_name);
    if stem.is_empty() {
        stem = "download".to_string();
    }

    let suffix = format!(".{extension}");
    if stem.to_ascii_lowercase().ends_with(&suffix) {
        return stem;
    }
    // "orders.csv" + "csv.gz" -> "orders.csv.gz", not "orders.csv.csv.gz"
    if let Some((data, _)) = extension.split_once('.') {
        let data_suffix = format!(".{data}");
        if stem.to_ascii_lowercase().ends_with(&data_suffix) {
            stem.truncate(stem.len() - data_suffix.len());
        }
    }
    format!("{stem}{suffix}")
}

/// `Content-Disposition` header value for `filename`.
pub fn content_disposition(filename: &str) -> String {
    format!("attachment; filename=\"{filename}\"")
}

/// Keep characters that are safe inside a quoted header parameter.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | '(' | ')') {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_extension_beats_logical_format() {
        assert_eq!(artifact_extension("exports/orders.parquet", FileFormat::Csv), "parquet");
        assert_eq!(artifact_extension("exports/orders.CSV.GZ", FileFormat::Csv), "csv.gz");
        assert_eq!(artifact_extension("exports/blob", FileFormat::Excel), "xlsx");
        assert_eq!(artifact_extension("exports/v1.2/blob.zip", FileFormat::Json), "zip");
    }

    #[test]
    fn filenames_avoid_double_extensions() {
        assert_eq!(
            download_filename("Orders 2024", "a/orders.csv", FileFormat::Csv),
            "Orders 2024.csv"
        );
        assert_eq!(
            download_filename("orders.csv", "a/orders.csv", FileFormat::Csv),
            "orders.csv"
        );
        assert_eq!(
            download_filename("orders.csv", "a/orders.csv.gz", FileFormat::Csv),
            "orders.csv.gz"
        );
    }

    #[test]
    fn unsafe_characters_are_replaced() {
        assert_eq!(
            download_filename("Q3 \"final\"/v2", "x.json", FileFormat::Json),
            "Q3 _final__v2.json"
        );
        assert_eq!(download_filename("...", "x.json", FileFormat::Json), "download.json");
        assert_eq!(
            content_disposition("a.csv"),
            "attachment; filename=\"a.csv\""
        );
    }
}
