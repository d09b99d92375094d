//! Download handlers - initiation, streaming, progress and retry.

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_TYPE, RANGE, USER_AGENT};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::{Deserialize, Serialize};

use datadrop_core::{ClientMetadata, Compression, DatasetId, FileFormat, ProgressSnapshot};
use datadrop_download::{DownloadRequest, InitiatedDownload, RetryOutcome, TransferSession};

use crate::error::HttpError;
use crate::state::AppState;

/// Header carrying the caller's subject id.
pub const SUBJECT_HEADER: &str = "x-subject-id";

/// Request body for `POST /api/datasets/{dataset_id}/downloads`.
#[derive(Debug, Deserialize)]
pub struct InitiateDownloadRequest {
    pub format: FileFormat,
    #[serde(default)]
    pub compression: Option<Compression>,
}

/// Response for a newly initiated download.
#[derive(Debug, Serialize)]
pub struct InitiateDownloadResponse {
    #[serde(flatten)]
    pub download: InitiatedDownload,
    pub download_url: String,
    pub progress_url: String,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn client_metadata(headers: &HeaderMap) -> ClientMetadata {
    ClientMetadata {
        ip_address: header_str(headers, "x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(|ip| ip.trim().to_string()),
        user_agent: header_str(headers, USER_AGENT.as_str()).map(str::to_string),
    }
}

/// MIME type for a served artifact, from its filename.
fn content_type_for(filename: &str) -> &'static str {
    let lower = filename.to_ascii_lowercase();
    let Some((_, ext)) = lower.rsplit_once('.') else {
        return "application/octet-stream";
    };
    match ext {
        "csv" => "text/csv; charset=utf-8",
        "json" => "application/json",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "parquet" => "application/vnd.apache.parquet",
        "gz" => "application/gzip",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Validate a download request and mint its token.
pub async fn initiate(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<InitiateDownloadRequest>,
) -> Result<(StatusCode, Json<InitiateDownloadResponse>), HttpError> {
    if headers.get(SUBJECT_HEADER).is_some_and(|v| v.to_str().is_err()) {
        return Err(HttpError::BadRequest(format!("{SUBJECT_HEADER} must be valid UTF-8")));
    }
    let subject = state
        .downloads
        .resolve_subject(header_str(&headers, SUBJECT_HEADER))
        .await?;

    let request = DownloadRequest {
        dataset_id: DatasetId::new(dataset_id),
        subject,
        format: req.format,
        compression: req.compression,
    };
    let download = state
        .downloads
        .initiate(request, client_metadata(&headers))
        .await?;

    let download_url = format!("/api/downloads/{}", download.token);
    let progress_url = format!("{download_url}/progress");
    Ok((
        StatusCode::CREATED,
        Json(InitiateDownloadResponse {
            download,
            download_url,
            progress_url,
        }),
    ))
}

/// Stream the artifact behind a token, honoring `Range`.
pub async fn execute(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let range = header_str(&headers, RANGE.as_str());
    let TransferSession { meta, body, handle } = state
        .downloads
        .execute(&token, range, client_metadata(&headers))
        .await
        .map_err(|e| HttpError::for_token(e, &token))?;
    // The worker persists its own outcome.
    drop(handle);

    let status = if meta.range.partial {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let mut builder = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type_for(&meta.filename));
    for (name, value) in meta.headers() {
        builder = builder.header(name, value);
    }

    builder
        .body(Body::from_stream(body))
        .map_err(|e| HttpError::Internal(format!("response headers: {e}")))
}

/// Current progress of a download.
pub async fn progress(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ProgressSnapshot>, HttpError> {
    Ok(Json(state.downloads.progress(&token).await?))
}

/// Reopen an interrupted or failed download.
pub async fn retry(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<RetryOutcome>, HttpError> {
    Ok(Json(state.downloads.retry(&token).await?))
}
