//! End-to-end transfer lifecycle against SQLite and a temp artifact directory.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use futures_util::{StreamExt, stream};

use datadrop_core::{
    ArtifactChunks, ArtifactError, ArtifactMeta, ArtifactStore, ClientMetadata, DownloadError,
    DownloadStatus, FileFormat, TransientKind,
};
use datadrop_download::{LocalArtifactStore, StaticPolicyOracle, TransferOutcome};

use common::{Harness, analyst, artifact_bytes, csv_dataset, drain, request, settings};

const SIZE: usize = 160;

async fn harness() -> (Harness, Vec<u8>) {
    let content = artifact_bytes(SIZE);
    let oracle = StaticPolicyOracle::new()
        .with_dataset(csv_dataset("ds-orders", "exports/orders.csv", SIZE as u64))
        .with_dataset(csv_dataset("ds-missing", "exports/gone.csv", SIZE as u64));
    let harness = Harness::new(oracle, &[("exports/orders.csv", content.as_slice())]).await;
    (harness, content)
}

#[tokio::test]
async fn full_download_completes_and_reports_100_percent() {
    let (h, content) = harness().await;
    let token = h.initiate(request("ds-orders", analyst(), FileFormat::Csv)).await;

    let before = h.service.progress(&token).await.unwrap();
    assert_eq!(before.status, DownloadStatus::Pending);
    assert_eq!(before.progress_percentage, 0.0);

    let mut session = h.execute(&token, None).await;
    assert!(!session.meta.range.partial);
    let headers = session.meta.headers();
    assert!(headers.contains(&("Accept-Ranges", "bytes".to_string())));
    assert!(headers.contains(&(
        "Content-Disposition",
        "attachment; filename=\"Quarterly Orders.csv\"".to_string()
    )));

    let (body, errored) = drain(&mut session).await;
    assert!(!errored);
    assert_eq!(body, content);
    assert_eq!(
        session.handle.finished().await,
        TransferOutcome::Completed {
            bytes_served: SIZE as u64
        }
    );

    let done = h.service.progress(&token).await.unwrap();
    assert_eq!(done.status, DownloadStatus::Completed);
    assert_eq!(done.progress_percentage, 100.0);
    assert_eq!(done.bytes_transferred, SIZE as u64);
    assert!(done.retry_endpoint.is_none());
    assert!(!done.is_resumable);
}

#[tokio::test]
async fn progress_is_monotonic_and_bounded() {
    let (h, _) = harness().await;
    let token = h.initiate(request("ds-orders", analyst(), FileFormat::Csv)).await;
    let mut session = h.execute(&token, None).await;

    let mut last = -1.0_f64;
    while let Some(chunk) = session.body.next().await {
        chunk.unwrap();
        let snapshot = h.service.progress(&token).await.unwrap();
        assert!(snapshot.progress_percentage >= last);
        assert!(snapshot.bytes_transferred <= SIZE as u64);
        last = snapshot.progress_percentage;
    }
    session.handle.finished().await;
    let done = h.service.progress(&token).await.unwrap();
    assert_eq!(done.progress_percentage, 100.0);
}

#[tokio::test]
async fn completed_downloads_are_not_served_again() {
    let (h, _) = harness().await;
    let token = h.initiate(request("ds-orders", analyst(), FileFormat::Csv)).await;
    let mut session = h.execute(&token, None).await;
    drain(&mut session).await;
    session.handle.finished().await;

    let err = h
        .service
        .execute(&token, None, ClientMetadata::default())
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), "DOWNLOAD_ALREADY_COMPLETED");
    assert_eq!(
        h.service.retry(&token).await.unwrap_err().code(),
        "DOWNLOAD_NOT_RETRYABLE"
    );
}

#[tokio::test]
async fn concurrent_stream_on_one_token_is_rejected() {
    let (h, _) = harness().await;
    let token = h.initiate(request("ds-orders", analyst(), FileFormat::Csv)).await;

    let first = h.execute(&token, None).await;
    let second = h
        .service
        .execute(&token, None, ClientMetadata::default())
        .await
        .err()
        .unwrap();
    assert_eq!(second, DownloadError::TransferInProgress);
    drop(first);
}

#[tokio::test]
async fn interrupted_download_resumes_from_its_offset() {
    let (h, content) = harness().await;
    let token = h.initiate(request("ds-orders", analyst(), FileFormat::Csv)).await;

    // Read two chunks, then walk away.
    let mut session = h.execute(&token, None).await;
    for _ in 0..2 {
        session.body.next().await.unwrap().unwrap();
    }
    let handle = session.handle;
    drop(session.body);
    let TransferOutcome::Interrupted { offset, kind } = handle.finished().await else {
        panic!("expected an interrupted transfer");
    };
    assert_eq!(kind, TransientKind::ClientDisconnected);
    assert!(offset >= 32 && offset < SIZE as u64);

    let interrupted = h.service.progress(&token).await.unwrap();
    assert_eq!(interrupted.status, DownloadStatus::Interrupted);
    assert_eq!(interrupted.bytes_transferred, offset);
    assert!(interrupted.is_resumable);
    assert_eq!(interrupted.error_code.as_deref(), Some("NETWORK_INTERRUPTED"));
    assert_eq!(
        interrupted.retry_endpoint,
        Some(format!("/api/downloads/{token}/retry"))
    );

    let retried = h.service.retry(&token).await.unwrap();
    assert_eq!(retried.status, DownloadStatus::Pending);
    assert!(retried.retryable);
    assert_eq!(retried.resume_offset, offset);

    let range = format!("bytes={offset}-");
    let mut resumed = h.execute(&token, Some(&range)).await;
    assert!(resumed.meta.range.partial);
    assert_eq!(
        resumed.meta.range.content_range(),
        Some(format!("bytes {offset}-{}/{SIZE}", SIZE - 1))
    );
    let (rest, errored) = drain(&mut resumed).await;
    assert!(!errored);
    assert_eq!(rest, content[offset as usize..]);
    assert_eq!(
        resumed.handle.finished().await,
        TransferOutcome::Completed {
            bytes_served: SIZE as u64 - offset
        }
    );

    let done = h.service.progress(&token).await.unwrap();
    assert_eq!(done.status, DownloadStatus::Completed);
    assert_eq!(done.attempt_count, 2);
}

#[tokio::test]
async fn stalled_reader_is_interrupted_by_the_idle_timeout() {
    let content = artifact_bytes(SIZE);
    let oracle = StaticPolicyOracle::new()
        .with_dataset(csv_dataset("ds-orders", "exports/orders.csv", SIZE as u64));
    let h = Harness::with_store(
        oracle,
        &[("exports/orders.csv", content.as_slice())],
        settings().with_idle_timeout(std::time::Duration::from_secs(1)),
        |dir| Arc::new(LocalArtifactStore::new(dir.path(), 16)) as Arc<dyn ArtifactStore>,
    )
    .await;
    let token = h.initiate(request("ds-orders", analyst(), FileFormat::Csv)).await;

    // Read one chunk, then keep the connection open without reading.
    let mut session = h.execute(&token, None).await;
    session.body.next().await.unwrap().unwrap();
    let TransferOutcome::Interrupted { offset, kind } = session.handle.finished().await else {
        panic!("expected an interrupted transfer");
    };
    assert_eq!(kind, TransientKind::TimedOut);
    assert!(offset >= 16 && offset < SIZE as u64);

    let stalled = h.service.progress(&token).await.unwrap();
    assert_eq!(stalled.status, DownloadStatus::Interrupted);
    assert_eq!(stalled.bytes_transferred, offset);
    assert!(stalled.is_resumable);
    assert_eq!(stalled.error_code.as_deref(), Some("NETWORK_INTERRUPTED"));
    drop(session.body);
}

#[tokio::test]
async fn interrupted_download_can_resume_without_retry() {
    let (h, content) = harness().await;
    let token = h.initiate(request("ds-orders", analyst(), FileFormat::Csv)).await;

    let mut session = h.execute(&token, None).await;
    session.body.next().await.unwrap().unwrap();
    let handle = session.handle;
    drop(session.body);
    let TransferOutcome::Interrupted { offset, .. } = handle.finished().await else {
        panic!("expected an interrupted transfer");
    };

    let range = format!("bytes={offset}-");
    let mut resumed = h.execute(&token, Some(&range)).await;
    let (rest, _) = drain(&mut resumed).await;
    assert_eq!(rest, content[offset as usize..]);
    resumed.handle.finished().await;
}

#[tokio::test]
async fn unusable_range_serves_the_whole_artifact() {
    let (h, content) = harness().await;
    let token = h.initiate(request("ds-orders", analyst(), FileFormat::Csv)).await;

    let mut session = h.execute(&token, Some("bytes=0-9")).await;
    assert!(!session.meta.range.partial);
    let (body, _) = drain(&mut session).await;
    assert_eq!(body, content);
    session.handle.finished().await;
}

#[tokio::test]
async fn expired_window_refuses_service_until_retried() {
    let (h, content) = harness().await;
    let token = h.initiate(request("ds-orders", analyst(), FileFormat::Csv)).await;

    h.clock.advance(Duration::hours(25));
    let err = h
        .service
        .execute(&token, None, ClientMetadata::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, DownloadError::TokenExpired { .. }));

    let expired = h.service.progress(&token).await.unwrap();
    assert_eq!(expired.status, DownloadStatus::Expired);
    assert_eq!(expired.error_code.as_deref(), Some("TOKEN_EXPIRED"));
    assert!(expired.retry_endpoint.is_some());

    let retried = h.service.retry(&token).await.unwrap();
    assert_eq!(retried.status, DownloadStatus::Pending);
    let mut session = h.execute(&token, None).await;
    let (body, _) = drain(&mut session).await;
    assert_eq!(body, content);
}

#[tokio::test]
async fn tokens_past_their_signed_lifetime_serve_nothing() {
    let (h, _) = harness().await;
    let token = h.initiate(request("ds-orders", analyst(), FileFormat::Csv)).await;

    // Default hard lifetime is seven days.
    h.clock.advance(Duration::days(8));
    assert!(!h.service.is_token_valid(&token));
    assert!(matches!(
        h.service
            .execute(&token, None, ClientMetadata::default())
            .await
            .err(),
        Some(DownloadError::TokenExpired { .. })
    ));
    assert!(matches!(
        h.service.retry(&token).await,
        Err(DownloadError::TokenExpired { .. })
    ));
    // The outcome can still be looked up.
    assert_eq!(
        h.service.progress(&token).await.unwrap().status,
        DownloadStatus::Expired
    );
}

#[tokio::test]
async fn missing_artifact_fails_with_storage_error_and_restarts_clean() {
    let (h, _) = harness().await;
    let token = h.initiate(request("ds-missing", analyst(), FileFormat::Csv)).await;

    let err = h
        .service
        .execute(&token, None, ClientMetadata::default())
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), "STORAGE_ERROR");
    assert!(err.is_recoverable());

    let failed = h.service.progress(&token).await.unwrap();
    assert_eq!(failed.status, DownloadStatus::Failed);
    assert_eq!(failed.error_code.as_deref(), Some("STORAGE_ERROR"));
    assert!(failed.retry_endpoint.is_some());

    let err = h
        .service
        .execute(&token, None, ClientMetadata::default())
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), "DOWNLOAD_FAILED");

    let retried = h.service.retry(&token).await.unwrap();
    assert_eq!(retried.status, DownloadStatus::Pending);
    assert_eq!(retried.resume_offset, 0);
    assert!(!retried.retryable);
}

#[tokio::test]
async fn unknown_or_forged_tokens_are_not_found() {
    let (h, _) = harness().await;
    assert_eq!(
        h.service.progress("not-a-token").await.unwrap_err(),
        DownloadError::DownloadNotFound
    );

    let token = h.initiate(request("ds-orders", analyst(), FileFormat::Csv)).await;
    let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
    let flipped = if parts[2].starts_with('A') { "B" } else { "A" };
    parts[2].replace_range(..1, flipped);
    let forged = parts.join(".");
    assert_eq!(
        h.service.progress(&forged).await.unwrap_err(),
        DownloadError::DownloadNotFound
    );
    assert!(matches!(
        h.service
            .execute(&forged, None, ClientMetadata::default())
            .await
            .err(),
        Some(DownloadError::TokenInvalid { .. })
    ));
}

#[tokio::test]
async fn shutdown_interrupts_active_transfers() {
    let (h, _) = harness().await;
    let token = h.initiate(request("ds-orders", analyst(), FileFormat::Csv)).await;

    let session = h.execute(&token, None).await;
    assert_eq!(h.service.active_transfers(), 1);
    h.service.shutdown().await;

    let TransferOutcome::Interrupted { kind, .. } = session.handle.finished().await else {
        panic!("expected an interrupted transfer");
    };
    assert_eq!(kind, TransientKind::Cancelled);
    assert_eq!(
        h.service.progress(&token).await.unwrap().status,
        DownloadStatus::Interrupted
    );
}

#[tokio::test]
async fn sweep_expires_abandoned_records() {
    let (h, _) = harness().await;
    let token = h.initiate(request("ds-orders", analyst(), FileFormat::Csv)).await;

    assert_eq!(h.service.sweep().await.unwrap().expired, 0);
    h.clock.advance(Duration::hours(24));
    let report = h.service.sweep().await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(
        h.service.progress(&token).await.unwrap().status,
        DownloadStatus::Expired
    );
}

/// Store whose artifact is shorter than it claims.
struct ShortStore;

#[async_trait]
impl ArtifactStore for ShortStore {
    async fn stat(&self, _path: &str) -> Result<ArtifactMeta, ArtifactError> {
        Ok(ArtifactMeta { size: 100 })
    }

    async fn open_for_read(&self, _path: &str, _offset: u64) -> Result<ArtifactChunks, ArtifactError> {
        let chunks: Vec<Result<Bytes, ArtifactError>> = vec![
            Ok(Bytes::from_static(&[7; 30])),
            Ok(Bytes::from_static(&[8; 20])),
        ];
        Ok(Box::pin(stream::iter(chunks)))
    }
}

#[tokio::test]
async fn truncated_artifact_fails_as_corrupted_and_aborts_the_body() {
    let oracle =
        StaticPolicyOracle::new().with_dataset(csv_dataset("ds-short", "short.csv", 100));
    let h = Harness::with_store(oracle, &[], settings(), |_| Arc::new(ShortStore)).await;
    let token = h.initiate(request("ds-short", analyst(), FileFormat::Csv)).await;

    let mut session = h.execute(&token, None).await;
    let (body, errored) = drain(&mut session).await;
    assert_eq!(body.len(), 50);
    assert!(errored, "a short body must end with an error");
    assert_eq!(
        session.handle.finished().await,
        TransferOutcome::Failed {
            code: "FILE_CORRUPTED"
        }
    );

    let failed = h.service.progress(&token).await.unwrap();
    assert_eq!(failed.status, DownloadStatus::Failed);
    assert_eq!(failed.error_code.as_deref(), Some("FILE_CORRUPTED"));
}
