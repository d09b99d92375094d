//! Validation pipeline scenarios through the service facade.

mod common;

use chrono::Duration;

use datadrop_core::{
    ClientMetadata, Compression, ConnectorType, DatasetSource, DownloadError, FileFormat,
    OrgDownloadPolicy, RateLimits, RateWindow, Role, SharingLevel, Subject,
};
use datadrop_download::StaticPolicyOracle;

use common::{Harness, ORG, analyst, csv_dataset, request};

const MB: u64 = 1024 * 1024;

#[tokio::test]
async fn oversized_dataset_is_rejected_with_size_details() {
    let oracle = StaticPolicyOracle::new()
        .with_dataset(csv_dataset("ds-big", "big.csv", 500 * MB))
        .with_org_policy(
            ORG,
            OrgDownloadPolicy {
                max_file_size_mb: 100,
                ..OrgDownloadPolicy::default()
            },
        );
    let h = Harness::new(oracle, &[]).await;

    let err = h
        .service
        .initiate(request("ds-big", analyst(), FileFormat::Csv), ClientMetadata::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FILE_SIZE_EXCEEDED");
    let details = err.details();
    let size_mb = details["file_size_mb"].as_f64().unwrap();
    assert!((size_mb - 500.0).abs() < 0.01);
    assert_eq!(details["max_allowed_mb"], 100);
    assert!(!err.suggestions().is_empty());
}

#[tokio::test]
async fn api_connector_cannot_produce_excel() {
    let mut dataset = csv_dataset("ds-api", "feed.json", 10);
    dataset.source = DatasetSource::Connector {
        connector_type: ConnectorType::Api,
    };
    let h = Harness::new(StaticPolicyOracle::new().with_dataset(dataset), &[]).await;

    let err = h
        .service
        .initiate(request("ds-api", analyst(), FileFormat::Excel), ClientMetadata::default())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DownloadError::InvalidFileFormat {
            requested: FileFormat::Excel,
            origin: "connector:api".into(),
            supported: vec![FileFormat::Json, FileFormat::Csv],
        }
    );
}

#[tokio::test]
async fn fifty_first_download_in_an_hour_is_rate_limited() {
    let oracle = StaticPolicyOracle::new()
        .with_dataset(csv_dataset("ds-1", "a.csv", 10))
        .with_org_policy(
            ORG,
            OrgDownloadPolicy {
                rate_limits: RateLimits {
                    hourly: 50,
                    daily: 1_000,
                },
                ..OrgDownloadPolicy::default()
            },
        );
    let h = Harness::new(oracle, &[]).await;

    for _ in 0..50 {
        h.initiate(request("ds-1", analyst(), FileFormat::Csv)).await;
    }
    let err = h
        .service
        .initiate(request("ds-1", analyst(), FileFormat::Csv), ClientMetadata::default())
        .await
        .unwrap_err();
    let DownloadError::RateLimitExceeded {
        window,
        limit,
        used,
        retry_after_secs,
    } = err
    else {
        panic!("expected RateLimitExceeded, got {err:?}");
    };
    assert_eq!(window, RateWindow::Hour);
    assert_eq!((limit, used), (50, 50));
    // 10:15 -> 11:00
    assert_eq!(retry_after_secs, 45 * 60);

    // Another subject has its own bucket.
    let peer = Subject::member("u-peer", ORG, Role::Analyst);
    h.initiate(request("ds-1", peer, FileFormat::Csv)).await;

    h.clock.advance(Duration::seconds(i64::try_from(retry_after_secs).unwrap()));
    h.initiate(request("ds-1", analyst(), FileFormat::Csv)).await;
}

#[tokio::test]
async fn access_denial_does_not_depend_on_download_flags() {
    let oracle = StaticPolicyOracle::new().with_dataset(csv_dataset("ds-1", "a.csv", 10));
    let h = Harness::new(oracle, &[]).await;

    // Outsider with every download switch on: no read access.
    let outsider = Subject::member("u-x", "globex", Role::Admin);
    let err = h
        .service
        .initiate(request("ds-1", outsider, FileFormat::Csv), ClientMetadata::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ACCESS_DENIED");
    assert_eq!(
        err.details()["sharing_level"],
        serde_json::json!(SharingLevel::Organization)
    );

    // Insider with downloads switched off: read access, no download.
    let muted = analyst().with_download_enabled(false);
    let err = h
        .service
        .initiate(request("ds-1", muted, FileFormat::Csv), ClientMetadata::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DOWNLOAD_PERMISSION_DENIED");

    // Outsider with downloads switched off: still an access problem first.
    let muted_outsider = Subject::member("u-y", "globex", Role::Viewer).with_download_enabled(false);
    let err = h
        .service
        .initiate(
            request("ds-1", muted_outsider, FileFormat::Csv),
            ClientMetadata::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ACCESS_DENIED");
}

#[tokio::test]
async fn deleted_and_inactive_datasets_are_rejected_in_order() {
    let mut deleted = csv_dataset("ds-del", "a.csv", 10);
    deleted.deleted_at = Some(common::t0() - Duration::days(1));
    deleted.is_active = false;
    let mut inactive = csv_dataset("ds-off", "a.csv", 10);
    inactive.is_active = false;
    let oracle = StaticPolicyOracle::new()
        .with_dataset(deleted)
        .with_dataset(inactive);
    let h = Harness::new(oracle, &[]).await;

    let code = |id: &'static str| {
        let service = &h.service;
        async move {
            service
                .initiate(request(id, analyst(), FileFormat::Csv), ClientMetadata::default())
                .await
                .unwrap_err()
                .code()
        }
    };
    assert_eq!(code("ds-nope").await, "DATASET_NOT_FOUND");
    assert_eq!(code("ds-del").await, "DATASET_DELETED");
    assert_eq!(code("ds-off").await, "DATASET_INACTIVE");
}

#[tokio::test]
async fn compression_must_be_allowed_by_the_organization() {
    let oracle = StaticPolicyOracle::new().with_dataset(csv_dataset("ds-1", "a.csv", 10));
    let h = Harness::new(oracle, &[]).await;

    let mut req = request("ds-1", analyst(), FileFormat::Csv);
    req.compression = Some(Compression::Bzip2);
    let err = h
        .service
        .initiate(req.clone(), ClientMetadata::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_COMPRESSION");

    req.compression = Some(Compression::Gzip);
    let initiated = h.service.initiate(req, ClientMetadata::default()).await.unwrap();
    assert_eq!(initiated.compression, Some(Compression::Gzip));
    assert_eq!(initiated.estimated_size_bytes, Some(10));
    assert_eq!(initiated.expires_at, common::t0() + Duration::hours(24));
    assert!(h.service.is_token_valid(&initiated.token));
}

#[tokio::test]
async fn unknown_subject_ids_resolve_to_anonymous() {
    let oracle = StaticPolicyOracle::new().with_subject(analyst());
    let h = Harness::new(oracle, &[]).await;

    assert_eq!(
        h.service.resolve_subject(Some("u-analyst")).await.unwrap(),
        analyst()
    );
    assert!(h.service.resolve_subject(Some("ghost")).await.unwrap().is_anonymous());
    assert!(h.service.resolve_subject(None).await.unwrap().is_anonymous());
    assert!(h.service.resolve_subject(Some("  ")).await.unwrap().is_anonymous());
}
