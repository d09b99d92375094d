//! Ordered validation of a download request.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. dataset exists
//! 2. dataset not soft-deleted
//! 3. dataset active
//! 4. read access per sharing level
//! 5. download permission (subject, role, organization switch)
//! 6. rate limits (peek)
//! 7. format reachable from the dataset's native representation
//! 8. size within the organization cap
//! 9. compression allowed
//!
//! When all pass, the request is counted against the rate limits with an
//! atomic check-and-increment. A failed check has no side effects besides the
//! audit log line.

mod compatibility;

use std::sync::Arc;

use datadrop_core::{
    Compression, Dataset, DatasetCatalog, DatasetId, DownloadError,
    DownloadResult, FileFormat, OrgDownloadPolicy, PolicyDecision, PolicyError, PolicyOracle,
    RateLimitKey, RateLimitStatus, RateWindow, Subject,
};

use crate::rate_limit::{RateLimitGrant, WindowedRateLimiter};

pub use compatibility::{connector_formats, supported_formats, upload_formats};

/// A caller's request to download a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub dataset_id: DatasetId,
    pub subject: Subject,
    pub format: FileFormat,
    pub compression: Option<Compression>,
}

/// Everything the caller needs after a request passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub dataset: Dataset,
    pub policy: OrgDownloadPolicy,
    pub decision: PolicyDecision,
    /// Rate-limit slot taken by this request; release it if the request is abandoned.
    pub grant: RateLimitGrant,
}

/// Runs the validation pipeline against the policy collaborators.
pub struct RequestValidator {
    catalog: Arc<dyn DatasetCatalog>,
    oracle: Arc<dyn PolicyOracle>,
    limiter: Arc<WindowedRateLimiter>,
}

impl RequestValidator {
    pub fn new(
        catalog: Arc<dyn DatasetCatalog>,
        oracle: Arc<dyn PolicyOracle>,
        limiter: Arc<WindowedRateLimiter>,
    ) -> Self {
        Self {
            catalog,
            oracle,
            limiter,
        }
    }

    /// Validate `request` and, on success, count it against the rate limits.
    pub async fn validate(&self, request: &DownloadRequest) -> DownloadResult<ValidatedRequest> {
        let result = self.run_checks(request).await;
        if let Err(err) = &result {
            tracing::info!(
                target: "datadrop.validation",
                dataset_id = %request.dataset_id,
                subject_id = request.subject.id.as_ref().map_or("anonymous", |s| s.as_str()),
                format = %request.format,
                code = err.code(),
                reason = %err,
                "download request rejected"
            );
        }
        result
    }

    async fn run_checks(&self, request: &DownloadRequest) -> DownloadResult<ValidatedRequest> {
        let subject = &request.subject;

        // 1-3: the dataset itself
        let dataset = self
            .catalog
            .get_dataset(&request.dataset_id)
            .await
            .map_err(oracle_failure)?
            .ok_or_else(|| DownloadError::DatasetNotFound {
                dataset_id: request.dataset_id.to_string(),
            })?;
        if let Some(deleted_at) = dataset.deleted_at {
            return Err(DownloadError::DatasetDeleted {
                dataset_id: dataset.id.to_string(),
                deleted_at,
            });
        }
        if !dataset.is_active {
            return Err(DownloadError::DatasetInactive {
                dataset_id: dataset.id.to_string(),
            });
        }

        // 4: read access
        let access = self
            .oracle
            .can_access(subject, &dataset)
            .await
            .map_err(oracle_failure)?;
        if !access.allowed {
            return Err(DownloadError::AccessDenied {
                dataset_id: dataset.id.to_string(),
                sharing_level: dataset.sharing_level,
                required_permission: dataset.sharing_level.required_permission().to_string(),
                reason: access.reason,
            });
        }

        // 5: download permission
        let download = self
            .oracle
            .can_download(subject, &dataset)
            .await
            .map_err(oracle_failure)?;
        if !download.allowed {
            return Err(DownloadError::DownloadPermissionDenied {
                dataset_id: dataset.id.to_string(),
                reason: download
                    .reason
                    .unwrap_or_else(|| "downloads are disabled".to_string()),
            });
        }

        let policy = self
            .oracle
            .org_download_policy(&dataset.organization_id)
            .await
            .map_err(oracle_failure)?;

        // 6: rate limits, without counting yet
        let rate_key = RateLimitKey::for_subject(subject, &dataset.organization_id);
        let usage = self.limiter.check(&rate_key, &policy.rate_limits);
        if !usage.allowed {
            return Err(rate_limited(&usage));
        }

        // 7: format
        let reachable = supported_formats(&dataset.source);
        let supported: Vec<FileFormat> = reachable
            .iter()
            .copied()
            .filter(|f| policy.allowed_formats.contains(f))
            .collect();
        if !supported.contains(&request.format) {
            return Err(DownloadError::InvalidFileFormat {
                requested: request.format,
                origin: dataset.source.describe(),
                supported,
            });
        }

        // 8: size
        if let Some(size) = dataset.size_bytes {
            if size > policy.max_size_bytes() {
                return Err(DownloadError::FileSizeExceeded {
                    file_size_bytes: size,
                    max_allowed_mb: policy.max_file_size_mb,
                });
            }
        }

        // 9: compression
        if let Some(compression) = request.compression {
            if !policy.allowed_compressions.contains(&compression) {
                return Err(DownloadError::InvalidCompression {
                    requested: compression,
                    allowed: policy.allowed_compressions.clone(),
                });
            }
        }

        // Commit; a concurrent request may have taken the last slot since step 6.
        let grant = self
            .limiter
            .try_acquire(&rate_key, &policy.rate_limits)
            .map_err(|status| rate_limited(&status))?;

        let decision = PolicyDecision {
            allowed: true,
            reason: None,
            max_size_bytes: policy.max_size_bytes(),
            allowed_formats: supported,
            allowed_compressions: policy.allowed_compressions.clone(),
            rate_limit: grant.status.clone(),
        };

        Ok(ValidatedRequest {
            dataset,
            policy,
            decision,
            grant,
        })
    }

    /// Give back the rate-limit slot of an abandoned request.
    pub fn release(&self, validated: &ValidatedRequest) {
        self.limiter.release(&validated.grant);
    }
}

fn oracle_failure(err: PolicyError) -> DownloadError {
    tracing::warn!(target: "datadrop.validation", error = %err, "policy collaborator failed");
    DownloadError::validation(err.to_string())
}

fn rate_limited(status: &RateLimitStatus) -> DownloadError {
    let window = status.exceeded.unwrap_or(RateWindow::Hour);
    DownloadError::RateLimitExceeded {
        window,
        limit: status.limits.limit_for(window).unwrap_or(0),
        used: status.used_in(window),
        retry_after_secs: status.retry_after_secs.unwrap_or(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use datadrop_core::{
        AccessDecision, ConnectorType, DatasetSource, FileType, ManualClock, OrganizationId,
        RateLimits, Role, SharingLevel,
    };
    use mockall::mock;

    mock! {
        pub Oracle {}

        #[async_trait]
        impl PolicyOracle for Oracle {
            async fn can_access(&self, subject: &Subject, dataset: &Dataset) -> Result<AccessDecision, PolicyError>;
            async fn can_download(&self, subject: &Subject, dataset: &Dataset) -> Result<AccessDecision, PolicyError>;
            async fn org_download_policy(&self, organization_id: &OrganizationId) -> Result<OrgDownloadPolicy, PolicyError>;
        }
    }

    mock! {
        pub Catalog {}

        #[async_trait]
        impl DatasetCatalog for Catalog {
            async fn get_dataset(&self, id: &DatasetId) -> Result<Option<Dataset>, PolicyError>;
        }
    }

    fn dataset() -> Dataset {
        Dataset {
            id: DatasetId::new("ds-1"),
            name: "Orders".into(),
            organization_id: OrganizationId::new("acme"),
            department: None,
            owner_id: None,
            sharing_level: SharingLevel::Organization,
            is_active: true,
            deleted_at: None,
            source: DatasetSource::Upload {
                file_type: FileType::Csv,
            },
            size_bytes: Some(1_024),
            artifact_path: Some("orders.csv".into()),
        }
    }

    fn request(format: FileFormat) -> DownloadRequest {
        DownloadRequest {
            dataset_id: DatasetId::new("ds-1"),
            subject: Subject::member("u-1", "acme", Role::Analyst),
            format,
            compression: None,
        }
    }

    fn catalog_with(dataset: Option<Dataset>) -> MockCatalog {
        let mut catalog = MockCatalog::new();
        catalog
            .expect_get_dataset()
            .returning(move |_| Ok(dataset.clone()));
        catalog
    }

    fn permissive_oracle(policy: OrgDownloadPolicy) -> MockOracle {
        let mut oracle = MockOracle::new();
        oracle
            .expect_can_access()
            .returning(|_, _| Ok(AccessDecision::allow()));
        oracle
            .expect_can_download()
            .returning(|_, _| Ok(AccessDecision::allow()));
        oracle
            .expect_org_download_policy()
            .returning(move |_| Ok(policy.clone()));
        oracle
    }

    fn limiter() -> Arc<WindowedRateLimiter> {
        Arc::new(WindowedRateLimiter::new(Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
        ))))
    }

    fn validator(catalog: MockCatalog, oracle: MockOracle) -> RequestValidator {
        RequestValidator::new(Arc::new(catalog), Arc::new(oracle), limiter())
    }

    #[tokio::test]
    async fn access_denied_short_circuits_later_checks() {
        let mut oracle = MockOracle::new();
        oracle
            .expect_can_access()
            .returning(|_, _| Ok(AccessDecision::deny("not a member")));
        oracle.expect_can_download().never();
        oracle.expect_org_download_policy().never();

        let err = validator(catalog_with(Some(dataset())), oracle)
            .validate(&request(FileFormat::Csv))
            .await
            .unwrap_err();
        match err {
            DownloadError::AccessDenied {
                required_permission,
                reason,
                ..
            } => {
                assert_eq!(required_permission, "member of the dataset's organization");
                assert_eq!(reason.as_deref(), Some("not a member"));
            }
            other => panic!("expected AccessDenied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn download_permission_is_checked_after_access() {
        let mut oracle = MockOracle::new();
        oracle
            .expect_can_access()
            .returning(|_, _| Ok(AccessDecision::allow()));
        oracle
            .expect_can_download()
            .returning(|_, _| Ok(AccessDecision::deny("role 'guest' may not download")));
        oracle.expect_org_download_policy().never();

        let err = validator(catalog_with(Some(dataset())), oracle)
            .validate(&request(FileFormat::Csv))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DOWNLOAD_PERMISSION_DENIED");
    }

    #[tokio::test]
    async fn dataset_state_is_checked_first() {
        let oracle = MockOracle::new();
        let err = validator(catalog_with(None), oracle)
            .validate(&request(FileFormat::Csv))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DATASET_NOT_FOUND");

        let mut deleted = dataset();
        deleted.deleted_at = Some(Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap());
        let err = validator(catalog_with(Some(deleted)), MockOracle::new())
            .validate(&request(FileFormat::Csv))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DATASET_DELETED");

        let mut inactive = dataset();
        inactive.is_active = false;
        let err = validator(catalog_with(Some(inactive)), MockOracle::new())
            .validate(&request(FileFormat::Csv))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DATASET_INACTIVE");
    }

    #[tokio::test]
    async fn org_format_allow_list_narrows_supported_formats() {
        let policy = OrgDownloadPolicy {
            allowed_formats: vec![FileFormat::Csv],
            ..OrgDownloadPolicy::default()
        };
        let err = validator(catalog_with(Some(dataset())), permissive_oracle(policy))
            .validate(&request(FileFormat::Parquet))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DownloadError::InvalidFileFormat {
                requested: FileFormat::Parquet,
                origin: "upload:csv".into(),
                supported: vec![FileFormat::Csv],
            }
        );
    }

    #[tokio::test]
    async fn connector_source_uses_connector_table() {
        let mut mongo = dataset();
        mongo.source = DatasetSource::Connector {
            connector_type: ConnectorType::Mongodb,
        };
        let validator = validator(
            catalog_with(Some(mongo)),
            permissive_oracle(OrgDownloadPolicy::default()),
        );
        assert!(validator.validate(&request(FileFormat::Json)).await.is_ok());
        assert_eq!(
            validator
                .validate(&request(FileFormat::Parquet))
                .await
                .unwrap_err()
                .code(),
            "INVALID_FILE_FORMAT"
        );
    }

    #[tokio::test]
    async fn disallowed_compression_is_rejected() {
        let mut req = request(FileFormat::Csv);
        req.compression = Some(Compression::Bzip2);
        let err = validator(
            catalog_with(Some(dataset())),
            permissive_oracle(OrgDownloadPolicy::default()),
        )
        .validate(&req)
        .await
        .unwrap_err();
        assert_eq!(
            err,
            DownloadError::InvalidCompression {
                requested: Compression::Bzip2,
                allowed: vec![Compression::Zip, Compression::Gzip],
            }
        );
    }

    #[tokio::test]
    async fn oracle_failures_become_validation_errors() {
        let mut oracle = MockOracle::new();
        oracle
            .expect_can_access()
            .returning(|_, _| Err(PolicyError::Unavailable("directory offline".into())));

        let err = validator(catalog_with(Some(dataset())), oracle)
            .validate(&request(FileFormat::Csv))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn failed_checks_do_not_consume_rate_limit() {
        let policy = OrgDownloadPolicy {
            rate_limits: RateLimits {
                hourly: 1,
                daily: 10,
            },
            ..OrgDownloadPolicy::default()
        };
        let validator = validator(catalog_with(Some(dataset())), permissive_oracle(policy));

        // Wrong format fails after the peek but before the commit.
        let mut bad = request(FileFormat::Csv);
        bad.compression = Some(Compression::Bzip2);
        assert!(validator.validate(&bad).await.is_err());

        let ok = validator.validate(&request(FileFormat::Csv)).await.unwrap();
        assert_eq!(ok.decision.rate_limit.hourly_used, 1);

        let err = validator
            .validate(&request(FileFormat::Csv))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DownloadError::RateLimitExceeded {
                window: RateWindow::Hour,
                limit: 1,
                used: 1,
                ..
            }
        ));

        validator.release(&ok);
        assert!(validator.validate(&request(FileFormat::Csv)).await.is_ok());
    }
}
