//! Collaborators that own datasets, subjects and organization policy.

use async_trait::async_trait;

use super::PolicyError;
use crate::domain::{Dataset, DatasetId, OrganizationId, Subject, SubjectId};
use crate::policy::{AccessDecision, OrgDownloadPolicy};

/// Permission oracle: answers who may read and download what.
#[async_trait]
pub trait PolicyOracle: Send + Sync {
    /// Read access per the dataset's sharing level and organization.
    async fn can_access(
        &self,
        subject: &Subject,
        dataset: &Dataset,
    ) -> Result<AccessDecision, PolicyError>;

    /// Download permission (per-user and per-role switches), independent of read access.
    async fn can_download(
        &self,
        subject: &Subject,
        dataset: &Dataset,
    ) -> Result<AccessDecision, PolicyError>;

    /// Download policy of an organization. Unknown organizations get the default policy.
    async fn org_download_policy(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<OrgDownloadPolicy, PolicyError>;
}

/// Dataset metadata lookup.
#[async_trait]
pub trait DatasetCatalog: Send + Sync {
    async fn get_dataset(&self, id: &DatasetId) -> Result<Option<Dataset>, PolicyError>;
}

/// Resolves caller identifiers to subjects.
#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    async fn find_subject(&self, id: &SubjectId) -> Result<Option<Subject>, PolicyError>;
}
