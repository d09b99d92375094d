//! In-memory policy collaborators loaded from a JSON fixture.
//!
//! One struct implements the policy oracle, the dataset catalog and the subject
//! directory, so a single fixture describes a whole tenant setup:
//!
//! ```json
//! {
//!   "organizations": { "acme": { "max_file_size_mb": 100 } },
//!   "datasets": [ { "id": "ds-1", "name": "Orders", "organization_id": "acme",
//!                   "sharing_level": "organization",
//!                   "source": { "kind": "upload", "file_type": "csv" } } ],
//!   "subjects": [ { "id": "u-1", "organization_id": "acme", "role": "analyst" } ]
//! }
//! ```
//!
//! Organizations without an entry get [`OrgDownloadPolicy::default`].

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use datadrop_core::{
    AccessDecision, Dataset, DatasetCatalog, DatasetId, OrgDownloadPolicy, OrganizationId,
    PolicyError, PolicyOracle, Role, SharingLevel, Subject, SubjectDirectory, SubjectId,
};

#[derive(Debug, Default, Deserialize)]
struct PolicyFixture {
    #[serde(default)]
    organizations: HashMap<OrganizationId, OrgDownloadPolicy>,
    #[serde(default)]
    datasets: Vec<Dataset>,
    #[serde(default)]
    subjects: Vec<Subject>,
}

/// Fixture-backed oracle, catalog and directory.
#[derive(Debug, Default, Clone)]
pub struct StaticPolicyOracle {
    organizations: HashMap<OrganizationId, OrgDownloadPolicy>,
    datasets: HashMap<DatasetId, Dataset>,
    subjects: HashMap<SubjectId, Subject>,
}

impl StaticPolicyOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a fixture document.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let fixture: PolicyFixture = serde_json::from_str(json)
            .map_err(|e| PolicyError::Invalid(format!("policy fixture: {e}")))?;

        let mut oracle = Self {
            organizations: fixture.organizations,
            ..Self::default()
        };
        for dataset in fixture.datasets {
            oracle = oracle.with_dataset(dataset);
        }
        for subject in fixture.subjects {
            let Some(id) = subject.id.clone() else {
                return Err(PolicyError::Invalid(
                    "policy fixture: subjects need an id".to_string(),
                ));
            };
            oracle.subjects.insert(id, subject);
        }
        Ok(oracle)
    }

    /// Read and parse a fixture file.
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| PolicyError::Unavailable(format!("{}: {e}", path.display())))?;
        let oracle = Self::from_json(&json)?;
        tracing::info!(
            target: "datadrop.validation",
            path = %path.display(),
            datasets = oracle.datasets.len(),
            subjects = oracle.subjects.len(),
            organizations = oracle.organizations.len(),
            "loaded policy fixture"
        );
        Ok(oracle)
    }

    #[must_use]
    pub fn with_dataset(mut self, dataset: Dataset) -> Self {
        self.datasets.insert(dataset.id.clone(), dataset);
        self
    }

    /// Register a subject; anonymous subjects are ignored.
    #[must_use]
    pub fn with_subject(mut self, subject: Subject) -> Self {
        if let Some(id) = subject.id.clone() {
            self.subjects.insert(id, subject);
        }
        self
    }

    #[must_use]
    pub fn with_org_policy(
        mut self,
        organization_id: impl Into<OrganizationId>,
        policy: OrgDownloadPolicy,
    ) -> Self {
        self.organizations.insert(organization_id.into(), policy);
        self
    }

    fn policy_for(&self, organization_id: &OrganizationId) -> OrgDownloadPolicy {
        self.organizations
            .get(organization_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// Read access by sharing level.
///
/// Organization admins and the dataset owner can always read. Otherwise
/// `private` means owner only, `organization` any member of the dataset's
/// organization, and `department` members of the same department.
fn read_access(subject: &Subject, dataset: &Dataset) -> AccessDecision {
    let Some(subject_id) = &subject.id else {
        return AccessDecision::deny("anonymous callers have no read access");
    };
    let same_org = subject.belongs_to(&dataset.organization_id);
    if dataset.owner_id.as_ref() == Some(subject_id) || (same_org && subject.role == Role::Admin)
    {
        return AccessDecision::allow();
    }

    match dataset.sharing_level {
        SharingLevel::Private => AccessDecision::deny("dataset is private to its owner"),
        SharingLevel::Organization if same_org => AccessDecision::allow(),
        SharingLevel::Department if same_org => {
            match (&subject.department, &dataset.department) {
                (Some(mine), Some(theirs)) if mine == theirs => AccessDecision::allow(),
                _ => AccessDecision::deny("dataset is shared with another department"),
            }
        }
        SharingLevel::Organization | SharingLevel::Department => {
            AccessDecision::deny("dataset belongs to another organization")
        }
    }
}

fn download_permission(subject: &Subject, policy: &OrgDownloadPolicy) -> AccessDecision {
    if !policy.downloads_enabled {
        return AccessDecision::deny("downloads are disabled for this organization");
    }
    if !subject.download_enabled {
        return AccessDecision::deny("downloads are disabled for this account");
    }
    if policy.restricted_roles.contains(&subject.role) {
        return AccessDecision::deny(format!("role '{}' may not download", subject.role));
    }
    AccessDecision::allow()
}

#[async_trait]
impl PolicyOracle for StaticPolicyOracle {
    async fn can_access(
        &self,
        subject: &Subject,
        dataset: &Dataset,
    ) -> Result<AccessDecision, PolicyError> {
        Ok(read_access(subject, dataset))
    }

    async fn can_download(
        &self,
        subject: &Subject,
        dataset: &Dataset,
    ) -> Result<AccessDecision, PolicyError> {
        let policy = self.policy_for(&dataset.organization_id);
        Ok(download_permission(subject, &policy))
    }

    async fn org_download_policy(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<OrgDownloadPolicy, PolicyError> {
        Ok(self.policy_for(organization_id))
    }
}

#[async_trait]
impl DatasetCatalog for StaticPolicyOracle {
    async fn get_dataset(&self, id: &DatasetId) -> Result<Option<Dataset>, PolicyError> {
        Ok(self.datasets.get(id).cloned())
    }
}

#[async_trait]
impl SubjectDirectory for StaticPolicyOracle {
    async fn find_subject(&self, id: &SubjectId) -> Result<Option<Subject>, PolicyError> {
        Ok(self.subjects.get(id).cloned())
    }
}
