//! The caller on whose behalf a download is requested.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{OrganizationId, SubjectId};

/// Organization role of a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Analyst,
    Viewer,
    Guest,
}

impl Role {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Analyst => "analyst",
            Self::Viewer => "viewer",
            Self::Guest => "guest",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved caller.
///
/// `id` is `None` for anonymous callers; such subjects carry no organization
/// membership unless a collaborator attaches one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    #[serde(default)]
    pub id: Option<SubjectId>,
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
    #[serde(default)]
    pub department: Option<String>,
    pub role: Role,
    /// Per-user download switch managed by administrators.
    #[serde(default = "default_true")]
    pub download_enabled: bool,
}

const fn default_true() -> bool {
    true
}

impl Subject {
    /// A known member of an organization.
    pub fn member(
        id: impl Into<SubjectId>,
        organization_id: impl Into<OrganizationId>,
        role: Role,
    ) -> Self {
        Self {
            id: Some(id.into()),
            organization_id: Some(organization_id.into()),
            department: None,
            role,
            download_enabled: true,
        }
    }

    /// An unauthenticated caller.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self {
            id: None,
            organization_id: None,
            department: None,
            role: Role::Guest,
            download_enabled: true,
        }
    }

    #[must_use]
    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    #[must_use]
    pub const fn with_download_enabled(mut self, enabled: bool) -> Self {
        self.download_enabled = enabled;
        self
    }

    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        self.id.is_none()
    }

    /// Whether the subject belongs to the given organization.
    #[must_use]
    pub fn belongs_to(&self, organization_id: &OrganizationId) -> bool {
        self.organization_id.as_ref() == Some(organization_id)
    }
}
