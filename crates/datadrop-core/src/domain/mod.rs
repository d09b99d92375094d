//! Domain types for datasets, subjects and transfer selectors.
//!
//! These are read-only views of entities owned by external collaborators
//! (catalog, directory, policy oracle). The download subsystem never mutates them.

mod dataset;
mod format;
mod subject;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use dataset::{ConnectorType, Dataset, DatasetSource, FileType, SharingLevel};
pub use format::{Compression, FileFormat};
pub use subject::{Role, Subject};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of a dataset in the external catalog.
    DatasetId
);
string_id!(
    /// Identifier of a user or service account.
    SubjectId
);
string_id!(
    /// Identifier of an organization (tenant).
    OrganizationId
);
