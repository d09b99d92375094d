//! `SQLite` persistence for datadrop download records.
//!
//! The pool is created by [`setup_database`] (or [`setup_test_database`] in
//! tests) and handed to [`CoreFactory`], which wraps repositories behind the
//! port traits from `datadrop-core`. No `sqlx` type ever leaves this crate
//! through a trait signature.

#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

// Linked for the bundled SQLite build only.
use libsqlite3_sys as _;
#[cfg(test)]
use tempfile as _;

pub mod factory;
pub mod repositories;
pub mod setup;

// Re-export factory for convenient access
pub use factory::CoreFactory;

// Re-export repository implementations
pub use repositories::SqliteDownloadRecordRepository;

// Re-export setup functions for convenient access
pub use setup::setup_database;
#[cfg(any(test, feature = "test-utils"))]
pub use setup::setup_test_database;
