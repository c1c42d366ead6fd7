//! # contract: collaborator interfaces for the rebuild workflow
//!
//! This module defines the traits the rebuild orchestration depends on, and the
//! plain data types passed across them:
//!
//! - [`ObjectStore`]: list/get/put/delete objects in a bucket (S3 in production).
//! - [`IndexBuilder`]: regenerates repository metadata for a local directory (`createrepo`).
//! - [`LocalRepository`]: queries and mutates a staged, on-disk yum repository.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`, so tests and downstream crates can build
//!   deterministic mocks (exported with the `test-export-mocks` feature).
//!
//! ## Error Types
//! - Store implementations return boxed errors ([`StoreError`]); the workflow wraps them
//!   with the operation and key that failed.
//! - Local repository operations return [`RebuildError`] directly.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::error::RebuildError;

/// Error type for object store operations (simple boxed error).
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ObjectSummary {
    /// Full store key (bucket-relative path, `/`-separated).
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// Trait for talking to the object store holding the canonical repository.
///
/// Implementations own transport, authentication and whatever timeout/retry policy
/// they apply. The workflow treats every returned error as fatal for the current phase,
/// except during cleanup.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every object whose key starts with `prefix` (empty prefix = whole bucket).
    ///
    /// Must page through truncated listings; callers rely on the result being exhaustive.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectSummary>, StoreError>;

    /// Fetch an object body and write it to `destination`. The parent directory exists.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
    ) -> Result<(), StoreError>;

    /// Upload the contents of `source` under `key`, replacing any existing object.
    async fn put_object(&self, bucket: &str, key: &str, source: &Path)
        -> Result<(), StoreError>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError>;
}

/// Regenerates repository metadata (`repodata/`) for a directory of packages.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait IndexBuilder: Send + Sync {
    /// Fails with [`RebuildError::IndexBuild`] when the builder reports failure;
    /// the error carries the builder's diagnostic output.
    fn build(&self, directory: &Path) -> Result<(), RebuildError>;
}

/// Behavioral contract over a staged local yum repository.
///
/// All paths are relative to the repository root (the directory holding `repodata/`).
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait LocalRepository: Send + Sync {
    /// True iff the repository index is present.
    fn index_exists(&self) -> bool;

    /// Repository-relative paths of every package the current index declares.
    fn list_declared_files(&self) -> Result<Vec<String>, RebuildError>;

    fn file_exists(&self, relative_path: &str) -> bool;

    /// Remove a file from the staging tree. Removing an absent file is a no-op.
    fn delete_file(&self, relative_path: &str) -> Result<(), RebuildError>;

    /// Regenerate the index from the current contents of the staging tree.
    fn rebuild_index(&self) -> Result<(), RebuildError>;
}
