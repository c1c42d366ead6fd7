//! Error taxonomy for the rebuild workflow.
//!
//! Every fatal condition of a run maps to exactly one variant. Store and
//! index-builder failures are always wrapped together with the key or path
//! that triggered them so the CLI can print an actionable message.
//!
//! Failed remote deletions during cleanup are *not* represented here: by the
//! time cleanup runs the published index no longer references those keys, so
//! they are reported through [`crate::rebuild::RebuildReport`] instead.

use std::path::PathBuf;

use thiserror::Error;

use crate::contract::StoreError;

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error("invalid repository path {path:?}: {reason}")]
    InvalidLocator { path: String, reason: String },

    #[error("staging directory error at {}: {source}", path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to list objects in bucket '{bucket}' with prefix '{prefix}': {source}")]
    Listing {
        bucket: String,
        prefix: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to download object from store: {key}: {source}")]
    Download {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("repository does not exist: no index found for {repository}")]
    RepositoryMissing { repository: String },

    #[error("repository metadata declares {file} but the file does not exist")]
    RepositoryInconsistent { file: String },

    #[error("failed to parse repository index at {}: {reason}", path.display())]
    IndexParse { path: PathBuf, reason: String },

    #[error("failed to launch index builder '{executable}' for {}: {source}", directory.display())]
    IndexBuilderLaunch {
        executable: String,
        directory: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("index builder exited with {status} for {}:\n{diagnostics}", directory.display())]
    IndexBuild {
        directory: PathBuf,
        status: String,
        diagnostics: String,
    },

    #[error("failed to delete local file {}: {source}", path.display())]
    LocalDelete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to upload {key} to store: {source}")]
    Upload {
        key: String,
        #[source]
        source: StoreError,
    },
}

impl RebuildError {
    pub(crate) fn staging(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RebuildError::Staging {
            path: path.into(),
            source,
        }
    }
}
