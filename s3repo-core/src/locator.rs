//! Parsing of repository locations such as `s3://bucket/folder` into bucket + sub-folder.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::RebuildError;

const S3_SCHEME: &str = "s3://";

/// Where the repository lives in the object store.
///
/// `sub_folder`, when present, is non-empty and has no leading or trailing `/`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RepositoryLocator {
    bucket: String,
    sub_folder: Option<String>,
}

impl RepositoryLocator {
    /// Accepts `s3://bucket[/folder...]`, `/bucket[/folder...]` and `bucket[/folder...]`.
    pub fn parse(path: &str) -> Result<Self, RebuildError> {
        let invalid = |reason: &str| RebuildError::InvalidLocator {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = path.trim();
        let without_scheme = trimmed.strip_prefix(S3_SCHEME).unwrap_or(trimmed);
        let without_scheme = without_scheme.trim_start_matches('/');

        let (bucket, folder) = match without_scheme.split_once('/') {
            Some((bucket, folder)) => (bucket, folder.trim_matches('/')),
            None => (without_scheme, ""),
        };

        if bucket.is_empty() {
            return Err(invalid("no bucket name"));
        }
        if bucket.contains(':') || bucket.chars().any(char::is_whitespace) {
            return Err(invalid("bucket name contains illegal characters"));
        }
        if folder.split('/').any(|segment| segment == "..") {
            return Err(invalid("folder must not contain '..' segments"));
        }

        Ok(RepositoryLocator {
            bucket: bucket.to_string(),
            sub_folder: (!folder.is_empty()).then(|| folder.to_string()),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn sub_folder(&self) -> Option<&str> {
        self.sub_folder.as_deref()
    }

    /// Listing prefix for the repository: `"folder/"`, or `""` for a bucket-root repository.
    pub fn key_prefix(&self) -> String {
        match &self.sub_folder {
            Some(folder) => format!("{folder}/"),
            None => String::new(),
        }
    }

    /// Local directory the repository occupies once the bucket is mirrored into `staging`.
    pub fn local_root(&self, staging: &Path) -> PathBuf {
        match &self.sub_folder {
            Some(folder) => folder
                .split('/')
                .fold(staging.to_path_buf(), |acc, segment| acc.join(segment)),
            None => staging.to_path_buf(),
        }
    }

    /// Strip the sub-folder prefix from a store key, yielding a repository-relative path.
    /// Keys outside the repository are returned unchanged.
    pub fn repo_relative<'k>(&self, key: &'k str) -> &'k str {
        match &self.sub_folder {
            Some(folder) => key
                .strip_prefix(folder.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or(key),
            None => key,
        }
    }
}

impl fmt::Display for RepositoryLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub_folder {
            Some(folder) => write!(f, "{S3_SCHEME}{}/{folder}", self.bucket),
            None => write!(f, "{S3_SCHEME}{}", self.bucket),
        }
    }
}
