//! Local staging directory helpers: clean-or-create, recursive listing, key/path mapping.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::RebuildError;

/// Make sure `dir` exists and is empty.
pub fn create_or_clean_directory(dir: &Path) -> Result<(), RebuildError> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|e| RebuildError::staging(dir, e))?;
        debug!(path = %dir.display(), "Removed existing staging directory");
    }
    fs::create_dir_all(dir).map_err(|e| RebuildError::staging(dir, e))?;
    debug!(path = %dir.display(), "Created staging directory");
    Ok(())
}

/// Every regular file under `root`, sorted by path.
pub fn list_all_files(root: &Path) -> Result<Vec<PathBuf>, RebuildError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            RebuildError::staging(path, e.into())
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Store key for `file`: its path relative to `root`, `/`-separated, with no leading or
/// trailing separator.
pub fn store_key_for(root: &Path, file: &Path) -> Result<String, RebuildError> {
    let relative = file.strip_prefix(root).map_err(|_| {
        RebuildError::staging(
            file,
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("file is outside of {}", root.display()),
            ),
        )
    })?;
    let key = relative.to_string_lossy().replace('\\', "/");
    Ok(key.trim_matches('/').to_string())
}

/// Local path an object key is mirrored to under `root`.
///
/// Returns `None` unless every `/`-separated segment is a plain name: empty, `.` and `..`
/// segments (including a leading `/`) are rejected, so [`store_key_for`] maps the path back
/// to exactly `key`.
pub fn local_path_for(root: &Path, key: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for segment in key.split('/') {
        if matches!(segment, "" | "." | "..") {
            return None;
        }
        path.push(segment);
    }
    Some(path)
}
