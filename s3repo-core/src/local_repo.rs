//! On-disk yum repository facade and the `createrepo` index builder.
//!
//! The repository root is the directory that contains `repodata/`. The index is read just
//! far enough to list package locations: `repodata/repomd.xml` points at the `primary`
//! metadata file (usually gzipped), whose `<location href="..."/>` elements name every
//! package the index declares.

use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use flate2::read::GzDecoder;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::contract::{IndexBuilder, LocalRepository};
use crate::error::RebuildError;

pub const REPODATA_DIR: &str = "repodata";
pub const REPOMD_FILE: &str = "repomd.xml";
pub const DEFAULT_CREATEREPO: &str = "createrepo";

static PRIMARY_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<data\s+type="primary"\s*>.*?<location\s[^>]*?href="([^"]+)""#)
        .expect("primary location pattern is valid")
});

static PACKAGE_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<location\s[^>]*?href="([^"]+)""#).expect("package location pattern is valid")
});

/// A yum repository staged on local disk.
#[derive(Debug)]
pub struct LocalYumRepo<B> {
    root: PathBuf,
    builder: B,
}

impl<B: IndexBuilder> LocalYumRepo<B> {
    pub fn new(root: impl Into<PathBuf>, builder: B) -> Self {
        LocalYumRepo {
            root: root.into(),
            builder,
        }
    }

    fn repomd_path(&self) -> PathBuf {
        self.root.join(REPODATA_DIR).join(REPOMD_FILE)
    }

    fn resolve(&self, relative_path: &str) -> PathBuf {
        relative_path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }

    fn read_primary(&self) -> Result<(PathBuf, String), RebuildError> {
        let repomd_path = self.repomd_path();
        let repomd = fs::read_to_string(&repomd_path).map_err(|e| RebuildError::IndexParse {
            path: repomd_path.clone(),
            reason: e.to_string(),
        })?;
        let href = PRIMARY_LOCATION
            .captures(&repomd)
            .and_then(|caps| caps.get(1))
            .map(|m| unescape_xml(m.as_str()))
            .ok_or_else(|| RebuildError::IndexParse {
                path: repomd_path.clone(),
                reason: "no primary metadata location".to_string(),
            })?;

        let primary_path = self.resolve(&href);
        let parse_error = |reason: String| RebuildError::IndexParse {
            path: primary_path.clone(),
            reason,
        };
        let raw = fs::read(&primary_path).map_err(|e| parse_error(e.to_string()))?;
        let content = if href.ends_with(".gz") {
            let mut decoded = String::new();
            GzDecoder::new(raw.as_slice())
                .read_to_string(&mut decoded)
                .map_err(|e| parse_error(format!("failed to decompress: {e}")))?;
            decoded
        } else {
            String::from_utf8(raw).map_err(|e| parse_error(e.to_string()))?
        };
        Ok((primary_path, content))
    }
}

impl<B: IndexBuilder> LocalRepository for LocalYumRepo<B> {
    fn index_exists(&self) -> bool {
        self.repomd_path().is_file()
    }

    fn list_declared_files(&self) -> Result<Vec<String>, RebuildError> {
        let (primary_path, primary) = self.read_primary()?;
        let files: Vec<String> = PACKAGE_LOCATION
            .captures_iter(&primary)
            .filter_map(|caps| caps.get(1))
            .map(|m| unescape_xml(m.as_str()))
            .collect();
        debug!(
            primary = %primary_path.display(),
            declared = files.len(),
            "Parsed declared file list from repository metadata"
        );
        Ok(files)
    }

    fn file_exists(&self, relative_path: &str) -> bool {
        self.resolve(relative_path).is_file()
    }

    fn delete_file(&self, relative_path: &str) -> Result<(), RebuildError> {
        let path = self.resolve(relative_path);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Deleted local file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "Local file already absent, nothing to delete");
                Ok(())
            }
            Err(source) => Err(RebuildError::LocalDelete { path, source }),
        }
    }

    fn rebuild_index(&self) -> Result<(), RebuildError> {
        fs::create_dir_all(&self.root).map_err(|e| RebuildError::staging(&self.root, e))?;
        self.builder.build(&self.root)
    }
}

/// Runs the `createrepo` executable (or a compatible replacement such as `createrepo_c`).
#[derive(Debug, Clone)]
pub struct Createrepo {
    executable: String,
    extra_args: Vec<String>,
}

impl Default for Createrepo {
    fn default() -> Self {
        Createrepo::new(DEFAULT_CREATEREPO)
    }
}

impl Createrepo {
    pub fn new(executable: impl Into<String>) -> Self {
        Createrepo {
            executable: executable.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }
}

impl IndexBuilder for Createrepo {
    fn build(&self, directory: &Path) -> Result<(), RebuildError> {
        // `createrepo [args] <directory>`
        let output = Command::new(&self.executable)
            .args(&self.extra_args)
            .arg(directory)
            .output()
            .map_err(|source| {
                error!(
                    error = ?source,
                    executable = %self.executable,
                    "Failed to launch index builder"
                );
                RebuildError::IndexBuilderLaunch {
                    executable: self.executable.clone(),
                    directory: directory.to_path_buf(),
                    source,
                }
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.success() {
            info!(
                executable = %self.executable,
                path = %directory.display(),
                status = ?output.status,
                "Index builder finished"
            );
            debug!(stdout = %stdout, stderr = %stderr, "Index builder output");
            return Ok(());
        }

        error!(
            executable = %self.executable,
            path = %directory.display(),
            "Index builder exited with non-zero code: {}", output.status
        );
        let diagnostics = [stderr.trim(), stdout.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        Err(RebuildError::IndexBuild {
            directory: directory.to_path_buf(),
            status: output.status.to_string(),
            diagnostics,
        })
    }
}

fn unescape_xml(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
