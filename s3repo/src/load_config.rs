/// `load_config` module: loads the static YAML config and the environment secrets into the
/// core [`RebuildConfig`] and the [`S3Settings`] for the store client.
///
/// # Responsibilities
/// - Parse the user-supplied YAML file into [`CliConfig`], applying defaults
/// - Read the S3 key pair from `S3REPO_ACCESS_KEY` / `S3REPO_SECRET_KEY`
/// - Map the YAML flags onto a [`PhasePlan`]
///
/// Secrets never live in the YAML file.
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::{anyhow, Result};
use s3repo_core::config::{PhasePlan, RebuildConfig, DEFAULT_CONCURRENCY};
use s3repo_core::local_repo::{Createrepo, DEFAULT_CREATEREPO};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::store::{S3Credentials, S3Settings, DEFAULT_REGION};

pub const ACCESS_KEY_ENV: &str = "S3REPO_ACCESS_KEY";
pub const SECRET_KEY_ENV: &str = "S3REPO_SECRET_KEY";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    /// `s3://bucket/folder`, `/bucket/folder` or `bucket/folder`.
    pub repository_path: String,
    #[serde(default = "default_staging_directory")]
    pub staging_directory: PathBuf,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
    #[serde(default)]
    pub do_not_validate: bool,
    #[serde(default)]
    pub remove_old_snapshots: bool,
    #[serde(default)]
    pub do_not_upload: bool,
    #[serde(default = "default_createrepo")]
    pub createrepo: String,
    #[serde(default)]
    pub createrepo_args: Vec<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(skip)]
    pub credentials: Option<S3Credentials>,
}

fn default_staging_directory() -> PathBuf {
    PathBuf::from("./target/s3repo")
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_createrepo() -> String {
    DEFAULT_CREATEREPO.to_string()
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl CliConfig {
    pub fn rebuild_config(&self) -> RebuildConfig {
        RebuildConfig::new(&self.repository_path, &self.staging_directory)
            .with_phases(PhasePlan::from_flags(
                self.do_not_validate,
                self.remove_old_snapshots,
                self.do_not_upload,
            ))
            .with_concurrency(self.concurrency)
    }

    pub fn index_builder(&self) -> Createrepo {
        Createrepo::new(&self.createrepo).with_args(self.createrepo_args.clone())
    }

    pub fn s3_settings(&self) -> Result<S3Settings> {
        let credentials = self
            .credentials
            .clone()
            .ok_or_else(|| anyhow!("S3 credentials were not loaded"))?;
        Ok(S3Settings {
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            force_path_style: self.force_path_style,
            credentials,
        })
    }
}

fn credentials_from_env() -> Result<S3Credentials> {
    match (env::var(ACCESS_KEY_ENV), env::var(SECRET_KEY_ENV)) {
        (Ok(access_key), Ok(secret_key)) => {
            info!(access_key_set = !access_key.is_empty(), "Loaded S3 credentials from environment");
            Ok(S3Credentials {
                access_key,
                secret_key,
            })
        }
        (Err(e), _) => {
            error!(error = ?e, "{ACCESS_KEY_ENV} missing in environment");
            Err(anyhow!("{ACCESS_KEY_ENV} must be set: {e}"))
        }
        (_, Err(e)) => {
            error!(error = ?e, "{SECRET_KEY_ENV} missing in environment");
            Err(anyhow!("{SECRET_KEY_ENV} must be set: {e}"))
        }
    }
}

/// Loads the static YAML config file and injects the credentials from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let mut config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if config.concurrency == 0 {
        error!(config_path = ?path_ref, "concurrency must be at least 1");
        return Err(anyhow!("Invalid config: concurrency must be at least 1"));
    }

    config.credentials = Some(credentials_from_env()?);
    Ok(config)
}
