#![doc = "S3 implementation of the core `ObjectStore` contract, built on the AWS SDK."]
//
//! # S3 store (CLI <-> Core)
//!
//! The rebuild workflow in `s3repo-core` only knows the [`ObjectStore`] trait. This module
//! supplies the production implementation: one [`aws_sdk_s3::Client`] shared by every phase
//! of a run, configured from [`S3Settings`].
//!
//! - Static credentials come from the environment (see [`crate::load_config`]).
//! - `endpoint` + `force_path_style` allow S3-compatible stores such as MinIO.
//! - Listing pages through `list_objects_v2` until the result is no longer truncated, and
//!   fails instead of looping when a truncated page has no fresh continuation token.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use s3repo_core::contract::{ObjectStore, ObjectSummary, StoreError};
use tracing::{debug, instrument, warn};

pub const DEFAULT_REGION: &str = "us-east-1";

/// Access key pair used to sign every request.
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub region: String,
    /// Custom endpoint for S3-compatible stores. Bare `host:port` is treated as `http://`.
    pub endpoint: Option<String>,
    /// Path-style addressing (`endpoint/bucket/key`), needed by MinIO and similar.
    pub force_path_style: bool,
    pub credentials: S3Credentials,
}

pub struct S3Store {
    client: Client,
    region: String,
    endpoint: Option<String>,
}

impl fmt::Debug for S3Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Store")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl S3Store {
    pub fn new(settings: S3Settings) -> Self {
        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(settings.region.clone()))
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                settings.credentials.access_key,
                settings.credentials.secret_key,
                None,
                None,
                "s3repo-config",
            ));

        let endpoint = settings.endpoint.as_deref().map(normalize_endpoint);
        if let Some(url) = &endpoint {
            builder = builder.endpoint_url(url);
        }
        if settings.force_path_style {
            builder = builder.force_path_style(true);
        }

        tracing::info!(
            region = %settings.region,
            endpoint = ?endpoint,
            force_path_style = settings.force_path_style,
            "Initialized S3 client"
        );
        S3Store {
            client: Client::from_conf(builder.build()),
            region: settings.region,
            endpoint,
        }
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    let lower = endpoint.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

fn to_chrono(key: &str, modified: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    let converted =
        modified.and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()));
    match converted {
        Some(timestamp) => timestamp,
        None => {
            warn!(
                key = %key,
                "Object has no usable modification time, treating it as oldest"
            );
            DateTime::<Utc>::UNIX_EPOCH
        }
    }
}

/// One `list_objects_v2` response.
#[derive(Debug)]
struct ListingPage {
    objects: Vec<ObjectSummary>,
    truncated: bool,
    next_token: Option<String>,
}

impl S3Store {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListingPage, StoreError> {
        let mut request = self.client.list_objects_v2().bucket(bucket);
        if !prefix.is_empty() {
            request = request.prefix(prefix);
        }
        if let Some(token) = continuation_token {
            request = request.continuation_token(token);
        }

        let output = request.send().await?;
        let objects = output
            .contents()
            .iter()
            .filter_map(|object| {
                object.key().map(|key| ObjectSummary {
                    key: key.to_string(),
                    last_modified: to_chrono(key, object.last_modified()),
                })
            })
            .collect();
        Ok(ListingPage {
            objects,
            truncated: output.is_truncated() == Some(true),
            next_token: output.next_continuation_token().map(|s| s.to_string()),
        })
    }
}

/// Follow continuation tokens until a page is no longer truncated.
///
/// A truncated page must carry a fresh token. Anything else would restart or repeat the
/// listing forever, so it is reported as an error.
async fn collect_listing<F, Fut>(mut fetch_page: F) -> Result<Vec<ObjectSummary>, StoreError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<ListingPage, StoreError>>,
{
    let mut results = Vec::new();
    let mut seen_tokens = HashSet::new();
    let mut continuation_token: Option<String> = None;

    loop {
        let page = fetch_page(continuation_token.take()).await?;
        results.extend(page.objects);
        if !page.truncated {
            return Ok(results);
        }

        let token = match page.next_token {
            Some(token) if !token.is_empty() => token,
            _ => return Err("listing truncated without a continuation token".into()),
        };
        if !seen_tokens.insert(token.clone()) {
            return Err(format!("listing returned continuation token '{token}' twice").into());
        }
        debug!(listed = results.len(), "Listing truncated, fetching next page");
        continuation_token = Some(token);
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectSummary>, StoreError> {
        collect_listing(|token| self.list_page(bucket, prefix, token)).await
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
    ) -> Result<(), StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await?;

        let mut reader = output.body.into_async_read();
        let mut file = tokio::fs::File::create(destination).await?;
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        debug!(key = %key, bytes = written, "Object written to disk");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
    ) -> Result<(), StoreError> {
        let body = ByteStream::from_path(source).await?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await?;
        Ok(())
    }
}
