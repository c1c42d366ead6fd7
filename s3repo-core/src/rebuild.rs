//! High-level pipeline: orchestrates download → validate → prune → rebuild → publish → cleanup.
//!
//! This module rebuilds a yum repository whose canonical copy lives in an object store.
//! Object stores have no multi-object transactions, so the order of remote writes is what
//! keeps concurrent repository clients consistent:
//!   - The bucket (or bucket folder) is mirrored into a freshly cleaned staging directory
//!   - The downloaded index is optionally checked against the downloaded files
//!   - Superseded SNAPSHOT builds are optionally removed *locally*, and their keys remembered
//!   - The index is regenerated over the pruned tree
//!   - Every staged file is uploaded, and only once *all* uploads have finished are the
//!     remembered keys deleted from the store, together with any index metadata files the
//!     regenerated index no longer contains
//!
//! # Major Types
//! - [`RebuildContext`]: per-run state threaded through the phase functions by value
//! - [`RebuildState`]: the sequential state machine; [`crate::config::PhasePlan`] decides
//!   which phases run
//! - [`RebuildReport`]: what the run did, for the CLI and for tests
//!
//! # Error Handling
//! Any phase failure aborts the run with a [`RebuildError`]. Up to and including the rebuild
//! phase the store has not been written to. Failed deletions during cleanup are collected in
//! the report instead: the published index no longer references those keys.
//!
//! # Navigation
//! - Main entrypoint: [`rebuild_repository`]
//! - Individual phases: [`download`], [`validate`], [`prune`], [`rebuild_index`], [`publish`],
//!   [`cleanup`]

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, error, info};

use crate::config::{PhaseDecision, RebuildConfig};
use crate::contract::{IndexBuilder, LocalRepository, ObjectStore};
use crate::error::RebuildError;
use crate::local_repo::{LocalYumRepo, REPODATA_DIR};
use crate::locator::RepositoryLocator;
use crate::snapshot::SnapshotIndex;
use crate::staging;

/// States of a run, in the only order they can be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
pub enum RebuildState {
    Init,
    Downloaded,
    Validated,
    Pruned,
    Rebuilt,
    Published,
    Done,
}

impl RebuildState {
    pub fn next(self) -> Option<RebuildState> {
        use RebuildState::*;
        match self {
            Init => Some(Downloaded),
            Downloaded => Some(Validated),
            Validated => Some(Pruned),
            Pruned => Some(Rebuilt),
            Rebuilt => Some(Published),
            Published => Some(Done),
            Done => None,
        }
    }
}

impl fmt::Display for RebuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A remote deletion that failed during cleanup. Leaves an unreferenced object behind.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeletionFailure {
    pub key: String,
    pub message: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RebuildReport {
    pub repository: String,
    pub final_state: RebuildState,
    pub objects_downloaded: usize,
    pub snapshot_groups: usize,
    /// Superseded snapshot keys removed from staging (and scheduled for remote deletion).
    pub pruned_keys: Vec<String>,
    /// Downloaded `repodata/` keys the regenerated index replaced (scheduled for deletion).
    pub stale_metadata_keys: Vec<String>,
    pub objects_uploaded: usize,
    pub deleted_keys: Vec<String>,
    pub deletion_failures: Vec<DeletionFailure>,
}

impl RebuildReport {
    fn new(repository: String) -> Self {
        RebuildReport {
            repository,
            final_state: RebuildState::Init,
            objects_downloaded: 0,
            snapshot_groups: 0,
            pruned_keys: Vec::new(),
            stale_metadata_keys: Vec::new(),
            objects_uploaded: 0,
            deleted_keys: Vec::new(),
            deletion_failures: Vec::new(),
        }
    }

    pub fn published(&self) -> bool {
        self.final_state >= RebuildState::Published
    }
}

/// Per-run state. Owned by exactly one run and handed from phase to phase.
pub struct RebuildContext<'s, S: ?Sized, R> {
    store: &'s S,
    locator: RepositoryLocator,
    local_repo: R,
    staging_directory: PathBuf,
    concurrency: usize,
    snapshots: SnapshotIndex,
    /// Downloaded keys below the repository's `repodata/`.
    downloaded_metadata: BTreeSet<String>,
    pending_deletions: BTreeSet<String>,
    state: RebuildState,
    report: RebuildReport,
}

impl<'s, S, R> RebuildContext<'s, S, R>
where
    S: ObjectStore + ?Sized,
    R: LocalRepository,
{
    pub fn new(
        store: &'s S,
        locator: RepositoryLocator,
        local_repo: R,
        staging_directory: PathBuf,
        concurrency: usize,
    ) -> Self {
        let report = RebuildReport::new(locator.to_string());
        RebuildContext {
            store,
            locator,
            local_repo,
            staging_directory,
            concurrency: concurrency.max(1),
            snapshots: SnapshotIndex::new(),
            downloaded_metadata: BTreeSet::new(),
            pending_deletions: BTreeSet::new(),
            state: RebuildState::Init,
            report,
        }
    }

    pub fn state(&self) -> RebuildState {
        self.state
    }

    pub fn pending_deletions(&self) -> &BTreeSet<String> {
        &self.pending_deletions
    }

    pub fn report(&self) -> &RebuildReport {
        &self.report
    }

    pub fn into_report(mut self) -> RebuildReport {
        self.report.final_state = self.state;
        self.report
    }

    fn advance(&mut self, to: RebuildState) {
        debug!(from = %self.state, to = %to, "[REBUILD] State transition");
        self.state = to;
    }
}

/// Entrypoint: rebuild the repository described by `config`.
///
/// `store` is the session used for every remote operation; `builder` regenerates the index
/// of the staged repository.
pub async fn rebuild_repository<S, B>(
    config: &RebuildConfig,
    store: &S,
    builder: B,
) -> Result<RebuildReport, RebuildError>
where
    S: ObjectStore + ?Sized,
    B: IndexBuilder,
{
    info!("[REBUILD] Starting repository rebuild");
    config.trace_loaded();

    let locator = RepositoryLocator::parse(&config.repository_path).map_err(|e| {
        error!(error = %e, "[REBUILD][ERROR] Failed to parse repository path");
        e
    })?;
    match locator.sub_folder() {
        Some(folder) => info!(
            bucket = %locator.bucket(),
            folder = %folder,
            "[REBUILD] Using bucket and folder as repository"
        ),
        None => info!(bucket = %locator.bucket(), "[REBUILD] Using bucket as repository"),
    }

    // Always start from an empty staging directory.
    staging::create_or_clean_directory(&config.staging_directory)?;

    let local_repo = LocalYumRepo::new(locator.local_root(&config.staging_directory), builder);
    let mut ctx = RebuildContext::new(
        store,
        locator,
        local_repo,
        config.staging_directory.clone(),
        config.concurrency,
    );

    while let Some(next) = ctx.state.next() {
        match config.phases.decision(next) {
            PhaseDecision::Run => {
                ctx = run_phase(next, ctx).await.map_err(|e| {
                    error!(phase = %next, error = %e, "[REBUILD][ERROR] Phase failed");
                    e
                })?;
            }
            PhaseDecision::Skip => {
                info!(phase = %next, "[REBUILD] Per configuration, skipping phase");
                ctx.advance(next);
            }
            PhaseDecision::Stop => {
                info!(
                    phase = %next,
                    "[REBUILD] Per configuration, not uploading built repository to the store"
                );
                break;
            }
        }
    }

    let report = ctx.into_report();
    info!(
        repository = %report.repository,
        final_state = %report.final_state,
        pruned = report.pruned_keys.len(),
        stale_metadata = report.stale_metadata_keys.len(),
        uploaded = report.objects_uploaded,
        deleted = report.deleted_keys.len(),
        deletion_failures = report.deletion_failures.len(),
        "[REBUILD] Rebuild finished"
    );
    match serde_json::to_string_pretty(&report) {
        Ok(json) => debug!(json = %json, "[REBUILD][DEBUG] Report as JSON"),
        Err(e) => error!(error = ?e, "[REBUILD][DEBUG] Failed to serialize report as JSON"),
    }
    Ok(report)
}

async fn run_phase<'s, S, R>(
    phase: RebuildState,
    ctx: RebuildContext<'s, S, R>,
) -> Result<RebuildContext<'s, S, R>, RebuildError>
where
    S: ObjectStore + ?Sized,
    R: LocalRepository,
{
    match phase {
        RebuildState::Init => Ok(ctx),
        RebuildState::Downloaded => download(ctx).await,
        RebuildState::Validated => validate(ctx),
        RebuildState::Pruned => prune(ctx),
        RebuildState::Rebuilt => rebuild_index(ctx),
        RebuildState::Published => publish(ctx).await,
        RebuildState::Done => cleanup(ctx).await,
    }
}

/// Mirror every object under the repository prefix into staging, noting snapshot builds.
pub async fn download<'s, S, R>(
    mut ctx: RebuildContext<'s, S, R>,
) -> Result<RebuildContext<'s, S, R>, RebuildError>
where
    S: ObjectStore + ?Sized,
    R: LocalRepository,
{
    info!("[REBUILD][DOWNLOAD] Downloading entire repository");
    let bucket = ctx.locator.bucket().to_string();
    let prefix = ctx.locator.key_prefix();
    let objects = ctx
        .store
        .list_objects(&bucket, &prefix)
        .await
        .map_err(|source| RebuildError::Listing {
            bucket: bucket.clone(),
            prefix: prefix.clone(),
            source,
        })?;
    debug!(
        count = objects.len(),
        bucket = %bucket,
        prefix = %prefix,
        "[REBUILD][DOWNLOAD] Found objects"
    );

    // Classification happens here, in listing order, before any transfer starts.
    let metadata_prefix = format!("{prefix}{REPODATA_DIR}/");
    let mut transfers = Vec::with_capacity(objects.len());
    for summary in &objects {
        if summary.key.ends_with('/') {
            debug!(key = %summary.key, "[REBUILD][DOWNLOAD] Skipping folder placeholder");
            continue;
        }
        ctx.snapshots.record(summary);
        if summary.key.starts_with(&metadata_prefix) {
            ctx.downloaded_metadata.insert(summary.key.clone());
        }
        let target = staging::local_path_for(&ctx.staging_directory, &summary.key).ok_or_else(
            || RebuildError::Download {
                key: summary.key.clone(),
                source: "object key has an empty, '.' or '..' path segment".into(),
            },
        )?;
        transfers.push((summary.key.clone(), target));
    }

    let store = ctx.store;
    let bucket = bucket.as_str();
    let downloaded = transfers.len();
    stream::iter(transfers)
        .map(|(key, target)| async move {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| RebuildError::Download {
                        key: key.clone(),
                        source: Box::new(e),
                    })?;
            }
            info!(key = %key, "[REBUILD][DOWNLOAD] Downloading object");
            store
                .get_object(bucket, &key, &target)
                .await
                .map_err(|source| {
                    error!(key = %key, error = %source, "[REBUILD][ERROR][DOWNLOAD] Transfer failed");
                    RebuildError::Download { key, source }
                })
        })
        .buffer_unordered(ctx.concurrency)
        .try_collect::<Vec<()>>()
        .await?;

    ctx.report.objects_downloaded = downloaded;
    ctx.report.snapshot_groups = ctx.snapshots.group_count();
    info!(
        objects = downloaded,
        snapshot_groups = ctx.snapshots.group_count(),
        "[REBUILD][DOWNLOAD] Download succeeded"
    );
    ctx.advance(RebuildState::Downloaded);
    Ok(ctx)
}

/// Check that the downloaded repository is internally consistent.
pub fn validate<'s, S, R>(
    mut ctx: RebuildContext<'s, S, R>,
) -> Result<RebuildContext<'s, S, R>, RebuildError>
where
    S: ObjectStore + ?Sized,
    R: LocalRepository,
{
    info!("[REBUILD][VALIDATE] Validating downloaded repository");
    if !ctx.local_repo.index_exists() {
        return Err(RebuildError::RepositoryMissing {
            repository: ctx.locator.to_string(),
        });
    }
    let declared = ctx.local_repo.list_declared_files()?;
    for file in &declared {
        if !ctx.local_repo.file_exists(file) {
            error!(file = %file, "[REBUILD][ERROR][VALIDATE] Declared file is missing");
            return Err(RebuildError::RepositoryInconsistent { file: file.clone() });
        }
    }
    info!(
        declared = declared.len(),
        "[REBUILD][VALIDATE] Repository metadata is consistent"
    );
    ctx.advance(RebuildState::Validated);
    Ok(ctx)
}

/// Remove superseded snapshot builds from staging and remember their keys for cleanup.
///
/// Nothing is deleted remotely here.
pub fn prune<'s, S, R>(
    mut ctx: RebuildContext<'s, S, R>,
) -> Result<RebuildContext<'s, S, R>, RebuildError>
where
    S: ObjectStore + ?Sized,
    R: LocalRepository,
{
    info!("[REBUILD][PRUNE] Removing old snapshots");
    for superseded in ctx.snapshots.superseded() {
        info!(
            key = %superseded.object_key,
            installable_key = %superseded.installable_key,
            "[REBUILD][PRUNE] Deleting old snapshot locally"
        );
        let relative = ctx.locator.repo_relative(&superseded.object_key);
        ctx.local_repo.delete_file(relative)?;
        if ctx.pending_deletions.insert(superseded.object_key.clone()) {
            ctx.report.pruned_keys.push(superseded.object_key);
        }
    }
    info!(
        pruned = ctx.pending_deletions.len(),
        "[REBUILD][PRUNE] Old snapshots removed locally"
    );
    ctx.advance(RebuildState::Pruned);
    Ok(ctx)
}

/// Regenerate the repository index over the (possibly pruned) staging tree.
pub fn rebuild_index<'s, S, R>(
    mut ctx: RebuildContext<'s, S, R>,
) -> Result<RebuildContext<'s, S, R>, RebuildError>
where
    S: ObjectStore + ?Sized,
    R: LocalRepository,
{
    info!("[REBUILD][INDEX] Rebuilding repository index");
    ctx.local_repo.rebuild_index()?;
    ctx.advance(RebuildState::Rebuilt);
    Ok(ctx)
}

/// Upload every staged file. Returns only after every upload has completed.
///
/// Downloaded metadata keys that were not re-uploaded belong to the replaced index and are
/// scheduled for cleanup.
pub async fn publish<'s, S, R>(
    mut ctx: RebuildContext<'s, S, R>,
) -> Result<RebuildContext<'s, S, R>, RebuildError>
where
    S: ObjectStore + ?Sized,
    R: LocalRepository,
{
    info!("[REBUILD][UPLOAD] Uploading repository");
    let files = staging::list_all_files(&ctx.staging_directory)?;
    let uploads = files
        .into_iter()
        .map(|file| Ok((staging::store_key_for(&ctx.staging_directory, &file)?, file)))
        .collect::<Result<Vec<_>, RebuildError>>()?;

    let uploaded_keys: BTreeSet<String> = uploads.iter().map(|(key, _)| key.clone()).collect();
    let store = ctx.store;
    let bucket = ctx.locator.bucket();
    let uploaded = uploads.len();
    // try_collect drains the whole stream: no cleanup can start before this returns.
    stream::iter(uploads)
        .map(|(key, file)| async move {
            info!(key = %key, bucket = %bucket, "[REBUILD][UPLOAD] Uploading object");
            store.put_object(bucket, &key, &file).await.map_err(|source| {
                error!(key = %key, error = %source, "[REBUILD][ERROR][UPLOAD] Upload failed");
                RebuildError::Upload { key, source }
            })
        })
        .buffer_unordered(ctx.concurrency)
        .try_collect::<Vec<()>>()
        .await?;

    ctx.report.objects_uploaded = uploaded;
    info!(objects = uploaded, "[REBUILD][UPLOAD] Upload succeeded");

    let stale: Vec<String> = ctx
        .downloaded_metadata
        .difference(&uploaded_keys)
        .cloned()
        .collect();
    for key in stale {
        debug!(key = %key, "[REBUILD][UPLOAD] Metadata file replaced by the new index");
        if ctx.pending_deletions.insert(key.clone()) {
            ctx.report.stale_metadata_keys.push(key);
        }
    }
    ctx.advance(RebuildState::Published);
    Ok(ctx)
}

/// Delete the superseded snapshot and metadata keys from the store. Individual failures are reported, not fatal.
pub async fn cleanup<'s, S, R>(
    mut ctx: RebuildContext<'s, S, R>,
) -> Result<RebuildContext<'s, S, R>, RebuildError>
where
    S: ObjectStore + ?Sized,
    R: LocalRepository,
{
    let pending = std::mem::take(&mut ctx.pending_deletions);
    if !pending.is_empty() {
        info!(
            count = pending.len(),
            "[REBUILD][CLEANUP] Deleting old snapshots and replaced metadata from store"
        );
    }

    let store = ctx.store;
    let bucket = ctx.locator.bucket();
    let outcomes: Vec<_> = stream::iter(pending)
        .map(|key| async move {
            info!(key = %key, "[REBUILD][CLEANUP] Deleting object from store");
            let outcome = store.delete_object(bucket, &key).await;
            (key, outcome)
        })
        .buffer_unordered(ctx.concurrency)
        .collect()
        .await;

    for (key, outcome) in outcomes {
        match outcome {
            Ok(()) => ctx.report.deleted_keys.push(key),
            Err(e) => {
                error!(key = %key, error = %e, "[REBUILD][ERROR][CLEANUP] Failed to delete object");
                ctx.report.deletion_failures.push(DeletionFailure {
                    key,
                    message: e.to_string(),
                });
            }
        }
    }
    ctx.report.deleted_keys.sort();
    ctx.report
        .deletion_failures
        .sort_by(|left, right| left.key.cmp(&right.key));

    ctx.advance(RebuildState::Done);
    Ok(ctx)
}
