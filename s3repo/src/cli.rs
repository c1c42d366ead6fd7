///
/// This module implements the CLI interface for s3repo: command parsing, the async entrypoint
/// and the user-visible summary of a run.
///
/// All rebuild logic (locator parsing, snapshot pruning, phase ordering) lives in the
/// [`s3repo-core`] crate. This module only wires configuration, the S3 client and the
/// `createrepo` builder together.
///
/// ## How To Use
/// - From the command line: `s3repo rebuild --config repo.yaml [--dry-run]`.
/// - Programmatically / in tests: call [`run`] with a constructed [`Cli`].
///
/// Command-line flags can only switch behaviour *on* on top of the YAML file; they never
/// re-enable something the file turned off.
///
/// [`s3repo-core`]: ../../s3repo-core/
use crate::load_config::load_config;
use crate::store::S3Store;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use s3repo_core::rebuild::RebuildReport;
use s3repo_core::rebuild_repository;
use std::path::PathBuf;

/// CLI for s3repo: rebuild a yum repository stored in S3.
#[derive(Parser)]
#[clap(
    name = "s3repo",
    version,
    about = "Rebuild a yum repository hosted in an S3 bucket, optionally pruning old SNAPSHOT builds"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download, re-index and publish the repository described by the config file
    Rebuild {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Build everything locally but do not upload or delete anything in the bucket
        #[clap(long)]
        dry_run: bool,
        /// Keep only the newest build of every SNAPSHOT package
        #[clap(long)]
        remove_old_snapshots: bool,
        /// Do not require the downloaded repository to be consistent (e.g. first run)
        #[clap(long)]
        skip_validation: bool,
    },
}

/// Async CLI entrypoint for main() and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Rebuild {
            config,
            dry_run,
            remove_old_snapshots,
            skip_validation,
        } => {
            let mut cli_config = load_config(&config)
                .with_context(|| format!("Could not load configuration from {config:?}"))?;
            cli_config.do_not_upload |= dry_run;
            cli_config.remove_old_snapshots |= remove_old_snapshots;
            cli_config.do_not_validate |= skip_validation;
            tracing::info!(command = "rebuild", "Starting repository rebuild");

            let rebuild_config = cli_config.rebuild_config();
            let store = S3Store::new(cli_config.s3_settings()?);
            match rebuild_repository(&rebuild_config, &store, cli_config.index_builder()).await {
                Ok(report) => {
                    tracing::info!(command = "rebuild", ?report, "Rebuild complete");
                    print_summary(&report);
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "rebuild", error = %e, "Rebuild failed");
                    Err(anyhow::Error::new(e).context("Repository rebuild failed"))
                }
            }
        }
    }
}

fn print_summary(report: &RebuildReport) {
    println!("Rebuilt {} ({})", report.repository, report.final_state);
    println!("  downloaded:      {}", report.objects_downloaded);
    println!("  snapshot groups: {}", report.snapshot_groups);
    println!("  pruned:          {}", report.pruned_keys.len());
    if report.published() {
        println!("  uploaded:        {}", report.objects_uploaded);
        println!("  stale metadata:  {}", report.stale_metadata_keys.len());
        println!("  deleted:         {}", report.deleted_keys.len());
    } else {
        println!("  dry run: nothing was uploaded or deleted");
    }
    for failure in &report.deletion_failures {
        println!(
            "  warning: could not delete {}: {}",
            failure.key, failure.message
        );
    }
}
