#![doc = "s3repo-core: core logic library for s3repo."]

//! This crate contains the repository rebuild workflow and everything it depends on,
//! except the network client for the object store (see the `s3repo` crate).
//!
//! # Usage
//! Construct a [`config::RebuildConfig`], pick an [`contract::ObjectStore`] and an
//! [`contract::IndexBuilder`], and call [`rebuild::rebuild_repository`].

pub mod config;
pub mod contract;
pub mod error;
pub mod local_repo;
pub mod locator;
pub mod rebuild;
pub mod snapshot;
pub mod staging;

pub use error::RebuildError;
pub use rebuild::{rebuild_repository, RebuildReport, RebuildState};
