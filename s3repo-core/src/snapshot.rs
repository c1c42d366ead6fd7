//! SNAPSHOT artifact detection and grouping.
//!
//! A snapshot artifact is a package whose filename embeds the literal marker `SNAPSHOT`.
//! Every build of the same logical package shares an *installable key*: the key's directory
//! path plus the filename prefix in front of the marker. Grouping is purely textual; version
//! numbers are never parsed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::contract::ObjectSummary;

pub const SNAPSHOT_MARKER: &str = "SNAPSHOT";

/// Installable key for `object_key`, or `None` if it is not a snapshot artifact.
///
/// A marker at filename position 0 does not count: such names are not treated as snapshots.
pub fn classify(object_key: &str) -> Option<String> {
    let (dir_path, file_name) = match object_key.rfind('/') {
        Some(idx) => object_key.split_at(idx + 1),
        None => ("", object_key),
    };
    match file_name.find(SNAPSHOT_MARKER) {
        Some(position) if position > 0 => Some(format!("{dir_path}{}", &file_name[..position])),
        _ => None,
    }
}

/// One discovered build of a snapshot artifact.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SnapshotDescription {
    pub installable_key: String,
    pub object_key: String,
    pub last_modified: DateTime<Utc>,
}

/// Snapshot builds grouped by installable key, each group in discovery order.
#[derive(Debug, Default)]
pub struct SnapshotIndex {
    groups: BTreeMap<String, Vec<SnapshotDescription>>,
}

impl SnapshotIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `summary` if it is a snapshot artifact.
    pub fn record(&mut self, summary: &ObjectSummary) -> Option<&SnapshotDescription> {
        let installable_key = classify(&summary.key)?;
        debug!(
            key = %summary.key,
            installable_key = %installable_key,
            "Making note of snapshot"
        );
        let group = self.groups.entry(installable_key.clone()).or_default();
        group.push(SnapshotDescription {
            installable_key,
            object_key: summary.key.clone(),
            last_modified: summary.last_modified,
        });
        group.last()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn group(&self, installable_key: &str) -> Option<&[SnapshotDescription]> {
        self.groups.get(installable_key).map(Vec::as_slice)
    }

    /// Every build that is not the newest of its group.
    ///
    /// Groups are ordered newest first by `last_modified`; the sort is stable, so on equal
    /// timestamps the first-discovered build is kept.
    pub fn superseded(&self) -> Vec<SnapshotDescription> {
        let mut superseded = Vec::new();
        for group in self.groups.values().filter(|group| group.len() > 1) {
            let mut ordered = group.clone();
            ordered.sort_by(|left, right| right.last_modified.cmp(&left.last_modified));
            superseded.extend(ordered.into_iter().skip(1));
        }
        superseded
    }
}
