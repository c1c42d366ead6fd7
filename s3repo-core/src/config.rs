use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::rebuild::RebuildState;

pub const DEFAULT_CONCURRENCY: usize = 8;

/// Everything one rebuild run needs apart from its collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildConfig {
    /// Store locator, e.g. `s3://bucket/folder` or `/bucket/folder`.
    pub repository_path: String,
    /// Local working copy of the bucket. Always wiped at the start of a run.
    pub staging_directory: PathBuf,
    pub phases: PhasePlan,
    /// Maximum number of concurrent transfers within a phase.
    pub concurrency: usize,
}

impl RebuildConfig {
    pub fn new(repository_path: impl Into<String>, staging_directory: impl Into<PathBuf>) -> Self {
        RebuildConfig {
            repository_path: repository_path.into(),
            staging_directory: staging_directory.into(),
            phases: PhasePlan::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_phases(mut self, phases: PhasePlan) -> Self {
        self.phases = phases;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn trace_loaded(&self) {
        info!(
            repository_path = %self.repository_path,
            staging_directory = %self.staging_directory.display(),
            concurrency = self.concurrency,
            validate = self.phases.is_enabled(OptionalPhase::Validate),
            prune = self.phases.is_enabled(OptionalPhase::Prune),
            publish = self.phases.is_enabled(OptionalPhase::Publish),
            "Loaded RebuildConfig"
        );
        debug!(?self, "RebuildConfig loaded (full debug)");
    }
}

/// Phases of the workflow that configuration may switch off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OptionalPhase {
    /// Check the downloaded index against the downloaded files.
    Validate,
    /// Remove superseded SNAPSHOT builds.
    Prune,
    /// Upload the rebuilt repository and delete superseded keys.
    Publish,
}

/// What the workflow does when it reaches a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseDecision {
    Run,
    /// Move past the phase without executing it.
    Skip,
    /// End the run successfully before this phase.
    Stop,
}

/// The set of enabled optional phases. Mandatory phases always run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhasePlan {
    enabled: BTreeSet<OptionalPhase>,
}

impl Default for PhasePlan {
    /// Validation and publishing on, snapshot pruning off.
    fn default() -> Self {
        PhasePlan {
            enabled: [OptionalPhase::Validate, OptionalPhase::Publish]
                .into_iter()
                .collect(),
        }
    }
}

impl PhasePlan {
    pub fn from_flags(do_not_validate: bool, remove_old_snapshots: bool, do_not_upload: bool) -> Self {
        let mut plan = PhasePlan {
            enabled: BTreeSet::new(),
        };
        plan.set(OptionalPhase::Validate, !do_not_validate);
        plan.set(OptionalPhase::Prune, remove_old_snapshots);
        plan.set(OptionalPhase::Publish, !do_not_upload);
        plan
    }

    pub fn set(&mut self, phase: OptionalPhase, enabled: bool) {
        if enabled {
            self.enabled.insert(phase);
        } else {
            self.enabled.remove(&phase);
        }
    }

    pub fn is_enabled(&self, phase: OptionalPhase) -> bool {
        self.enabled.contains(&phase)
    }

    /// Transition table: how the workflow treats entering `state`.
    ///
    /// Cleanup (`Done`) is tied to publishing; when uploads are off the run ends at `Rebuilt`
    /// and the store is never written to.
    pub fn decision(&self, state: RebuildState) -> PhaseDecision {
        let gate = |phase, off| {
            if self.is_enabled(phase) {
                PhaseDecision::Run
            } else {
                off
            }
        };
        match state {
            RebuildState::Init | RebuildState::Downloaded | RebuildState::Rebuilt => {
                PhaseDecision::Run
            }
            RebuildState::Validated => gate(OptionalPhase::Validate, PhaseDecision::Skip),
            RebuildState::Pruned => gate(OptionalPhase::Prune, PhaseDecision::Skip),
            RebuildState::Published | RebuildState::Done => {
                gate(OptionalPhase::Publish, PhaseDecision::Stop)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_to_decisions() {
        let plan = PhasePlan::from_flags(true, true, false);
        assert_eq!(plan.decision(RebuildState::Validated), PhaseDecision::Skip);
        assert_eq!(plan.decision(RebuildState::Pruned), PhaseDecision::Run);
        assert_eq!(plan.decision(RebuildState::Published), PhaseDecision::Run);
        assert_eq!(plan.decision(RebuildState::Done), PhaseDecision::Run);
    }

    #[test]
    fn dry_run_stops_before_publish_and_cleanup() {
        let plan = PhasePlan::from_flags(false, true, true);
        assert_eq!(plan.decision(RebuildState::Rebuilt), PhaseDecision::Run);
        assert_eq!(plan.decision(RebuildState::Published), PhaseDecision::Stop);
        assert_eq!(plan.decision(RebuildState::Done), PhaseDecision::Stop);
    }

    #[test]
    fn default_plan_matches_default_flags() {
        assert_eq!(PhasePlan::default(), PhasePlan::from_flags(false, false, false));
    }
}
