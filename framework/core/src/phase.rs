use crate::error::ErrorKind;

/// A step of the benchmark pipeline.
///
/// Phases run strictly in declaration order, see [Phase::ALL].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum Phase {
    Cleanup,
    Build,
    ClusterStart,
    EnvPrepare,
    LoadGenLaunch,
    RampWait,
    Collect,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Cleanup,
        Phase::Build,
        Phase::ClusterStart,
        Phase::EnvPrepare,
        Phase::LoadGenLaunch,
        Phase::RampWait,
        Phase::Collect,
    ];

    /// The state the controller is in while this phase runs.
    pub fn run_phase(self) -> RunPhase {
        match self {
            Phase::Cleanup => RunPhase::CleaningUp,
            Phase::Build => RunPhase::Building,
            Phase::ClusterStart => RunPhase::StartingCluster,
            Phase::EnvPrepare => RunPhase::PreparingEnv,
            Phase::LoadGenLaunch => RunPhase::LoadGenerating,
            Phase::RampWait => RunPhase::RampingUp,
            Phase::Collect => RunPhase::Collecting,
        }
    }

    /// Phases that commonly fail for transient reasons, like port contention or a flaky
    /// package index, and may be retried.
    pub fn is_transient(self) -> bool {
        matches!(self, Phase::ClusterStart | Phase::EnvPrepare)
    }

    /// The error kind reported when this phase fails for a reason other than cancellation.
    ///
    /// Cleanup never fails a run and the ramp wait can only be cancelled, so neither has one.
    pub fn failure_kind(self) -> Option<ErrorKind> {
        match self {
            Phase::Cleanup | Phase::RampWait => None,
            Phase::Build => Some(ErrorKind::BuildFailed),
            Phase::ClusterStart => Some(ErrorKind::ClusterStartFailed),
            Phase::EnvPrepare => Some(ErrorKind::EnvPrepareFailed),
            Phase::LoadGenLaunch => Some(ErrorKind::LoadGenLaunchFailed),
            Phase::Collect => Some(ErrorKind::CollectionFailed),
        }
    }
}

/// Lifecycle state of a run as tracked by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum RunPhase {
    Idle,
    CleaningUp,
    Building,
    StartingCluster,
    PreparingEnv,
    LoadGenerating,
    RampingUp,
    Collecting,
    Done,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_declared_in_pipeline_order() {
        let mut sorted = Phase::ALL;
        sorted.sort();
        assert_eq!(sorted, Phase::ALL);
        assert_eq!(Phase::ALL.first(), Some(&Phase::Cleanup));
        assert_eq!(Phase::ALL.last(), Some(&Phase::Collect));
    }

    #[test]
    fn only_cluster_start_and_env_prepare_are_transient() {
        let transient: Vec<Phase> = Phase::ALL
            .into_iter()
            .filter(|phase| phase.is_transient())
            .collect();
        assert_eq!(transient, vec![Phase::ClusterStart, Phase::EnvPrepare]);
    }

    #[test]
    fn every_phase_maps_to_a_running_state() {
        for phase in Phase::ALL {
            let state = phase.run_phase();
            assert!(
                !matches!(state, RunPhase::Idle | RunPhase::Done | RunPhase::Failed),
                "{phase} mapped to {state}"
            );
        }
    }

    #[test]
    fn display_uses_variant_name() {
        assert_eq!(Phase::ClusterStart.to_string(), "ClusterStart");
        assert_eq!(RunPhase::RampingUp.to_string(), "RampingUp");
    }
}
