//! Artifact and engine state machines
//!
//! Artifact: PENDING → VERIFYING → {VERIFIED | FAILED | DISCARDED}
//! Engine:   IDLE → RUNNING → COMPLETED (→ RUNNING for the next run)

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Per-artifact verification state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactState {
    /// Waiting for a worker
    Pending,
    /// A worker is checking the artifact
    Verifying,
    /// Outcome recorded and not fatal
    Verified,
    /// Outcome recorded and fatal
    Failed,
    /// Work abandoned by cancellation; no outcome recorded
    Discarded,
}

impl ArtifactState {
    pub fn can_transition_to(&self, target: ArtifactState) -> bool {
        matches!(
            (self, target),
            (ArtifactState::Pending, ArtifactState::Verifying)
                | (ArtifactState::Verifying, ArtifactState::Verified)
                | (ArtifactState::Verifying, ArtifactState::Failed)
                | (ArtifactState::Verifying, ArtifactState::Discarded)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ArtifactState::Verified | ArtifactState::Failed | ArtifactState::Discarded
        )
    }
}

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    Idle,
    Running,
    Completed,
}

impl EngineState {
    pub fn can_transition_to(&self, target: EngineState) -> bool {
        matches!(
            (self, target),
            (EngineState::Idle, EngineState::Running)
                | (EngineState::Running, EngineState::Completed)
                | (EngineState::Running, EngineState::Idle)
                | (EngineState::Completed, EngineState::Running)
        )
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid transition for artifact #{index} from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub index: usize,
    pub from: ArtifactState,
    pub to: ArtifactState,
}

/// States of every artifact in a run, indexed by input position
#[derive(Debug)]
pub struct RunProgress {
    states: Mutex<Vec<ArtifactState>>,
}

impl RunProgress {
    pub fn new(len: usize) -> Self {
        Self {
            states: Mutex::new(vec![ArtifactState::Pending; len]),
        }
    }

    pub fn transition(&self, index: usize, to: ArtifactState) -> Result<(), InvalidTransition> {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let from = states[index];
        if !from.can_transition_to(to) {
            return Err(InvalidTransition { index, from, to });
        }
        states[index] = to;
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<ArtifactState> {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Artifacts that ended without a recorded outcome
    pub fn unfinished(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|s| matches!(s, ArtifactState::Pending | ArtifactState::Discarded))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_transitions() {
        assert!(ArtifactState::Pending.can_transition_to(ArtifactState::Verifying));
        assert!(ArtifactState::Verifying.can_transition_to(ArtifactState::Verified));
        assert!(ArtifactState::Verifying.can_transition_to(ArtifactState::Failed));
        assert!(ArtifactState::Verifying.can_transition_to(ArtifactState::Discarded));

        assert!(!ArtifactState::Pending.can_transition_to(ArtifactState::Verified));
        assert!(!ArtifactState::Failed.can_transition_to(ArtifactState::Verifying));
        assert!(!ArtifactState::Failed.can_transition_to(ArtifactState::Verified));
        assert!(!ArtifactState::Verified.can_transition_to(ArtifactState::Failed));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ArtifactState::Pending.is_terminal());
        assert!(!ArtifactState::Verifying.is_terminal());
        assert!(ArtifactState::Verified.is_terminal());
        assert!(ArtifactState::Failed.is_terminal());
        assert!(ArtifactState::Discarded.is_terminal());
    }

    #[test]
    fn test_engine_transitions() {
        assert!(EngineState::Idle.can_transition_to(EngineState::Running));
        assert!(EngineState::Running.can_transition_to(EngineState::Completed));
        assert!(EngineState::Completed.can_transition_to(EngineState::Running));
        assert!(!EngineState::Running.can_transition_to(EngineState::Running));
        assert!(!EngineState::Idle.can_transition_to(EngineState::Completed));
    }

    #[test]
    fn test_progress_rejects_leaving_failed() {
        let progress = RunProgress::new(2);
        progress.transition(0, ArtifactState::Verifying).unwrap();
        progress.transition(0, ArtifactState::Failed).unwrap();

        let err = progress.transition(0, ArtifactState::Verified).unwrap_err();
        assert_eq!(
            err,
            InvalidTransition {
                index: 0,
                from: ArtifactState::Failed,
                to: ArtifactState::Verified,
            }
        );
        assert_eq!(progress.unfinished(), 1);
    }
}
