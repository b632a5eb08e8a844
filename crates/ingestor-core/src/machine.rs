//! The per-artifact state transition decision.
//!
//! A plain exhaustive match over `(TaskAction, ArtifactState)` rather than
//! a reflective `getattr(self, f"handle_{state}")`-style dispatch: adding a
//! new state or action is a compile error everywhere this match isn't
//! updated, instead of a silent no-op at runtime.

use ingestor_types::{ArtifactState, TaskAction};

/// What the scheduler should do next for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// `task.action` is not one the control plane acts on; log and move on.
    Skip { reason: String },
    /// Verify and open (or update) a staging pull request.
    Stage,
    /// Staging PR exists; nothing to do until it is approved and merged.
    AwaitApproval,
    /// PR approved and merged; move the artifact into `approved/`.
    Approve,
    /// Run the CVMFS ingest script.
    Ingest,
    /// `ingested` or `rejected`: nothing further ever happens.
    Terminal,
}

pub fn decide(action: TaskAction, state: ArtifactState) -> StepOutcome {
    match action {
        TaskAction::Nop | TaskAction::Delete | TaskAction::Update | TaskAction::Unknown => {
            StepOutcome::Skip { reason: format!("task action '{action}' is not acted on") }
        }
        TaskAction::Add => match state {
            ArtifactState::New => StepOutcome::Stage,
            ArtifactState::Staged => StepOutcome::AwaitApproval,
            ArtifactState::Approved => StepOutcome::Ingest,
            ArtifactState::Ingested | ArtifactState::Rejected | ArtifactState::Unknown => StepOutcome::Terminal,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_in_new_stages() {
        assert_eq!(decide(TaskAction::Add, ArtifactState::New), StepOutcome::Stage);
    }

    #[test]
    fn add_in_staged_awaits_approval() {
        assert_eq!(decide(TaskAction::Add, ArtifactState::Staged), StepOutcome::AwaitApproval);
    }

    #[test]
    fn add_in_approved_ingests() {
        assert_eq!(decide(TaskAction::Add, ArtifactState::Approved), StepOutcome::Ingest);
    }

    #[test]
    fn add_in_terminal_states_is_terminal() {
        assert_eq!(decide(TaskAction::Add, ArtifactState::Ingested), StepOutcome::Terminal);
        assert_eq!(decide(TaskAction::Add, ArtifactState::Rejected), StepOutcome::Terminal);
        assert_eq!(decide(TaskAction::Add, ArtifactState::Unknown), StepOutcome::Terminal);
    }

    #[test]
    fn non_add_actions_are_always_skipped() {
        for state in ArtifactState::DIRECTORY_STATES {
            for action in [TaskAction::Nop, TaskAction::Delete, TaskAction::Update, TaskAction::Unknown] {
                assert!(matches!(decide(action, state), StepOutcome::Skip { .. }));
            }
        }
    }
}
