//! Batch commit outcome types
//!
//! The outcome aggregates every sub-operation result for one batch. It is
//! serializable so observability collaborators can alert on sustained storage
//! degradation without parsing log text.

use crate::commit::session::SessionState;
use serde::Serialize;
use uuid::Uuid;

/// Outcome of one isolated sub-operation (including its retry loop)
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SubOperationResult {
    /// Operation body completed; attempts counts the calls made (1 = first try)
    Success { attempts: u32 },
    /// Transient failures exhausted the retry budget
    TransientFailure { attempts: u32, detail: String },
    /// Fatal failure; never retried
    FatalFailure { detail: String },
}

impl SubOperationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SubOperationResult::Success { .. })
    }

    /// Number of attempts made (fatal failures always make exactly one)
    pub fn attempts(&self) -> u32 {
        match self {
            SubOperationResult::Success { attempts } => *attempts,
            SubOperationResult::TransientFailure { attempts, .. } => *attempts,
            SubOperationResult::FatalFailure { .. } => 1,
        }
    }
}

/// Aggregate outcome of committing one batch.
///
/// `None` for a step means the step was never attempted because the batch was
/// abandoned (rollback itself failed) before reaching it. Never discarded
/// silently: the worker loop logs every outcome.
#[derive(Debug, Clone, Serialize)]
pub struct BatchCommitOutcome {
    /// Batch this outcome belongs to
    pub batch_id: Uuid,
    /// Result of recording per-file import errors
    pub import_errors: Option<SubOperationResult>,
    /// Result of recording per-workflow warnings
    pub warnings: Option<SubOperationResult>,
    /// Result of persisting discovered workflow definitions
    pub workflows: Option<SubOperationResult>,
    /// Result of the pipeline-level flush
    pub flush: Option<SubOperationResult>,
    /// Session state observed when the pipeline returned
    pub final_session_state: SessionState,
    /// True when a failed rollback made the session unusable mid-batch
    pub abandoned: bool,
}

impl BatchCommitOutcome {
    /// True when the session still holds flushable work the caller may commit.
    ///
    /// The pipeline never commits on behalf of its caller; the worker loop
    /// uses this to decide between commit and discard.
    pub fn can_commit(&self) -> bool {
        !self.abandoned
            && self.flush.as_ref().is_some_and(|f| f.is_success())
            && self.final_session_state != SessionState::Invalid
    }

    /// True when every attempted step succeeded
    pub fn fully_successful(&self) -> bool {
        !self.abandoned
            && [&self.import_errors, &self.warnings, &self.workflows, &self.flush]
                .iter()
                .all(|step| step.as_ref().is_some_and(|r| r.is_success()))
    }

    /// Count of steps that failed or were never reached
    pub fn failure_count(&self) -> usize {
        [&self.import_errors, &self.warnings, &self.workflows, &self.flush]
            .iter()
            .filter(|step| !step.as_ref().is_some_and(|r| r.is_success()))
            .count()
    }
}
