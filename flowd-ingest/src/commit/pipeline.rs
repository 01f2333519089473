//! Commit pipeline sequencing
//!
//! Runs the three sub-operations for one batch in a fixed order, each under
//! the isolation wrapper, then flushes under the same discipline. Later
//! sub-operations run regardless of earlier outcomes: partial recording is
//! strictly better than none. Each step's writes live in their own scope, so
//! a failing step discards only its own work. The single exception is an
//! abandoned session (the step abort itself failed), after which no further
//! step may touch it.
//!
//! No error arising from any step escapes `run`. Commit remains owned by the
//! caller; the pipeline only ever flushes and aborts step scopes.

use crate::commit::ops::{
    run_isolated, FlushStep, PersistWorkflows, RecordImportErrors, RecordWarnings, SubOperation,
};
use crate::commit::retry::RetryPolicy;
use crate::commit::session::StorageSession;
use crate::models::{BatchCommitOutcome, ParsingResult, SubOperationResult};

/// Sequences the sub-operations for one batch and produces the outcome
#[derive(Debug, Clone)]
pub struct CommitPipeline {
    policy: RetryPolicy,
}

impl CommitPipeline {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Commit one batch's parsing result through the given session.
    ///
    /// The session is borrowed for the duration of the batch and returned in
    /// a well-defined state: Dirty with flushed work ready for the caller to
    /// commit, Clean when no step's writes survived, or Invalid only when the
    /// batch was abandoned (in which case the caller discards the session).
    pub async fn run(
        &self,
        batch: &ParsingResult,
        session: &mut dyn StorageSession,
    ) -> BatchCommitOutcome {
        let batch_id = batch.batch_id;

        tracing::debug!(
            batch_id = %batch_id,
            parsed_files = batch.parsed_file_locations.len(),
            import_errors = batch.import_errors_by_file.len(),
            workflows = batch.discovered_workflows.len(),
            warned_workflows = batch.warnings_by_workflow.len(),
            "Committing batch"
        );

        let mut abandoned = false;
        let mut results: [Option<SubOperationResult>; 4] = [None, None, None, None];

        let steps: [&dyn SubOperation; 4] = [
            &RecordImportErrors { batch },
            &RecordWarnings { batch },
            &PersistWorkflows { batch },
            &FlushStep,
        ];

        for (slot, step) in steps.into_iter().enumerate() {
            if abandoned {
                break;
            }

            let isolated = run_isolated(step, session, &self.policy, batch_id).await;
            abandoned = isolated.session_abandoned;
            results[slot] = Some(isolated.result);
        }

        let [import_errors, warnings, workflows, flush] = results;

        BatchCommitOutcome {
            batch_id,
            import_errors,
            warnings,
            workflows,
            flush,
            final_session_state: session.state(),
            abandoned,
        }
    }
}
