//! Sub-operations and the isolation wrapper
//!
//! Each sub-operation is one self-contained unit of work within a batch. The
//! isolation wrapper gives every one of them identical failure semantics:
//! classify, abort the failed attempt's step scope, retry transient failures
//! under the policy bound, and always return a result instead of re-raising.
//! Every attempt runs inside its own step scope (a SQLite savepoint), so
//! aborting it discards only that attempt's writes: a failure in one
//! sub-operation can neither poison the session for the next one nor destroy
//! the writes of sub-operations that already succeeded.

use crate::commit::retry::RetryPolicy;
use crate::commit::session::{SessionState, SessionWrite, StorageSession};
use crate::error::{CommitError, ErrorClass};
use crate::models::{ParsingResult, SubOperationResult};
use async_trait::async_trait;
use uuid::Uuid;

/// One isolated unit of work within a batch
#[async_trait]
pub trait SubOperation: Sync {
    /// Operation name for logging and the outcome record
    fn name(&self) -> &'static str;

    /// Run the operation body against the session.
    ///
    /// The body performs its writes through `execute` and must not commit,
    /// flush, or roll back; the wrapper and pipeline own those.
    async fn apply(&self, session: &mut dyn StorageSession) -> Result<(), CommitError>;
}

/// Result of running one sub-operation under the isolation wrapper
pub struct IsolatedResult {
    pub result: SubOperationResult,
    /// True when the step abort itself failed and the session is unusable
    /// for the remainder of the batch
    pub session_abandoned: bool,
}

/// Run a sub-operation under the uniform retry/abort/log discipline.
///
/// Never re-raises past this boundary: every failure path produces a
/// classified `SubOperationResult` and leaves the session restored to the
/// state it held before the operation started (or flags the batch abandoned
/// when the step abort itself failed).
pub async fn run_isolated(
    op: &dyn SubOperation,
    session: &mut dyn StorageSession,
    policy: &RetryPolicy,
    batch_id: Uuid,
) -> IsolatedResult {
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        if attempts > 1 {
            tracing::debug!(
                operation = op.name(),
                batch_id = %batch_id,
                attempt = attempts,
                "Retrying sub-operation"
            );
        }

        if let Err(err) = session.begin_step().await {
            let class = err.class();

            // No scope was opened, so there is nothing to abort. A session
            // left Invalid here cannot isolate further work for this batch.
            if session.state() == SessionState::Invalid {
                tracing::error!(
                    operation = op.name(),
                    batch_id = %batch_id,
                    attempt = attempts,
                    error = %err,
                    "Could not open step scope; abandoning batch"
                );
                return IsolatedResult {
                    result: failure_result(attempts, &err, class),
                    session_abandoned: true,
                };
            }

            if policy.should_retry(attempts, class) {
                let delay = policy.backoff_delay(attempts);
                tracing::warn!(
                    operation = op.name(),
                    batch_id = %batch_id,
                    attempt = attempts,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure opening step scope, will retry after backoff"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            log_exhausted(op, batch_id, attempts, &err, class);
            return IsolatedResult {
                result: failure_result(attempts, &err, class),
                session_abandoned: false,
            };
        }

        let err = match op.apply(session).await {
            Ok(()) => match session.complete_step().await {
                Ok(()) => {
                    if attempts > 1 {
                        tracing::info!(
                            operation = op.name(),
                            batch_id = %batch_id,
                            attempts,
                            "Sub-operation succeeded after retry"
                        );
                    }
                    return IsolatedResult {
                        result: SubOperationResult::Success { attempts },
                        session_abandoned: false,
                    };
                }
                // A step that cannot be closed cleanly counts as a failed
                // attempt; its writes are discarded below.
                Err(err) => err,
            },
            Err(err) => err,
        };

        let class = err.class();

        // Partial writes of this attempt are discarded before anything else
        // touches the session again; earlier steps' writes stay in place.
        if let Err(abort_err) = session.abort_step().await {
            tracing::error!(
                operation = op.name(),
                batch_id = %batch_id,
                attempt = attempts,
                error = %err,
                abort_error = %abort_err,
                "Step abort failed; abandoning batch"
            );
            return IsolatedResult {
                result: failure_result(attempts, &err, class),
                session_abandoned: true,
            };
        }

        if policy.should_retry(attempts, class) {
            let delay = policy.backoff_delay(attempts);
            tracing::warn!(
                operation = op.name(),
                batch_id = %batch_id,
                attempt = attempts,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "Transient storage failure, will retry after backoff"
            );
            tokio::time::sleep(delay).await;
            continue;
        }

        log_exhausted(op, batch_id, attempts, &err, class);
        return IsolatedResult {
            result: failure_result(attempts, &err, class),
            session_abandoned: false,
        };
    }
}

fn log_exhausted(
    op: &dyn SubOperation,
    batch_id: Uuid,
    attempts: u32,
    err: &CommitError,
    class: ErrorClass,
) {
    match class {
        ErrorClass::Transient => tracing::error!(
            operation = op.name(),
            batch_id = %batch_id,
            attempts,
            error = %err,
            "Sub-operation failed: retry budget exhausted"
        ),
        ErrorClass::Fatal => tracing::error!(
            operation = op.name(),
            batch_id = %batch_id,
            attempts,
            error = %err,
            "Sub-operation failed: fatal error, not retried"
        ),
    }
}

fn failure_result(attempts: u32, err: &CommitError, class: ErrorClass) -> SubOperationResult {
    match class {
        ErrorClass::Transient => SubOperationResult::TransientFailure {
            attempts,
            detail: err.to_string(),
        },
        ErrorClass::Fatal => SubOperationResult::FatalFailure {
            detail: err.to_string(),
        },
    }
}

/// Records per-file import errors and clears errors for files that now parse
/// cleanly
pub struct RecordImportErrors<'a> {
    pub batch: &'a ParsingResult,
}

#[async_trait]
impl SubOperation for RecordImportErrors<'_> {
    fn name(&self) -> &'static str {
        "record-import-errors"
    }

    async fn apply(&self, session: &mut dyn StorageSession) -> Result<(), CommitError> {
        for (fileloc, message) in &self.batch.import_errors_by_file {
            session
                .execute(SessionWrite::RecordImportError {
                    fileloc: fileloc.clone(),
                    message: message.clone(),
                })
                .await?;
        }

        // A file that parsed this time must not keep showing a stale error
        let cleared: Vec<String> = self
            .batch
            .parsed_file_locations
            .iter()
            .cloned()
            .collect();
        if !cleared.is_empty() {
            session
                .execute(SessionWrite::ClearImportErrors { filelocs: cleared })
                .await?;
        }

        Ok(())
    }
}

/// Records per-workflow warnings and purges warnings no longer reported
pub struct RecordWarnings<'a> {
    pub batch: &'a ParsingResult,
}

#[async_trait]
impl SubOperation for RecordWarnings<'_> {
    fn name(&self) -> &'static str {
        "record-warnings"
    }

    async fn apply(&self, session: &mut dyn StorageSession) -> Result<(), CommitError> {
        for (workflow_id, warnings) in &self.batch.warnings_by_workflow {
            for warning in warnings {
                session
                    .execute(SessionWrite::RecordWarning {
                        workflow_id: workflow_id.clone(),
                        warning: warning.clone(),
                    })
                    .await?;
            }

            session
                .execute(SessionWrite::PurgeStaleWarnings {
                    workflow_id: workflow_id.clone(),
                    keep_codes: warnings.iter().map(|w| w.code).collect(),
                })
                .await?;
        }

        // Workflows that parsed without warnings lose any previously recorded ones
        for workflow in &self.batch.discovered_workflows {
            if !self.batch.warnings_by_workflow.contains_key(&workflow.id) {
                session
                    .execute(SessionWrite::PurgeStaleWarnings {
                        workflow_id: workflow.id.clone(),
                        keep_codes: Vec::new(),
                    })
                    .await?;
            }
        }

        Ok(())
    }
}

/// Persists newly discovered workflow definitions (upsert keyed on workflow id)
pub struct PersistWorkflows<'a> {
    pub batch: &'a ParsingResult,
}

#[async_trait]
impl SubOperation for PersistWorkflows<'_> {
    fn name(&self) -> &'static str {
        "persist-workflows"
    }

    async fn apply(&self, session: &mut dyn StorageSession) -> Result<(), CommitError> {
        for workflow in &self.batch.discovered_workflows {
            session
                .execute(SessionWrite::UpsertWorkflow(workflow.clone()))
                .await?;
        }
        Ok(())
    }
}

/// Adapter putting the pipeline-level flush under the same isolation
/// discipline as the three write operations
pub(crate) struct FlushStep;

#[async_trait]
impl SubOperation for FlushStep {
    fn name(&self) -> &'static str {
        "flush"
    }

    async fn apply(&self, session: &mut dyn StorageSession) -> Result<(), CommitError> {
        session.flush().await
    }
}
