//! Worker loop
//!
//! The outer, indefinitely repeating control loop: obtain a batch and a fresh
//! session, run the commit pipeline, log the outcome, release the session,
//! continue. A batch with partial or total commit failure is recorded and the
//! loop moves on; only an external shutdown signal (cancellation token) or a
//! programming fault (panic) ends it.

use crate::commit::pipeline::CommitPipeline;
use crate::commit::session::SessionFactory;
use crate::models::{BatchCommitOutcome, ParsingResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Supplies the next batch of parsing results to commit.
///
/// `Ok(None)` means no work is available right now; the loop idles for one
/// poll interval and asks again.
#[async_trait]
pub trait BatchSource: Send {
    async fn next_batch(&mut self) -> anyhow::Result<Option<ParsingResult>>;
}

/// The long-lived ingest worker
pub struct WorkerLoop {
    source: Box<dyn BatchSource>,
    factory: Arc<dyn SessionFactory>,
    pipeline: CommitPipeline,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl WorkerLoop {
    pub fn new(
        source: Box<dyn BatchSource>,
        factory: Arc<dyn SessionFactory>,
        pipeline: CommitPipeline,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            factory,
            pipeline,
            poll_interval,
            shutdown,
        }
    }

    /// Run until the shutdown token is cancelled.
    ///
    /// No storage failure terminates this loop. Panics propagate: a fault in
    /// the pipeline's own safety contract must not be papered over.
    pub async fn run(&mut self) {
        tracing::info!("Worker loop started");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let batch = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                batch = self.source.next_batch() => batch,
            };

            match batch {
                Err(e) => {
                    // The batch source is an external collaborator; its
                    // failures are logged and the loop idles until next poll.
                    tracing::error!(error = %e, "Batch source failed; will poll again");
                    self.idle().await;
                }
                Ok(None) => {
                    self.idle().await;
                }
                Ok(Some(batch)) => {
                    self.commit_batch(batch).await;
                    self.idle().await;
                }
            }
        }

        tracing::info!("Worker loop stopped");
    }

    /// Commit one batch end to end: open a session, run the pipeline, log
    /// the outcome, commit or discard.
    pub async fn commit_batch(&self, batch: ParsingResult) -> Option<BatchCommitOutcome> {
        let batch_id = batch.batch_id;

        let mut session = match self.factory.open_session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(batch_id = %batch_id, error = %e, "Failed to open storage session; batch skipped");
                return None;
            }
        };

        let outcome = self.pipeline.run(&batch, session.as_mut()).await;
        log_outcome(&outcome);

        if outcome.can_commit() {
            match session.commit().await {
                Ok(()) => {
                    tracing::debug!(batch_id = %batch_id, "Batch committed");
                }
                Err(e) => {
                    tracing::error!(batch_id = %batch_id, error = %e, "Commit failed; discarding batch");
                    // Best effort: a failed rollback here only loses this
                    // already-lost batch, never the process.
                    if let Err(rollback_err) = session.rollback().await {
                        tracing::warn!(batch_id = %batch_id, error = %rollback_err, "Rollback after failed commit also failed");
                    }
                }
            }
        } else {
            // Every failure path inside the pipeline already rolled back (or
            // abandoned the session); nothing to release beyond dropping it.
            tracing::debug!(batch_id = %batch_id, abandoned = outcome.abandoned, "Session discarded without commit");
        }

        Some(outcome)
    }

    async fn idle(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.poll_interval) => {}
        }
    }
}

/// Log a batch outcome. Successes and failures both; no outcome is silent.
fn log_outcome(outcome: &BatchCommitOutcome) {
    let detail = serde_json::to_string(outcome)
        .unwrap_or_else(|e| format!("<outcome serialization failed: {}>", e));

    if outcome.fully_successful() {
        tracing::info!(
            batch_id = %outcome.batch_id,
            outcome = %detail,
            "Batch commit succeeded"
        );
    } else {
        tracing::warn!(
            batch_id = %outcome.batch_id,
            failures = outcome.failure_count(),
            abandoned = outcome.abandoned,
            outcome = %detail,
            "Batch commit degraded"
        );
    }
}
