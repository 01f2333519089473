//! Transactional storage session
//!
//! A session is a unit-of-work handle with three observable states:
//!
//! - `Clean`: ready for new work, no pending writes
//! - `Dirty`: writes applied inside the open transaction, not yet durable
//! - `Invalid`: a prior operation failed; the transaction is unusable until
//!   `rollback` runs
//!
//! The session is owned by exactly one pipeline invocation per batch and is
//! never shared across threads. `execute` and `flush` fail fast while the
//! session is `Invalid` instead of touching the broken transaction, which
//! mirrors backend behavior where reusing a failed transaction compounds the
//! original failure.
//!
//! Writes are grouped into step scopes (`begin_step` / `complete_step` /
//! `abort_step`, SQLite savepoints underneath). Aborting a step discards only
//! that step's writes; writes completed by earlier steps stay in the open
//! transaction until `commit` or `rollback`.

use crate::error::CommitError;
use crate::models::{ParseWarning, WarningCode, WorkflowDefinition};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Ready for new work
    Clean,
    /// Pending writes not yet durable
    Dirty,
    /// Unusable until rolled back
    Invalid,
}

/// One typed write applied through a session
#[derive(Debug, Clone)]
pub enum SessionWrite {
    /// Insert or refresh a discovered workflow definition, keyed on its id
    UpsertWorkflow(WorkflowDefinition),
    /// Record (or refresh) the import error for a source file
    RecordImportError { fileloc: String, message: String },
    /// Delete recorded import errors for files that now parse cleanly
    ClearImportErrors { filelocs: Vec<String> },
    /// Record (or refresh) one warning against a workflow
    RecordWarning {
        workflow_id: String,
        warning: ParseWarning,
    },
    /// Delete warnings no longer reported for a workflow
    PurgeStaleWarnings {
        workflow_id: String,
        keep_codes: Vec<WarningCode>,
    },
}

/// Transactional unit-of-work handle over the storage backend.
///
/// State transitions: `Clean -> Dirty` on a successful `execute`; any failing
/// `execute`/`flush`/`commit` moves the session to `Invalid`; `abort_step`
/// restores the state recorded by the matching `begin_step`; `rollback`
/// returns the session to `Clean` from any state.
#[async_trait]
pub trait StorageSession: Send {
    /// Current observable state
    fn state(&self) -> SessionState;

    /// Open a step scope. Writes executed inside the scope can be discarded
    /// by `abort_step` without touching earlier steps' writes.
    async fn begin_step(&mut self) -> Result<(), CommitError>;

    /// Close the current step scope, keeping its writes in the transaction
    async fn complete_step(&mut self) -> Result<(), CommitError>;

    /// Discard the current step's writes and restore the state recorded at
    /// `begin_step`.
    ///
    /// An `Err` here means the session is unusable for the remainder of the
    /// batch; the caller abandons the batch, never the process.
    async fn abort_step(&mut self) -> Result<(), CommitError>;

    /// Apply one write against the open transaction
    async fn execute(&mut self, write: SessionWrite) -> Result<(), CommitError>;

    /// Force pending writes to the backend without ending the transaction
    async fn flush(&mut self) -> Result<(), CommitError>;

    /// End the transaction durably
    async fn commit(&mut self) -> Result<(), CommitError>;

    /// Discard all pending writes and return to `Clean`.
    ///
    /// Callable from any state. An `Err` here means the session is unusable
    /// for the remainder of the batch; the caller abandons the batch, never
    /// the process.
    async fn rollback(&mut self) -> Result<(), CommitError>;
}

/// Produces a fresh session per batch
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn StorageSession>, CommitError>;
}

/// SQLite-backed session over a pooled connection.
///
/// The transaction begins lazily on the first `execute`, so an idle batch
/// never holds a write lock.
pub struct SqliteSession {
    pool: SqlitePool,
    tx: Option<Transaction<'static, Sqlite>>,
    state: SessionState,
    step_active: bool,
    /// State observed when the current step scope was opened; `abort_step`
    /// restores it
    step_entry_state: SessionState,
}

impl SqliteSession {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            tx: None,
            state: SessionState::Clean,
            step_active: false,
            step_entry_state: SessionState::Clean,
        }
    }

    /// Begin the transaction if one is not already open.
    ///
    /// A failed begin leaves the session state untouched: no transaction was
    /// opened, so there is nothing to invalidate and the caller may retry.
    async fn ensure_transaction(&mut self) -> Result<&mut Transaction<'static, Sqlite>, CommitError> {
        if self.tx.is_none() {
            match self.pool.begin().await {
                Ok(tx) => self.tx = Some(tx),
                Err(e) => return Err(CommitError::from_sqlx(e)),
            }
        }
        self.tx.as_mut().ok_or(CommitError::InvalidSession)
    }

    async fn apply_write(
        tx: &mut Transaction<'static, Sqlite>,
        write: SessionWrite,
    ) -> Result<(), CommitError> {
        let now = Utc::now().to_rfc3339();

        match write {
            SessionWrite::UpsertWorkflow(workflow) => {
                // Malformed payloads fail serialization here, before any SQL
                // is sent: a fatal failure, never retried.
                let definition_json = serde_json::to_string(&workflow)
                    .map_err(|e| CommitError::Fatal(format!("Workflow serialization: {}", e)))?;

                sqlx::query(
                    r#"
                    INSERT INTO workflows (workflow_id, guid, name, fileloc, definition, task_count, last_parsed_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(workflow_id) DO UPDATE SET
                        name = excluded.name,
                        fileloc = excluded.fileloc,
                        definition = excluded.definition,
                        task_count = excluded.task_count,
                        last_parsed_at = excluded.last_parsed_at,
                        updated_at = CURRENT_TIMESTAMP
                    "#,
                )
                .bind(&workflow.id)
                .bind(Uuid::new_v4().to_string())
                .bind(&workflow.name)
                .bind(&workflow.fileloc)
                .bind(&definition_json)
                .bind(workflow.tasks.len() as i64)
                .bind(&now)
                .execute(&mut **tx)
                .await
                .map_err(CommitError::from_sqlx)?;
            }

            SessionWrite::RecordImportError { fileloc, message } => {
                sqlx::query(
                    r#"
                    INSERT INTO import_errors (fileloc, message, recorded_at)
                    VALUES (?, ?, ?)
                    ON CONFLICT(fileloc) DO UPDATE SET
                        message = excluded.message,
                        recorded_at = excluded.recorded_at
                    "#,
                )
                .bind(&fileloc)
                .bind(&message)
                .bind(&now)
                .execute(&mut **tx)
                .await
                .map_err(CommitError::from_sqlx)?;
            }

            SessionWrite::ClearImportErrors { filelocs } => {
                for fileloc in &filelocs {
                    sqlx::query("DELETE FROM import_errors WHERE fileloc = ?")
                        .bind(fileloc)
                        .execute(&mut **tx)
                        .await
                        .map_err(CommitError::from_sqlx)?;
                }
            }

            SessionWrite::RecordWarning {
                workflow_id,
                warning,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO workflow_warnings (workflow_id, code, message, recorded_at)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(workflow_id, code) DO UPDATE SET
                        message = excluded.message,
                        recorded_at = excluded.recorded_at
                    "#,
                )
                .bind(&workflow_id)
                .bind(warning.code.as_str())
                .bind(&warning.message)
                .bind(&now)
                .execute(&mut **tx)
                .await
                .map_err(CommitError::from_sqlx)?;
            }

            SessionWrite::PurgeStaleWarnings {
                workflow_id,
                keep_codes,
            } => {
                if keep_codes.is_empty() {
                    sqlx::query("DELETE FROM workflow_warnings WHERE workflow_id = ?")
                        .bind(&workflow_id)
                        .execute(&mut **tx)
                        .await
                        .map_err(CommitError::from_sqlx)?;
                } else {
                    let placeholders = vec!["?"; keep_codes.len()].join(", ");
                    let sql = format!(
                        "DELETE FROM workflow_warnings WHERE workflow_id = ? AND code NOT IN ({})",
                        placeholders
                    );
                    let mut query = sqlx::query(&sql).bind(&workflow_id);
                    for code in &keep_codes {
                        query = query.bind(code.as_str());
                    }
                    query
                        .execute(&mut **tx)
                        .await
                        .map_err(CommitError::from_sqlx)?;
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl StorageSession for SqliteSession {
    fn state(&self) -> SessionState {
        self.state
    }

    async fn begin_step(&mut self) -> Result<(), CommitError> {
        if self.state == SessionState::Invalid {
            return Err(CommitError::InvalidSession);
        }

        let entry_state = self.state;
        let tx = self.ensure_transaction().await?;
        match sqlx::query("SAVEPOINT step").execute(&mut **tx).await {
            Ok(_) => {
                self.step_entry_state = entry_state;
                self.step_active = true;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Invalid;
                Err(CommitError::from_sqlx(e))
            }
        }
    }

    async fn complete_step(&mut self) -> Result<(), CommitError> {
        if !self.step_active {
            return Ok(());
        }
        self.step_active = false;

        let tx = match self.tx.as_mut() {
            Some(tx) => tx,
            None => return Ok(()),
        };
        match sqlx::query("RELEASE step").execute(&mut **tx).await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.state = SessionState::Invalid;
                Err(CommitError::from_sqlx(e))
            }
        }
    }

    async fn abort_step(&mut self) -> Result<(), CommitError> {
        if !self.step_active {
            return Ok(());
        }
        self.step_active = false;

        let tx = match self.tx.as_mut() {
            Some(tx) => tx,
            None => {
                self.state = self.step_entry_state;
                return Ok(());
            }
        };

        // ROLLBACK TO unwinds the step's writes but keeps the savepoint on
        // the stack; RELEASE then discards the name. The outer transaction
        // and every earlier step's writes stay open.
        if let Err(e) = sqlx::query("ROLLBACK TO step").execute(&mut **tx).await {
            self.state = SessionState::Invalid;
            return Err(CommitError::from_sqlx(e));
        }
        match sqlx::query("RELEASE step").execute(&mut **tx).await {
            Ok(_) => {
                self.state = self.step_entry_state;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Invalid;
                Err(CommitError::from_sqlx(e))
            }
        }
    }

    async fn execute(&mut self, write: SessionWrite) -> Result<(), CommitError> {
        if self.state == SessionState::Invalid {
            return Err(CommitError::InvalidSession);
        }

        let tx = self.ensure_transaction().await?;
        match Self::apply_write(tx, write).await {
            Ok(()) => {
                self.state = SessionState::Dirty;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Invalid;
                Err(e)
            }
        }
    }

    async fn flush(&mut self) -> Result<(), CommitError> {
        match self.state {
            SessionState::Invalid => Err(CommitError::InvalidSession),
            // Nothing pending; flushing a clean session is a no-op
            SessionState::Clean => Ok(()),
            SessionState::Dirty => {
                // Statements were applied eagerly when executed; this is a
                // round-trip barrier verifying the transaction is still
                // usable before the caller commits.
                let tx = self.ensure_transaction().await?;
                match sqlx::query("SELECT 1").execute(&mut **tx).await {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        self.state = SessionState::Invalid;
                        Err(CommitError::from_sqlx(e))
                    }
                }
            }
        }
    }

    async fn commit(&mut self) -> Result<(), CommitError> {
        if self.state == SessionState::Invalid {
            return Err(CommitError::InvalidSession);
        }

        self.step_active = false;
        match self.tx.take() {
            None => {
                self.state = SessionState::Clean;
                Ok(())
            }
            Some(tx) => match tx.commit().await {
                Ok(()) => {
                    self.state = SessionState::Clean;
                    Ok(())
                }
                Err(e) => {
                    self.state = SessionState::Invalid;
                    Err(CommitError::from_sqlx(e))
                }
            },
        }
    }

    async fn rollback(&mut self) -> Result<(), CommitError> {
        self.step_active = false;
        match self.tx.take() {
            None => {
                self.state = SessionState::Clean;
                Ok(())
            }
            Some(tx) => match tx.rollback().await {
                Ok(()) => {
                    self.state = SessionState::Clean;
                    Ok(())
                }
                Err(e) => {
                    // Session stays unusable; the batch gets abandoned
                    self.state = SessionState::Invalid;
                    Err(CommitError::from_sqlx(e))
                }
            },
        }
    }
}

/// Opens SQLite sessions over a shared pool
#[derive(Clone)]
pub struct SqliteSessionFactory {
    pool: SqlitePool,
}

impl SqliteSessionFactory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionFactory for SqliteSessionFactory {
    async fn open_session(&self) -> Result<Box<dyn StorageSession>, CommitError> {
        Ok(Box::new(SqliteSession::new(self.pool.clone())))
    }
}
