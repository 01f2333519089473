//! Test helpers
//!
//! A scripted storage session for driving the commit pipeline through every
//! failure shape without a real backend, plus a factory that hands out
//! scripted sessions in order.

// Not every test binary uses every helper
#![allow(dead_code)]

use async_trait::async_trait;
use flowd_ingest::commit::{SessionFactory, SessionState, SessionWrite, StorageSession};
use flowd_ingest::error::CommitError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Scripted response for one backend call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Ok,
    Transient,
    Fatal,
}

/// Call counters shared with the test after the session is consumed
#[derive(Default)]
pub struct Calls {
    pub execute: AtomicUsize,
    pub flush: AtomicUsize,
    pub commit: AtomicUsize,
    pub rollback: AtomicUsize,
}

/// Writes that survived to a successful commit
pub type Committed = Arc<Mutex<Vec<String>>>;

/// Scripted in-memory session honoring the Clean/Dirty/Invalid contract.
///
/// Each call pops the next plan from its queue; an empty queue means Ok.
pub struct MockSession {
    state: SessionState,
    execute_plan: Mutex<VecDeque<Plan>>,
    flush_plan: Mutex<VecDeque<Plan>>,
    commit_plan: Mutex<VecDeque<Plan>>,
    rollback_fails: bool,
    pending: Vec<String>,
    /// Pending length and state captured at `begin_step`; `abort_step`
    /// truncates back to them
    step_mark: Option<(usize, SessionState)>,
    /// Session state observed at the start of each execute call
    pub states_seen: Vec<SessionState>,
    pub calls: Arc<Calls>,
    pub committed: Committed,
}

impl MockSession {
    pub fn ok() -> Self {
        Self::scripted(Vec::new(), Vec::new(), Vec::new())
    }

    pub fn scripted(execute: Vec<Plan>, flush: Vec<Plan>, commit: Vec<Plan>) -> Self {
        Self {
            state: SessionState::Clean,
            execute_plan: Mutex::new(execute.into()),
            flush_plan: Mutex::new(flush.into()),
            commit_plan: Mutex::new(commit.into()),
            rollback_fails: false,
            pending: Vec::new(),
            step_mark: None,
            states_seen: Vec::new(),
            calls: Arc::new(Calls::default()),
            committed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_failing_rollback(mut self) -> Self {
        self.rollback_fails = true;
        self
    }

    fn next(plan: &Mutex<VecDeque<Plan>>) -> Plan {
        plan.lock().unwrap().pop_front().unwrap_or(Plan::Ok)
    }

    fn describe(write: &SessionWrite) -> String {
        match write {
            SessionWrite::UpsertWorkflow(wf) => format!("workflow:{}", wf.id),
            SessionWrite::RecordImportError { fileloc, .. } => format!("error:{}", fileloc),
            SessionWrite::ClearImportErrors { filelocs } => {
                format!("clear-errors:{}", filelocs.len())
            }
            SessionWrite::RecordWarning { workflow_id, warning } => {
                format!("warning:{}:{}", workflow_id, warning.code.as_str())
            }
            SessionWrite::PurgeStaleWarnings { workflow_id, .. } => {
                format!("purge-warnings:{}", workflow_id)
            }
        }
    }
}

#[async_trait]
impl StorageSession for MockSession {
    fn state(&self) -> SessionState {
        self.state
    }

    async fn begin_step(&mut self) -> Result<(), CommitError> {
        if self.state == SessionState::Invalid {
            return Err(CommitError::InvalidSession);
        }
        self.step_mark = Some((self.pending.len(), self.state));
        Ok(())
    }

    async fn complete_step(&mut self) -> Result<(), CommitError> {
        self.step_mark = None;
        Ok(())
    }

    async fn abort_step(&mut self) -> Result<(), CommitError> {
        self.calls.rollback.fetch_add(1, Ordering::SeqCst);

        if self.rollback_fails {
            self.state = SessionState::Invalid;
            return Err(CommitError::Transient("rollback failed".to_string()));
        }

        if let Some((mark, entry_state)) = self.step_mark.take() {
            self.pending.truncate(mark);
            self.state = entry_state;
        }
        Ok(())
    }

    async fn execute(&mut self, write: SessionWrite) -> Result<(), CommitError> {
        self.states_seen.push(self.state);

        if self.state == SessionState::Invalid {
            return Err(CommitError::InvalidSession);
        }

        self.calls.execute.fetch_add(1, Ordering::SeqCst);
        match Self::next(&self.execute_plan) {
            Plan::Ok => {
                self.pending.push(Self::describe(&write));
                self.state = SessionState::Dirty;
                Ok(())
            }
            Plan::Transient => {
                self.state = SessionState::Invalid;
                Err(CommitError::Transient("connection lost".to_string()))
            }
            Plan::Fatal => {
                self.state = SessionState::Invalid;
                Err(CommitError::Fatal("constraint violation".to_string()))
            }
        }
    }

    async fn flush(&mut self) -> Result<(), CommitError> {
        if self.state == SessionState::Invalid {
            return Err(CommitError::InvalidSession);
        }

        self.calls.flush.fetch_add(1, Ordering::SeqCst);
        match Self::next(&self.flush_plan) {
            Plan::Ok => Ok(()),
            Plan::Transient => {
                self.state = SessionState::Invalid;
                Err(CommitError::Transient("flush timed out".to_string()))
            }
            Plan::Fatal => {
                self.state = SessionState::Invalid;
                Err(CommitError::Fatal("flush rejected".to_string()))
            }
        }
    }

    async fn commit(&mut self) -> Result<(), CommitError> {
        if self.state == SessionState::Invalid {
            return Err(CommitError::InvalidSession);
        }

        self.calls.commit.fetch_add(1, Ordering::SeqCst);
        match Self::next(&self.commit_plan) {
            Plan::Ok => {
                self.committed.lock().unwrap().append(&mut self.pending);
                self.step_mark = None;
                self.state = SessionState::Clean;
                Ok(())
            }
            Plan::Transient => {
                self.state = SessionState::Invalid;
                Err(CommitError::Transient("commit timed out".to_string()))
            }
            Plan::Fatal => {
                self.state = SessionState::Invalid;
                Err(CommitError::Fatal("commit rejected".to_string()))
            }
        }
    }

    async fn rollback(&mut self) -> Result<(), CommitError> {
        self.calls.rollback.fetch_add(1, Ordering::SeqCst);

        if self.rollback_fails {
            self.state = SessionState::Invalid;
            return Err(CommitError::Transient("rollback failed".to_string()));
        }

        self.pending.clear();
        self.step_mark = None;
        self.state = SessionState::Clean;
        Ok(())
    }
}

/// Hands out scripted sessions in order; defaults to all-Ok sessions once the
/// script runs dry
pub struct MockSessionFactory {
    sessions: Mutex<VecDeque<MockSession>>,
    pub opened: AtomicUsize,
    pub committed: Committed,
}

impl MockSessionFactory {
    pub fn new(sessions: Vec<MockSession>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            opened: AtomicUsize::new(0),
            committed: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    async fn open_session(&self) -> Result<Box<dyn StorageSession>, CommitError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let mut session = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(MockSession::ok);
        session.committed = self.committed.clone();
        Ok(Box::new(session))
    }
}
