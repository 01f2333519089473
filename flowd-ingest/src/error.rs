//! Error taxonomy for the commit pipeline
//!
//! Every storage failure the pipeline sees is classified before it is acted
//! on: transient errors are retried under the policy bound, fatal errors are
//! recorded immediately, and invalid-session errors abandon the batch. Panics
//! are the one remaining channel and deliberately stay uncaught.

use thiserror::Error;

/// Classification of a storage failure, driving the retry decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ErrorClass {
    /// Likely to succeed on retry (connectivity, timeout, pool/lock exhaustion)
    Transient,
    /// Certain to recur without external intervention (data/integrity error)
    Fatal,
}

/// Errors surfaced by storage sessions and the commit pipeline
#[derive(Debug, Error)]
pub enum CommitError {
    /// Transient storage failure: connection loss, timeout, pool exhaustion,
    /// or SQLite lock contention
    #[error("Transient storage error: {0}")]
    Transient(String),

    /// Fatal data failure: constraint violation or malformed payload
    #[error("Fatal data error: {0}")]
    Fatal(String),

    /// The session was left unusable by a prior failure and has not been
    /// rolled back
    #[error("Session is invalid; rollback required before further use")]
    InvalidSession,
}

impl CommitError {
    /// Classification of this error for the retry policy.
    ///
    /// InvalidSession classifies as fatal: retrying against an invalid
    /// session compounds the original failure.
    pub fn class(&self) -> ErrorClass {
        match self {
            CommitError::Transient(_) => ErrorClass::Transient,
            CommitError::Fatal(_) | CommitError::InvalidSession => ErrorClass::Fatal,
        }
    }

    /// Wrap a sqlx error, classifying it as transient or fatal
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match classify_sqlx(&err) {
            ErrorClass::Transient => CommitError::Transient(err.to_string()),
            ErrorClass::Fatal => CommitError::Fatal(err.to_string()),
        }
    }
}

/// Classify a sqlx error as transient or fatal.
///
/// Connectivity-shaped failures (closed pool, pool timeout, I/O, SQLite
/// busy/locked) are transient. Everything data-shaped (constraint violations,
/// row decode, encode) is fatal.
pub fn classify_sqlx(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => ErrorClass::Transient,
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_lowercase();
            if message.contains("database is locked") || message.contains("database table is locked")
            {
                ErrorClass::Transient
            } else {
                ErrorClass::Fatal
            }
        }
        _ => ErrorClass::Fatal,
    }
}
