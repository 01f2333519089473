//! flowd-ingest - Workflow-Definition Ingest Worker
//!
//! Long-running worker that scans a folder of workflow source files and
//! durably records the parsing results (discovered workflow definitions,
//! per-file import errors, per-workflow warnings) in the shared SQLite
//! database, surviving transient storage failure.

pub mod commit;
pub mod error;
pub mod models;
pub mod services;
pub mod worker;

pub use crate::error::{classify_sqlx, CommitError, ErrorClass};
