//! Parsing-result commit pipeline
//!
//! Takes the in-memory outcome of scanning a batch of workflow source files
//! and durably records it, surviving transient storage failure. Every failure
//! path ends in a classified result plus a rolled-back session; nothing short
//! of a programming fault (panic) escapes the pipeline.

pub mod ops;
pub mod pipeline;
pub mod retry;
pub mod session;

pub use ops::{run_isolated, RecordImportErrors, RecordWarnings, PersistWorkflows, SubOperation};
pub use pipeline::CommitPipeline;
pub use retry::RetryPolicy;
pub use session::{
    SessionFactory, SessionState, SessionWrite, SqliteSession, SqliteSessionFactory,
    StorageSession,
};
