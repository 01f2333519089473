//! Parsing result types
//!
//! A `ParsingResult` is the immutable outcome of scanning one batch of
//! workflow source files. It is produced by the scanner, handed to the commit
//! pipeline exactly once, and never mutated after construction.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// A complete workflow definition discovered in a source file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique workflow identifier (e.g., "nightly-report")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// Source file location this definition was parsed from
    pub fileloc: String,
    /// Tasks in this workflow
    pub tasks: Vec<TaskDefinition>,
}

/// A single task within a workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique task identifier within the workflow
    pub id: String,
    /// Task kind (e.g., "shell", "http", "noop")
    #[serde(default)]
    pub kind: String,
    /// Task ids this task depends on
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Warning categories reported against a parsed workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    /// Workflow defines no tasks
    EmptyWorkflow,
    /// Two tasks share the same id
    DuplicateTaskId,
    /// A task depends on an id that does not exist in the workflow
    UnknownDependency,
}

impl WarningCode {
    /// Stable string form used as part of the warning primary key
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCode::EmptyWorkflow => "empty_workflow",
            WarningCode::DuplicateTaskId => "duplicate_task_id",
            WarningCode::UnknownDependency => "unknown_dependency",
        }
    }
}

/// A warning recorded against one workflow during parsing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseWarning {
    pub code: WarningCode,
    pub message: String,
}

/// The in-memory outcome of scanning one batch of workflow source files.
///
/// Immutable once handed to the commit pipeline.
#[derive(Debug, Clone)]
pub struct ParsingResult {
    /// Batch identifier, carried through logging and the commit outcome
    pub batch_id: Uuid,
    /// Source files that parsed successfully in this batch
    pub parsed_file_locations: HashSet<String>,
    /// Per-file parse failures (keys unique per file)
    pub import_errors_by_file: HashMap<String, String>,
    /// Workflow definitions discovered in this batch, in discovery order
    pub discovered_workflows: Vec<WorkflowDefinition>,
    /// Warnings reported per workflow id, in report order
    pub warnings_by_workflow: HashMap<String, Vec<ParseWarning>>,
}

impl ParsingResult {
    /// Create an empty result for a fresh batch
    pub fn new() -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            parsed_file_locations: HashSet::new(),
            import_errors_by_file: HashMap::new(),
            discovered_workflows: Vec::new(),
            warnings_by_workflow: HashMap::new(),
        }
    }

    /// True when the batch contains nothing to record
    pub fn is_empty(&self) -> bool {
        self.parsed_file_locations.is_empty()
            && self.import_errors_by_file.is_empty()
            && self.discovered_workflows.is_empty()
            && self.warnings_by_workflow.is_empty()
    }
}

impl Default for ParsingResult {
    fn default() -> Self {
        Self::new()
    }
}
