//! Workflow definition scanner
//!
//! Walks the source folder for `*.json` workflow definition files and
//! assembles a `ParsingResult` per scan: one workflow per file, parse
//! failures recorded as import errors, structural oddities as warnings.
//!
//! The scanner is a collaborator of the commit pipeline, not part of it; the
//! pipeline consumes whatever `ParsingResult` it is handed.

use crate::models::{ParseWarning, ParsingResult, TaskDefinition, WarningCode, WorkflowDefinition};
use crate::worker::BatchSource;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// On-disk shape of one workflow definition file
#[derive(Debug, Deserialize)]
struct SourceWorkflow {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tasks: Vec<TaskDefinition>,
}

/// Scans a directory tree for workflow definition files
pub struct DefinitionScanner {
    source_dir: PathBuf,
    ignore_patterns: Vec<String>,
}

impl DefinitionScanner {
    pub fn new(source_dir: PathBuf) -> Self {
        Self {
            source_dir,
            ignore_patterns: vec![
                ".git".to_string(),
                ".svn".to_string(),
                "node_modules".to_string(),
            ],
        }
    }

    /// Scan the source folder once and build the batch's parsing result
    pub fn scan(&self) -> ParsingResult {
        let mut result = ParsingResult::new();

        let walker = WalkDir::new(&self.source_dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| self.should_process_entry(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let fileloc = self.relative_path(entry.path());
            match self.parse_file(entry.path(), &fileloc) {
                Ok(workflow) => {
                    let warnings = validate_workflow(&workflow);
                    if !warnings.is_empty() {
                        result
                            .warnings_by_workflow
                            .insert(workflow.id.clone(), warnings);
                    }
                    result.parsed_file_locations.insert(fileloc);
                    result.discovered_workflows.push(workflow);
                }
                Err(message) => {
                    result.import_errors_by_file.insert(fileloc, message);
                }
            }
        }

        tracing::debug!(
            batch_id = %result.batch_id,
            parsed = result.parsed_file_locations.len(),
            failed = result.import_errors_by_file.len(),
            "Definition scan complete"
        );

        result
    }

    fn should_process_entry(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') && name.len() > 1 && entry.depth() > 0 {
            return false;
        }
        !self.ignore_patterns.iter().any(|p| name == p.as_str())
    }

    fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.source_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }

    fn parse_file(&self, path: &Path, fileloc: &str) -> Result<WorkflowDefinition, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("Read failed: {}", e))?;

        let source: SourceWorkflow =
            serde_json::from_str(&content).map_err(|e| format!("Parse failed: {}", e))?;

        if source.id.trim().is_empty() {
            return Err("Workflow id is empty".to_string());
        }

        Ok(WorkflowDefinition {
            name: source.name.unwrap_or_else(|| source.id.clone()),
            id: source.id,
            fileloc: fileloc.to_string(),
            tasks: source.tasks,
        })
    }
}

/// Structural validation producing per-workflow warnings
fn validate_workflow(workflow: &WorkflowDefinition) -> Vec<ParseWarning> {
    let mut warnings = Vec::new();

    if workflow.tasks.is_empty() {
        warnings.push(ParseWarning {
            code: WarningCode::EmptyWorkflow,
            message: format!("Workflow '{}' defines no tasks", workflow.id),
        });
    }

    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for task in &workflow.tasks {
        if !seen.insert(task.id.as_str()) {
            duplicates.push(task.id.clone());
        }
    }
    if !duplicates.is_empty() {
        warnings.push(ParseWarning {
            code: WarningCode::DuplicateTaskId,
            message: format!("Duplicate task ids: {}", duplicates.join(", ")),
        });
    }

    let known: HashSet<&str> = workflow.tasks.iter().map(|t| t.id.as_str()).collect();
    let mut unknown = Vec::new();
    for task in &workflow.tasks {
        for dep in &task.depends_on {
            if !known.contains(dep.as_str()) {
                unknown.push(format!("{} -> {}", task.id, dep));
            }
        }
    }
    if !unknown.is_empty() {
        warnings.push(ParseWarning {
            code: WarningCode::UnknownDependency,
            message: format!("Unknown dependencies: {}", unknown.join(", ")),
        });
    }

    warnings
}

#[async_trait]
impl BatchSource for DefinitionScanner {
    async fn next_batch(&mut self) -> anyhow::Result<Option<ParsingResult>> {
        if !self.source_dir.exists() {
            tracing::debug!(
                source_dir = %self.source_dir.display(),
                "Source folder does not exist yet; no batch"
            );
            return Ok(None);
        }

        Ok(Some(self.scan()))
    }
}
