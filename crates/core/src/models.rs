use crate::reconcile::{SkippedTag, WriteSet};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
pub struct TaskFailure {
    pub task: String,
    pub error: String,
}

/// Dry-run view of one tag that would be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagPreview {
    pub tag: String,
    pub preview: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingOutcome {
    pub file_name: String,
    pub path: PathBuf,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub written: WriteSet,
    pub skipped: Vec<SkippedTag>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub task_failures: Vec<TaskFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dry_run_preview: Vec<TagPreview>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ProcessingOutcome {
    pub fn new(path: PathBuf) -> Self {
        Self {
            file_name: file_name_of(&path),
            path,
            success: false,
            error: None,
            written: WriteSet::new(),
            skipped: Vec::new(),
            task_failures: Vec::new(),
            dry_run_preview: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub file_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub successful: Vec<String>,
    pub failed: Vec<FailedFile>,
    pub outcomes: Vec<ProcessingOutcome>,
    pub cancelled: bool,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn start(total: usize, dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            total,
            successful: Vec::new(),
            failed: Vec::new(),
            outcomes: Vec::new(),
            cancelled: false,
            dry_run,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn record(&mut self, outcome: ProcessingOutcome) {
        if outcome.success {
            self.successful.push(outcome.file_name.clone());
        } else {
            self.failed.push(FailedFile {
                file_name: outcome.file_name.clone(),
                error: outcome.error.clone().unwrap_or_default(),
            });
        }
        self.outcomes.push(outcome);
    }

    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
    }

    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }
}

pub fn file_name_of(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
