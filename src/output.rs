//! Structured results of conversion jobs.
//!
//! Every job, successful or not, ends as a [`JobReport`]. Reports are what
//! the daemon logs instead of swallowing errors, and with `--json` they are
//! also printed as one JSON object per line so other tools can follow along.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Result of splitting one PDF into page images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitReport {
    /// Job name (source file stem).
    pub job: String,
    /// The consumed source document.
    pub source: PathBuf,
    /// Directory holding `page-NNNN.jpg`.
    pub output_dir: PathBuf,
    /// Number of page images written.
    pub pages: usize,
    pub duration_ms: u64,
}

/// Result of joining page images into the `_max` / `_min` documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinReport {
    /// Requested document base name (extension stripped).
    pub name: String,
    /// Pages in each artifact.
    pub pages: usize,
    pub max_artifact: PathBuf,
    pub min_artifact: PathBuf,
    pub max_bytes: u64,
    pub min_bytes: u64,
    /// Summed size of the source images before any compression pass.
    pub source_bytes_before: u64,
    /// Summed size of the source images after the last pass.
    pub source_bytes_after: u64,
    /// Compression passes run across both loops.
    pub passes: u32,
    /// Quality the next pass would have used.
    pub final_quality: u8,
    /// Cumulative dimension factor applied to the sources.
    pub scale: f32,
    /// Whether `min_bytes` ended up within the artifact budget.
    pub budget_met: bool,
    pub duration_ms: u64,
}

/// Which conversion direction a job ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Split,
    Join,
}

/// Final state of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed { error: String },
}

/// Envelope emitted once per trigger file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub kind: JobKind,
    /// The trigger file that started the job.
    pub trigger: PathBuf,
    #[serde(flatten)]
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split: Option<SplitReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join: Option<JoinReport>,
}

impl JobReport {
    pub fn split_succeeded(trigger: PathBuf, report: SplitReport) -> Self {
        Self {
            kind: JobKind::Split,
            trigger,
            status: JobStatus::Succeeded,
            split: Some(report),
            join: None,
        }
    }

    pub fn join_succeeded(trigger: PathBuf, report: JoinReport) -> Self {
        Self {
            kind: JobKind::Join,
            trigger,
            status: JobStatus::Succeeded,
            split: None,
            join: Some(report),
        }
    }

    pub fn failed(kind: JobKind, trigger: PathBuf, error: impl ToString) -> Self {
        Self {
            kind,
            trigger,
            status: JobStatus::Failed {
                error: error.to_string(),
            },
            split: None,
            join: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}
