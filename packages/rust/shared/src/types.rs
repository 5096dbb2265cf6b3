//! Core domain types for docpipe pipeline runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Number of stages in every pipeline run.
pub const STAGE_COUNT: usize = 3;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
///
/// Also serves as the run generation: a result tagged with a `RunId` that is
/// no longer current belongs to a discarded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Lifecycle of a whole pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// Terminal states are the only ones `retry()` accepts.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Lifecycle of a single stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl StageStatus {
    /// Name used on the presentation boundary (`error` rather than `failed`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "error",
        }
    }

    /// Default human-readable status line for this state.
    pub fn default_text(self) -> &'static str {
        match self {
            Self::Waiting => "waiting...",
            Self::Active => "processing...",
            Self::Completed => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Log entries
// ---------------------------------------------------------------------------

/// Severity of a run log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// One immutable line of the run log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Stage outputs (wire records returned by the processing service)
// ---------------------------------------------------------------------------

/// Output of stage 1: raw source download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOutput {
    /// Number of Markdown files downloaded.
    pub downloaded_files: i64,
    /// Number of API links parsed out of `llms.txt`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_links: Option<i64>,
}

/// Output of stage 2: cleaning and YAML conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOutput {
    pub processed_files: i64,
    /// Files recognised as API definitions.
    pub valid_files: i64,
    /// Server-side path of the documents archive, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_zip: Option<String>,
}

/// Output of stage 3: final merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutput {
    pub merged_files: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_file: Option<String>,
}

/// Output record of any stage, tagged by the stage that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageOutput {
    Fetch(FetchOutput),
    Transform(TransformOutput),
    Merge(MergeOutput),
}

impl StageOutput {
    /// The stage-specific headline count used in success log lines.
    pub fn headline_count(&self) -> i64 {
        match self {
            Self::Fetch(out) => out.downloaded_files,
            Self::Transform(out) => out.processed_files,
            Self::Merge(out) => out.merged_files,
        }
    }
}

// ---------------------------------------------------------------------------
// Run results
// ---------------------------------------------------------------------------

/// Summary statistics derived from the stage outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedResult {
    /// Files downloaded in stage 1.
    pub total_files: i64,
    /// Category A: files converted into API definitions.
    pub api_files: i64,
    /// Category B: the remainder, treated as plain documents. May be negative
    /// when the service reports inconsistent counts.
    pub doc_files: i64,
}

/// Download locations of the pipeline's final artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifacts {
    /// The merged YAML dataset.
    pub merged_dataset: Url,
    /// The ZIP archive of cleaned source documents.
    pub documents_archive: Url,
}

/// Everything a completed run hands back to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: RunId,
    pub result: AggregatedResult,
    pub artifacts: Artifacts,
    pub fetch: FetchOutput,
    pub transform: TransformOutput,
    pub merge: MergeOutput,
    pub elapsed: std::time::Duration,
}
