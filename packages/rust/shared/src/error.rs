//! Error types for docpipe.
//!
//! Library crates use [`DocpipeError`] for plumbing (config, I/O, HTTP setup)
//! and [`PipelineError`] for the orchestrator's own taxonomy, both via
//! `thiserror`. The CLI wraps these with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::RunId;

/// Top-level error type for docpipe plumbing operations.
#[derive(Debug, thiserror::Error)]
pub enum DocpipeError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside the stage call path (status, reset, download).
    #[error("network error: {0}")]
    Network(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocpipeError>;

impl DocpipeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Remote failures
// ---------------------------------------------------------------------------

/// Raw failure of a remote stage operation, before classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteFailure {
    /// The request never produced a response (connect refused, DNS, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with a status outside 2xx.
    #[error("HTTP {code} {reason}{}", detail_suffix(.detail))]
    Status {
        code: u16,
        reason: String,
        /// `error` field of the JSON error body, when the service sent one.
        detail: Option<String>,
    },

    /// A 2xx response whose body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),

    /// Anything else raised by the service implementation.
    #[error("{0}")]
    Other(String),
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Pipeline errors
// ---------------------------------------------------------------------------

/// Reporting-friendly classification of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    AlreadyRunning,
    NetworkUnreachable,
    HttpStatus,
    MalformedResponse,
    Superseded,
    Unknown,
}

/// Every way `start`/`retry` can fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// Input rejected before any side effect.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Another run is in flight; nothing was changed.
    #[error("a pipeline run is already in progress")]
    AlreadyRunning,

    /// A remote stage operation failed.
    #[error("stage {stage} failed: {message}")]
    Stage {
        stage: u8,
        kind: ErrorKind,
        /// User-facing message from the error reporter.
        message: String,
        cause: RemoteFailure,
    },

    /// Failure caught by the top-level safety boundary.
    #[error("unexpected error: {message}")]
    Unknown {
        stage: Option<u8>,
        message: String,
        cause: String,
    },

    /// The run was discarded while this call was awaiting a stage result.
    #[error("run {run_id} was superseded")]
    Superseded { run_id: RunId },
}

impl PipelineError {
    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// The 1-based stage the error belongs to, if any.
    pub fn stage_index(&self) -> Option<u8> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            Self::Unknown { stage, .. } => *stage,
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::AlreadyRunning => ErrorKind::AlreadyRunning,
            Self::Stage { kind, .. } => *kind,
            Self::Unknown { .. } => ErrorKind::Unknown,
            Self::Superseded { .. } => ErrorKind::Superseded,
        }
    }

    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Stage { message, .. } | Self::Unknown { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
