//! Shared types, error model, and configuration for docpipe.
//!
//! This crate is the foundation depended on by all other docpipe crates.
//! It provides:
//! - [`DocpipeError`] and [`PipelineError`]: the error model
//! - Domain types ([`RunId`], stage outputs, [`LogEntry`], [`RunSummary`])
//! - Configuration ([`AppConfig`], [`ClientConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ClientConfig, PipelineSettings, ServiceConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from,
};
pub use error::{DocpipeError, ErrorKind, PipelineError, RemoteFailure, Result};
pub use types::{
    AggregatedResult, Artifacts, FetchOutput, LogEntry, LogLevel, MergeOutput, RunId, RunStatus,
    RunSummary, STAGE_COUNT, StageOutput, StageStatus, TransformOutput,
};
