//! Pipeline orchestration for docpipe.
//!
//! This crate drives the three remote stages (fetch → transform → merge) of a
//! pipeline run:
//! - [`controller`]: [`PipelineController`], single-flight run orchestration
//! - [`stage`]: stage descriptors, [`StageState`] and the [`StageRunner`]
//! - [`aggregator`]: summary statistics over stage outputs
//! - [`logger`]: the append-only run log
//! - [`reporter`]: classification of raw failures
//! - [`presentation`]: the notification boundary towards renderers

pub mod aggregator;
pub mod controller;
pub mod logger;
pub mod presentation;
pub mod reporter;
pub mod stage;

#[cfg(test)]
mod testing;

pub use controller::{PipelineController, PipelineRun, PipelineSnapshot, validate_input};
pub use logger::Logger;
pub use presentation::{PresentationLayer, SilentPresentation};
pub use reporter::{Classified, ErrorReporter};
pub use stage::{STAGES, StageDescriptor, StageError, StageKind, StageRunner, StageState};
