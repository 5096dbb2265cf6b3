//! Boundary between the orchestrator and whatever renders it.

use docpipe_shared::{LogEntry, RunSummary};

use crate::stage::StageState;

/// Receives notifications from the pipeline controller.
///
/// Calls are made synchronously from the controller, never while it holds
/// its state lock, so implementations may read back a controller snapshot.
pub trait PresentationLayer: Send + Sync {
    /// A stage changed status, progress or status text.
    fn stage_changed(&self, index: u8, state: &StageState);
    /// A line was appended to the run log.
    fn log_appended(&self, entry: &LogEntry);
    /// The run completed successfully.
    fn completed(&self, summary: &RunSummary);
    /// The run failed; `message` is already user-facing.
    fn failed(&self, message: &str);
}

/// No-op presentation for headless/test usage.
pub struct SilentPresentation;

impl PresentationLayer for SilentPresentation {
    fn stage_changed(&self, _index: u8, _state: &StageState) {}
    fn log_appended(&self, _entry: &LogEntry) {}
    fn completed(&self, _summary: &RunSummary) {}
    fn failed(&self, _message: &str) {}
}
