//! Stage descriptors, per-stage state, and the runner that drives one stage.

use tracing::{debug, instrument};
use url::Url;

use docpipe_remote::RemoteProcessingService;
use docpipe_shared::{LogLevel, RemoteFailure, RunId, STAGE_COUNT, StageOutput, StageStatus};

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// Which remote operation a stage invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Fetch,
    Transform,
    Merge,
}

impl StageKind {
    async fn invoke(
        self,
        service: &dyn RemoteProcessingService,
        source: &Url,
    ) -> Result<StageOutput, RemoteFailure> {
        match self {
            Self::Fetch => service.fetch_sources(source).await.map(StageOutput::Fetch),
            Self::Transform => service.transform().await.map(StageOutput::Transform),
            Self::Merge => service.merge().await.map(StageOutput::Merge),
        }
    }

    fn success_message(self, count: i64) -> String {
        match self {
            Self::Fetch => format!("download complete: {count} files"),
            Self::Transform => format!("conversion complete: {count} files"),
            Self::Merge => format!("merge complete: {count} category files"),
        }
    }
}

/// Immutable description of one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDescriptor {
    /// 1-based position in the pipeline.
    pub index: u8,
    pub kind: StageKind,
    pub name: &'static str,
}

/// The fixed stage table, in execution order.
pub const STAGES: [StageDescriptor; STAGE_COUNT] = [
    StageDescriptor {
        index: 1,
        kind: StageKind::Fetch,
        name: "download llms.txt and Markdown files",
    },
    StageDescriptor {
        index: 2,
        kind: StageKind::Transform,
        name: "clean Markdown files and convert to YAML",
    },
    StageDescriptor {
        index: 3,
        kind: StageKind::Merge,
        name: "merge all YAML files",
    },
];

// ---------------------------------------------------------------------------
// StageState
// ---------------------------------------------------------------------------

/// Status and progress of one stage within the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageState {
    pub status: StageStatus,
    /// Coarse completion indicator, 0..=100.
    pub progress: u8,
    pub status_text: String,
}

impl Default for StageState {
    fn default() -> Self {
        Self::waiting()
    }
}

impl StageState {
    pub fn waiting() -> Self {
        Self::with_status(StageStatus::Waiting, 0)
    }

    fn with_status(status: StageStatus, progress: u8) -> Self {
        Self {
            status,
            progress,
            status_text: status.default_text().to_string(),
        }
    }

    /// Waiting → Active with an initial probe progress.
    pub fn activate(&mut self, probe: u8) {
        *self = Self::with_status(StageStatus::Active, self.progress.max(probe.min(99)));
    }

    pub fn complete(&mut self) {
        *self = Self::with_status(StageStatus::Completed, 100);
    }

    /// Mark failed, keeping whatever progress was reached.
    pub fn fail(&mut self) {
        *self = Self::with_status(StageStatus::Failed, self.progress);
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Returned by a [`StageTracker`] when the run it is bound to is no longer current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superseded;

/// Write access to one run's stage states and log, bound to that run.
///
/// Every call fails with [`Superseded`] once the run has been discarded, so a
/// late response can never touch a newer run.
pub trait StageTracker: Send + Sync {
    fn update(&self, index: u8, apply: &dyn Fn(&mut StageState)) -> Result<(), Superseded>;
    fn log(&self, level: LogLevel, message: String) -> Result<(), Superseded>;
}

/// Everything a stage needs from the run that owns it.
pub struct StageContext<'a> {
    pub run_id: RunId,
    pub source: &'a Url,
    pub service: &'a dyn RemoteProcessingService,
    pub tracker: &'a dyn StageTracker,
}

/// Failure of a single stage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    /// The remote operation failed; the stage is now Failed.
    #[error("stage {index} failed: {cause}")]
    Failed { index: u8, cause: RemoteFailure },

    /// The run was discarded while the stage was in flight.
    #[error("run {run_id} was superseded")]
    Superseded { run_id: RunId },
}

/// Drives one stage through Waiting → Active → Completed/Failed.
#[derive(Debug, Clone, Copy)]
pub struct StageRunner {
    probe_progress: u8,
}

impl Default for StageRunner {
    fn default() -> Self {
        Self::new(10)
    }
}

impl StageRunner {
    /// `probe_progress` is clamped to 1..=99 so 100 stays reserved for Completed.
    pub fn new(probe_progress: u8) -> Self {
        Self {
            probe_progress: probe_progress.clamp(1, 99),
        }
    }

    pub fn probe_progress(&self) -> u8 {
        self.probe_progress
    }

    /// Run one stage to completion or failure.
    ///
    /// On return the stage is Completed or Failed, unless the run was
    /// superseded, in which case whoever superseded it finalised the stage.
    #[instrument(skip_all, fields(stage = descriptor.index, run_id = %ctx.run_id))]
    pub async fn run(
        &self,
        descriptor: &StageDescriptor,
        ctx: &StageContext<'_>,
    ) -> Result<StageOutput, StageError> {
        let index = descriptor.index;
        let probe = self.probe_progress;
        let superseded = |_: Superseded| StageError::Superseded { run_id: ctx.run_id };

        ctx.tracker
            .update(index, &|state| state.activate(probe))
            .map_err(superseded)?;
        ctx.tracker
            .log(LogLevel::Info, format!("beginning {}...", descriptor.name))
            .map_err(superseded)?;

        match descriptor.kind.invoke(ctx.service, ctx.source).await {
            Ok(output) => {
                debug!(?output, "stage succeeded");
                ctx.tracker
                    .update(index, &|state| state.complete())
                    .map_err(superseded)?;
                ctx.tracker
                    .log(
                        LogLevel::Success,
                        descriptor.kind.success_message(output.headline_count()),
                    )
                    .map_err(superseded)?;
                Ok(output)
            }
            Err(cause) => {
                ctx.tracker
                    .update(index, &|state| state.fail())
                    .map_err(superseded)?;
                ctx.tracker
                    .log(LogLevel::Error, format!("{} failed: {cause}", descriptor.name))
                    .map_err(superseded)?;
                Err(StageError::Failed { index, cause })
            }
        }
    }
}
