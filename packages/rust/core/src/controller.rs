//! Top-level orchestration of a pipeline run.
//!
//! The [`PipelineController`] owns the only mutable pipeline state: the
//! current [`PipelineRun`], its stage states and its log. It validates input,
//! enforces single-flight execution, drives the three stages in order and
//! reports every transition to the [`PresentationLayer`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{error, info, instrument, warn};
use url::Url;

use docpipe_remote::RemoteProcessingService;
use docpipe_shared::{
    LogEntry, LogLevel, PipelineError, RunId, RunStatus, RunSummary, STAGE_COUNT, StageOutput,
    StageStatus,
};

use crate::aggregator;
use crate::logger::Logger;
use crate::presentation::PresentationLayer;
use crate::reporter::ErrorReporter;
use crate::stage::{
    STAGES, StageContext, StageError, StageRunner, StageState, StageTracker, Superseded,
};

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// One end-to-end execution of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    pub id: RunId,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    /// Number of stages that have completed in this run.
    pub current_stage_index: u8,
    pub stage_results: [Option<StageOutput>; STAGE_COUNT],
    pub error: Option<PipelineError>,
}

impl PipelineRun {
    fn idle() -> Self {
        Self {
            status: RunStatus::Idle,
            ..Self::running(RunId::new())
        }
    }

    fn running(id: RunId) -> Self {
        Self {
            id,
            started_at: Utc::now(),
            status: RunStatus::Running,
            current_stage_index: 0,
            stage_results: Default::default(),
            error: None,
        }
    }
}

/// Consistent copy of the controller state at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSnapshot {
    pub run: PipelineRun,
    pub stages: [StageState; STAGE_COUNT],
    pub logs: Vec<LogEntry>,
}

struct ControllerState {
    run: PipelineRun,
    stages: [StageState; STAGE_COUNT],
    logger: Logger,
    /// Busy guard: the run currently allowed to make progress.
    in_flight: Option<RunId>,
    last_input: Option<Url>,
}

// ---------------------------------------------------------------------------
// Input validation
// ---------------------------------------------------------------------------

/// Check that `input` is a non-empty, absolute http(s) URL.
pub fn validate_input(input: &str) -> Result<Url, PipelineError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::validation(
            "please enter the API documentation URL",
        ));
    }

    let url = Url::parse(trimmed).map_err(|e| {
        PipelineError::validation(format!("'{trimmed}' is not a valid URL: {e}"))
    })?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(PipelineError::validation(format!(
            "'{trimmed}' is not an http(s) URL with a host"
        )));
    }

    Ok(url)
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Drives pipeline runs against a remote processing service.
pub struct PipelineController {
    service: Arc<dyn RemoteProcessingService>,
    presentation: Arc<dyn PresentationLayer>,
    runner: StageRunner,
    reporter: ErrorReporter,
    state: Mutex<ControllerState>,
}

impl PipelineController {
    pub fn new(
        service: Arc<dyn RemoteProcessingService>,
        presentation: Arc<dyn PresentationLayer>,
    ) -> Self {
        Self {
            service,
            presentation,
            runner: StageRunner::default(),
            reporter: ErrorReporter,
            state: Mutex::new(ControllerState {
                run: PipelineRun::idle(),
                stages: Default::default(),
                logger: Logger::new(),
                in_flight: None,
                last_input: None,
            }),
        }
    }

    pub fn with_runner(mut self, runner: StageRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Copy of the current run, stage states and log.
    pub fn snapshot(&self) -> PipelineSnapshot {
        let state = self.state.lock();
        PipelineSnapshot {
            run: state.run.clone(),
            stages: state.stages.clone(),
            logs: state.logger.entries().to_vec(),
        }
    }

    pub fn status(&self) -> RunStatus {
        self.state.lock().run.status
    }

    /// The last input that passed validation and started a run.
    pub fn last_input(&self) -> Option<Url> {
        self.state.lock().last_input.clone()
    }

    /// Validate `input` and run all three stages.
    ///
    /// Validation and single-flight checks happen before any mutation; a
    /// rejected call leaves the current run exactly as it was.
    #[instrument(skip_all, fields(input = %input))]
    pub async fn start(&self, input: &str) -> Result<RunSummary, PipelineError> {
        let source = validate_input(input)?;
        let run_id = self.begin(&source)?;

        // Fails the run if this future is dropped before it finishes.
        let _guard = RunGuard {
            controller: self,
            run_id,
        };

        self.drive(run_id, &source).await
    }

    /// Restart from stage 1 with the last validated input.
    ///
    /// Returns `Ok(None)` without doing anything unless the current run is
    /// Completed or Failed.
    pub async fn retry(&self) -> Result<Option<RunSummary>, PipelineError> {
        let input = {
            let state = self.state.lock();
            if state.in_flight.is_some() || !state.run.status.is_terminal() {
                return Ok(None);
            }
            state.last_input.clone()
        };

        let Some(input) = input else {
            return Ok(None);
        };

        info!(input = %input, "retrying pipeline from stage 1");
        match self.start(input.as_str()).await {
            Err(PipelineError::AlreadyRunning) => Ok(None),
            other => other.map(Some),
        }
    }

    /// Safety boundary for failures raised outside the stage call path.
    ///
    /// Forces a Running run to Failed with an `Unknown` error, notifies the
    /// presentation layer and releases the busy guard. Any stage result that
    /// arrives later for that run is discarded. Returns `false` if no run was
    /// in flight.
    pub fn fail_unexpected(&self, cause: impl std::fmt::Display) -> bool {
        self.force_fail(None, &cause.to_string())
    }

    // -----------------------------------------------------------------------
    // Run lifecycle
    // -----------------------------------------------------------------------

    fn begin(&self, source: &Url) -> Result<RunId, PipelineError> {
        let run_id = RunId::new();

        let (stages, marker, target) = {
            let mut state = self.state.lock();
            if state.in_flight.is_some() {
                return Err(PipelineError::AlreadyRunning);
            }

            state.in_flight = Some(run_id);
            state.run = PipelineRun::running(run_id);
            state.stages = Default::default();
            state.last_input = Some(source.clone());
            let marker = state.logger.clear();
            let target = state
                .logger
                .append(LogLevel::Info, format!("target URL: {source}"));
            (state.stages.clone(), marker, target)
        };

        info!(%run_id, %source, "pipeline run started");
        for (descriptor, stage) in STAGES.iter().zip(stages.iter()) {
            self.presentation.stage_changed(descriptor.index, stage);
        }
        self.presentation.log_appended(&marker);
        self.presentation.log_appended(&target);

        Ok(run_id)
    }

    async fn drive(&self, run_id: RunId, source: &Url) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let scope = RunScope {
            controller: self,
            run_id,
        };
        let ctx = StageContext {
            run_id,
            source,
            service: self.service.as_ref(),
            tracker: &scope,
        };

        for descriptor in &STAGES {
            self.ensure_predecessor_completed(run_id, descriptor.index)?;

            match self.runner.run(descriptor, &ctx).await {
                Ok(output) => self.record_output(run_id, descriptor.index, output)?,
                Err(StageError::Failed { index, cause }) => {
                    let classified = self.reporter.classify(&cause);
                    let error = PipelineError::Stage {
                        stage: index,
                        kind: classified.kind,
                        message: classified.user_message,
                        cause,
                    };
                    return Err(self.finish_failed(run_id, error));
                }
                Err(StageError::Superseded { run_id }) => {
                    warn!(%run_id, "discarding stage result of superseded run");
                    return Err(PipelineError::Superseded { run_id });
                }
            }
        }

        self.finish_completed(run_id, started.elapsed())
    }

    /// Apply `f` to the state if `run_id` is still the run in flight.
    fn with_run<T>(
        &self,
        run_id: RunId,
        f: impl FnOnce(&mut ControllerState) -> T,
    ) -> Result<T, Superseded> {
        let mut state = self.state.lock();
        if state.in_flight != Some(run_id) {
            return Err(Superseded);
        }
        Ok(f(&mut state))
    }

    fn ensure_predecessor_completed(&self, run_id: RunId, index: u8) -> Result<(), PipelineError> {
        if index <= 1 {
            return Ok(());
        }

        let previous = self
            .with_run(run_id, |state| state.stages[usize::from(index) - 2].status)
            .map_err(|_| PipelineError::Superseded { run_id })?;

        if previous == StageStatus::Completed {
            return Ok(());
        }

        let classified = self.reporter.unexpected();
        Err(self.finish_failed(
            run_id,
            PipelineError::Unknown {
                stage: Some(index),
                message: classified.user_message,
                cause: format!("stage {} is {previous:?}, not Completed", index - 1),
            },
        ))
    }

    fn record_output(
        &self,
        run_id: RunId,
        index: u8,
        output: StageOutput,
    ) -> Result<(), PipelineError> {
        self.with_run(run_id, |state| {
            state.run.stage_results[usize::from(index) - 1] = Some(output);
            state.run.current_stage_index = index;
        })
        .map_err(|_| PipelineError::Superseded { run_id })
    }

    /// Mark the run Failed with `error`, report it, and hand the error back.
    fn finish_failed(&self, run_id: RunId, error: PipelineError) -> PipelineError {
        let message = error.user_message();
        let entry = self.with_run(run_id, |state| {
            state.run.status = RunStatus::Failed;
            state.run.error = Some(error.clone());
            state.in_flight = None;
            state
                .logger
                .append(LogLevel::Error, format!("error: {message}"))
        });

        match entry {
            Ok(entry) => {
                warn!(
                    %run_id,
                    stage = ?error.stage_index(),
                    kind = ?error.kind(),
                    %error,
                    "pipeline run failed"
                );
                self.presentation.log_appended(&entry);
                self.presentation.failed(&message);
                error
            }
            Err(Superseded) => PipelineError::Superseded { run_id },
        }
    }

    fn finish_completed(
        &self,
        run_id: RunId,
        elapsed: Duration,
    ) -> Result<RunSummary, PipelineError> {
        let outputs = self
            .with_run(run_id, |state| match &state.run.stage_results {
                [
                    Some(StageOutput::Fetch(fetch)),
                    Some(StageOutput::Transform(transform)),
                    Some(StageOutput::Merge(merge)),
                ] => Some((fetch.clone(), transform.clone(), merge.clone())),
                _ => None,
            })
            .map_err(|_| PipelineError::Superseded { run_id })?;

        let Some((fetch, transform, merge)) = outputs else {
            let classified = self.reporter.unexpected();
            return Err(self.finish_failed(
                run_id,
                PipelineError::Unknown {
                    stage: None,
                    message: classified.user_message,
                    cause: "stage outputs missing or out of order".into(),
                },
            ));
        };

        let summary = RunSummary {
            run_id,
            result: aggregator::aggregate(&fetch, &transform),
            artifacts: self.service.artifacts(),
            fetch,
            transform,
            merge,
            elapsed,
        };

        let entry = self
            .with_run(run_id, |state| {
                state.run.status = RunStatus::Completed;
                state.in_flight = None;
                state
                    .logger
                    .append(LogLevel::Success, "all processing complete!")
            })
            .map_err(|_| PipelineError::Superseded { run_id })?;

        info!(
            %run_id,
            total_files = summary.result.total_files,
            api_files = summary.result.api_files,
            doc_files = summary.result.doc_files,
            elapsed_ms = summary.elapsed.as_millis(),
            "pipeline run complete"
        );
        self.presentation.log_appended(&entry);
        self.presentation.completed(&summary);

        Ok(summary)
    }

    /// Fail the in-flight run (or only `expected`, when given) as `Unknown`.
    fn force_fail(&self, expected: Option<RunId>, cause: &str) -> bool {
        let classified = self.reporter.unexpected();

        let (run_id, changed_stage, entry) = {
            let mut state = self.state.lock();
            let Some(run_id) = state.in_flight else {
                return false;
            };
            if expected.is_some_and(|id| id != run_id) {
                return false;
            }

            state.in_flight = None;
            let active = state
                .stages
                .iter()
                .position(|stage| stage.status == StageStatus::Active);
            let changed_stage = active.map(|i| {
                state.stages[i].fail();
                (i as u8 + 1, state.stages[i].clone())
            });

            state.run.status = RunStatus::Failed;
            state.run.error = Some(PipelineError::Unknown {
                stage: changed_stage.as_ref().map(|(index, _)| *index),
                message: classified.user_message.clone(),
                cause: cause.to_string(),
            });
            let entry = state
                .logger
                .append(LogLevel::Error, format!("error: {}", classified.user_message));
            (run_id, changed_stage, entry)
        };

        error!(%run_id, cause, "pipeline run aborted by safety handler");
        if let Some((index, stage)) = &changed_stage {
            self.presentation.stage_changed(*index, stage);
        }
        self.presentation.log_appended(&entry);
        self.presentation.failed(&classified.user_message);
        true
    }
}

// ---------------------------------------------------------------------------
// Run-bound helpers
// ---------------------------------------------------------------------------

/// [`StageTracker`] bound to one run of a controller.
struct RunScope<'a> {
    controller: &'a PipelineController,
    run_id: RunId,
}

impl StageTracker for RunScope<'_> {
    fn update(&self, index: u8, apply: &dyn Fn(&mut StageState)) -> Result<(), Superseded> {
        let stage = self.controller.with_run(self.run_id, |state| {
            let stage = &mut state.stages[usize::from(index) - 1];
            apply(stage);
            stage.clone()
        })?;
        self.controller.presentation.stage_changed(index, &stage);
        Ok(())
    }

    fn log(&self, level: LogLevel, message: String) -> Result<(), Superseded> {
        let entry = self
            .controller
            .with_run(self.run_id, |state| state.logger.append(level, message))?;
        self.controller.presentation.log_appended(&entry);
        Ok(())
    }
}

/// Fails its run on drop if the run is still in flight.
struct RunGuard<'a> {
    controller: &'a PipelineController,
    run_id: RunId,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.controller
            .force_fail(Some(self.run_id), "run interrupted before completion");
    }
}
