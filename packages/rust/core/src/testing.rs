//! In-memory fakes shared by the unit tests of this crate.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use url::Url;

use docpipe_remote::RemoteProcessingService;
use docpipe_shared::{
    Artifacts, FetchOutput, LogEntry, MergeOutput, RemoteFailure, RunSummary, TransformOutput,
};

use crate::presentation::PresentationLayer;
use crate::stage::StageState;

/// Holds stage 1 open until the test releases it.
#[derive(Default)]
pub(crate) struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

/// Remote service whose per-stage outcomes are set by the test.
pub(crate) struct ScriptedService {
    calls: Mutex<Vec<u8>>,
    sources: Mutex<Vec<Url>>,
    fetch: Mutex<Result<FetchOutput, RemoteFailure>>,
    transform: Mutex<Result<TransformOutput, RemoteFailure>>,
    merge: Mutex<Result<MergeOutput, RemoteFailure>>,
    gate: Mutex<Option<Arc<Gate>>>,
}

impl ScriptedService {
    /// All stages succeed with `{12}`, `{12, 9}`, `{4}`.
    pub fn succeeding() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            sources: Mutex::new(Vec::new()),
            fetch: Mutex::new(Ok(FetchOutput {
                downloaded_files: 12,
                api_links: Some(12),
            })),
            transform: Mutex::new(Ok(TransformOutput {
                processed_files: 12,
                valid_files: 9,
                docs_zip: None,
            })),
            merge: Mutex::new(Ok(MergeOutput {
                merged_files: 4,
                final_file: Some("data/final/merged_apis.yml".into()),
            })),
            gate: Mutex::new(None),
        }
    }

    pub fn fail_stage(&self, index: u8, failure: RemoteFailure) {
        match index {
            1 => *self.fetch.lock() = Err(failure),
            2 => *self.transform.lock() = Err(failure),
            3 => *self.merge.lock() = Err(failure),
            _ => panic!("no stage {index}"),
        }
    }

    pub fn heal_stage(&self, index: u8) {
        let healthy = Self::succeeding();
        match index {
            1 => *self.fetch.lock() = healthy.fetch.into_inner(),
            2 => *self.transform.lock() = healthy.transform.into_inner(),
            3 => *self.merge.lock() = healthy.merge.into_inner(),
            _ => panic!("no stage {index}"),
        }
    }

    /// Make the next stage 1 calls wait on the returned gate.
    pub fn gate_stage1(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    pub fn ungate(&self) {
        *self.gate.lock() = None;
    }

    /// Stage indices in invocation order, across every run.
    pub fn calls(&self) -> Vec<u8> {
        self.calls.lock().clone()
    }

    pub fn sources(&self) -> Vec<Url> {
        self.sources.lock().clone()
    }
}

#[async_trait]
impl RemoteProcessingService for ScriptedService {
    async fn fetch_sources(&self, source: &Url) -> Result<FetchOutput, RemoteFailure> {
        self.calls.lock().push(1);
        self.sources.lock().push(source.clone());

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        self.fetch.lock().clone()
    }

    async fn transform(&self) -> Result<TransformOutput, RemoteFailure> {
        self.calls.lock().push(2);
        self.transform.lock().clone()
    }

    async fn merge(&self) -> Result<MergeOutput, RemoteFailure> {
        self.calls.lock().push(3);
        self.merge.lock().clone()
    }

    fn artifacts(&self) -> Artifacts {
        Artifacts {
            merged_dataset: Url::parse("http://svc.test/api/download/complete.yaml").unwrap(),
            documents_archive: Url::parse("http://svc.test/api/download/docs.zip").unwrap(),
        }
    }
}

/// One notification received by [`RecordingPresentation`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Stage(u8, StageState),
    Log(LogEntry),
    Completed(RunSummary),
    Failed(String),
}

#[derive(Default)]
pub(crate) struct RecordingPresentation {
    events: Mutex<Vec<Event>>,
}

impl RecordingPresentation {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn failures(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Failed(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn completions(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Completed(_)))
            .count()
    }
}

impl PresentationLayer for RecordingPresentation {
    fn stage_changed(&self, index: u8, state: &StageState) {
        self.events.lock().push(Event::Stage(index, state.clone()));
    }

    fn log_appended(&self, entry: &LogEntry) {
        self.events.lock().push(Event::Log(entry.clone()));
    }

    fn completed(&self, summary: &RunSummary) {
        self.events.lock().push(Event::Completed(summary.clone()));
    }

    fn failed(&self, message: &str) {
        self.events.lock().push(Event::Failed(message.to_string()));
    }
}
