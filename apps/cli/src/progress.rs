//! Terminal rendering of a pipeline run using indicatif bars.

use docpipe_core::{PresentationLayer, STAGES, StageState};
use docpipe_shared::{LogEntry, LogLevel, RunSummary, StageStatus};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// One progress bar per stage plus log lines printed above them.
pub(crate) struct CliPresentation {
    multi: MultiProgress,
    bars: Vec<ProgressBar>,
}

impl CliPresentation {
    pub(crate) fn new() -> Self {
        let multi = MultiProgress::new();
        let style = ProgressStyle::with_template("{prefix:>3} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");

        let bars = STAGES
            .iter()
            .map(|descriptor| {
                let bar = multi.add(ProgressBar::new(100));
                bar.set_style(style.clone());
                bar.set_prefix(format!("{}.", descriptor.index));
                bar.set_message(format!(
                    "{}: {}",
                    descriptor.name,
                    StageStatus::Waiting.default_text()
                ));
                bar
            })
            .collect();

        Self { multi, bars }
    }

    /// Print an out-of-band line above the bars.
    pub(crate) fn note(&self, line: &str) {
        let _ = self.multi.println(line);
    }

    fn bar(&self, index: u8) -> Option<&ProgressBar> {
        usize::from(index)
            .checked_sub(1)
            .and_then(|i| self.bars.get(i))
    }
}

impl PresentationLayer for CliPresentation {
    fn stage_changed(&self, index: u8, state: &StageState) {
        let Some(bar) = self.bar(index) else {
            return;
        };
        let name = STAGES
            .iter()
            .find(|d| d.index == index)
            .map(|d| d.name)
            .unwrap_or("stage");

        if state.status == StageStatus::Waiting {
            bar.reset();
        }
        bar.set_position(u64::from(state.progress));
        bar.set_message(format!("{name}: {}", state.status_text));
        match state.status {
            StageStatus::Completed => bar.finish(),
            StageStatus::Failed => bar.abandon(),
            StageStatus::Waiting | StageStatus::Active => {}
        }
    }

    fn log_appended(&self, entry: &LogEntry) {
        let marker = match entry.level {
            LogLevel::Info => " ",
            LogLevel::Success => "+",
            LogLevel::Error => "!",
        };
        self.note(&format!(
            "[{}] {marker} {}",
            entry.timestamp.format("%H:%M:%S"),
            entry.message
        ));
    }

    fn completed(&self, _summary: &RunSummary) {
        for bar in &self.bars {
            if !bar.is_finished() {
                bar.finish();
            }
        }
    }

    fn failed(&self, message: &str) {
        for bar in &self.bars {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
        self.note(&format!("Pipeline failed: {message}"));
    }
}
