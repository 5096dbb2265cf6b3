//! Append-only, time-ordered run log.

use chrono::Utc;
use docpipe_shared::{LogEntry, LogLevel};

/// Message of the marker entry left behind by [`Logger::clear`].
pub const START_MARKER: &str = "starting pipeline...";

/// Event record of the current run.
///
/// Entries are never edited or removed except by [`Logger::clear`], and their
/// timestamps never go backwards.
#[derive(Debug, Clone, Default)]
pub struct Logger {
    entries: Vec<LogEntry>,
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry stamped with the current time and return a copy of it.
    pub fn append(&mut self, level: LogLevel, message: impl Into<String>) -> LogEntry {
        let now = Utc::now();
        // Wall clock can step backwards; keep the sequence ordered anyway.
        let timestamp = match self.entries.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };

        let entry = LogEntry {
            timestamp,
            level,
            message: message.into(),
        };

        match level {
            LogLevel::Error => tracing::error!(message = %entry.message, "run log"),
            LogLevel::Success | LogLevel::Info => {
                tracing::info!(level = level.as_str(), message = %entry.message, "run log")
            }
        }

        self.entries.push(entry.clone());
        entry
    }

    /// Drop every entry and leave a single start marker. Returns the marker.
    pub fn clear(&mut self) -> LogEntry {
        self.entries.clear();
        self.append(LogLevel::Info, START_MARKER)
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }
}
