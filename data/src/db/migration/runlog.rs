//! Per-run log handle
//!
//! Every message is forwarded to the `log` facade under the
//! `clubmigrate::run` target and kept in memory, so a run can be inspected
//! (or its warnings counted) after the fact.

use log::Level;
use serde::Serialize;
use uuid::Uuid;

pub const RUN_TARGET: &str = "clubmigrate::run";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    #[serde(serialize_with = "serialize_level")]
    pub level: Level,
    pub message: String,
}

fn serialize_level<S: serde::Serializer>(level: &Level, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(level.as_str())
}

#[derive(Debug, Clone)]
pub struct RunLog {
    run_id: Uuid,
    entries: Vec<LogEntry>,
}

impl RunLog {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            entries: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn record(&mut self, level: Level, message: impl Into<String>) {
        let message = message.into();
        log::log!(target: RUN_TARGET, level, "{}", message);
        self.entries.push(LogEntry { level, message });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.record(Level::Info, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.record(Level::Warn, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.record(Level::Error, message);
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.record(Level::Debug, message);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn count(&self, level: Level) -> usize {
        self.entries.iter().filter(|e| e.level == level).count()
    }

    /// Entries whose message mentions `needle`
    pub fn matching<'a>(&'a self, needle: &'a str) -> impl Iterator<Item = &'a LogEntry> {
        self.entries.iter().filter(move |e| e.message.contains(needle))
    }
}
