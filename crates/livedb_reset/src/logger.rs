//! Sinks for reconciliation decisions.
//!
//! The reconciler describes every non-trivial decision (object created,
//! object removed, property overwritten, local edit kept) in one
//! human-readable line. The lines are not a stable format.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::Level;

/// Receives reconciliation decisions.
pub trait ResetLogger {
    /// Records one line at `level`.
    fn log(&mut self, level: Level, line: &str);
}

/// Forwards lines to `tracing` under the `livedb_reset` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingResetLogger;

impl ResetLogger for TracingResetLogger {
    fn log(&mut self, level: Level, line: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "livedb_reset", "{line}"),
            Level::WARN => tracing::warn!(target: "livedb_reset", "{line}"),
            Level::INFO => tracing::info!(target: "livedb_reset", "{line}"),
            Level::DEBUG => tracing::debug!(target: "livedb_reset", "{line}"),
            Level::TRACE => tracing::trace!(target: "livedb_reset", "{line}"),
        }
    }
}

/// Keeps every line in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemoryResetLogger {
    lines: Arc<Mutex<Vec<(Level, String)>>>,
}

impl MemoryResetLogger {
    /// Creates an empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded line, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().iter().map(|(_, line)| line.clone()).collect()
    }

    /// Lines recorded at `level`.
    pub fn lines_at(&self, level: Level) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line.clone())
            .collect()
    }

    /// Returns true if some line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|(_, line)| line.contains(needle))
    }
}

impl ResetLogger for MemoryResetLogger {
    fn log(&mut self, level: Level, line: &str) {
        self.lines.lock().push((level, line.to_owned()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_logger_shares_lines() {
        let logger = MemoryResetLogger::new();
        let mut writer = logger.clone();
        writer.log(Level::INFO, "created person -42");
        writer.log(Level::DEBUG, "table 'dog' will remain");
        assert_eq!(logger.lines().len(), 2);
        assert_eq!(logger.lines_at(Level::INFO), vec!["created person -42".to_owned()]);
        assert!(logger.contains("dog"));
    }

    #[test]
    fn tracing_logger_accepts_every_level() {
        let mut logger = TracingResetLogger;
        for level in [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE] {
            logger.log(level, "line");
        }
    }
}
