//! Logging handle passed explicitly to every component.
//!
//! Components never reach for a process-wide logger. They receive a [`Logger`]
//! at construction, which pairs a [`LogSink`] with the component's category.
//! The binary wires [`LogCrateSink`] (backed by the `log` facade), tests wire a
//! [`RecordingSink`] and inspect what was logged.

use std::{
    error::Error,
    sync::{Arc, Mutex},
};

use log::Level;

/// Host callback accepting every log record produced by pitlight.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, category: &str, message: &str, error: Option<&dyn Error>);
}

/// Forwards records to the `log` facade, using the category as the target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCrateSink;

impl LogSink for LogCrateSink {
    fn log(&self, level: Level, category: &str, message: &str, error: Option<&dyn Error>) {
        match error {
            Some(e) => log::log!(target: category, level, "{}: {}", message, e),
            None => log::log!(target: category, level, "{}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: Level,
    pub category: String,
    pub message: String,
    pub error: Option<String>,
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<LogRecord>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn count_at(&self, level: Level) -> usize {
        self.records().iter().filter(|r| r.level == level).count()
    }
}

impl LogSink for RecordingSink {
    fn log(&self, level: Level, category: &str, message: &str, error: Option<&dyn Error>) {
        if let Ok(mut records) = self.records.lock() {
            records.push(LogRecord {
                level,
                category: category.to_string(),
                message: message.to_string(),
                error: error.map(|e| e.to_string()),
            });
        }
    }
}

/// A sink bound to a category. Cheap to clone.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
    category: &'static str,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("category", &self.category)
            .finish()
    }
}

impl Logger {
    pub fn new(sink: Arc<dyn LogSink>, category: &'static str) -> Self {
        Self { sink, category }
    }

    /// Logger backed by the `log` facade.
    pub fn from_log_crate(category: &'static str) -> Self {
        Self::new(Arc::new(LogCrateSink), category)
    }

    /// Same sink, different category.
    pub fn child(&self, category: &'static str) -> Self {
        Self {
            sink: self.sink.clone(),
            category,
        }
    }

    pub fn category(&self) -> &'static str {
        self.category
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.sink
            .log(Level::Debug, self.category, message.as_ref(), None);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.sink.log(Level::Info, self.category, message.as_ref(), None);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.sink.log(Level::Warn, self.category, message.as_ref(), None);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.sink
            .log(Level::Error, self.category, message.as_ref(), None);
    }

    pub fn warn_with(&self, message: impl AsRef<str>, error: &dyn Error) {
        self.sink
            .log(Level::Warn, self.category, message.as_ref(), Some(error));
    }

    pub fn error_with(&self, message: impl AsRef<str>, error: &dyn Error) {
        self.sink
            .log(Level::Error, self.category, message.as_ref(), Some(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PitlightError;

    #[test]
    fn test_recording_sink_keeps_category_and_error() {
        let sink = RecordingSink::new();
        let logger = Logger::new(sink.clone(), "reader");

        logger.info("connected");
        logger.child("engine").error_with(
            "device failed",
            &PitlightError::DeviceCommandError {
                device: "wheel".to_string(),
                reason: "timeout".to_string(),
            },
        );

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].category, "reader");
        assert_eq!(records[0].error, None);
        assert_eq!(records[1].category, "engine");
        assert_eq!(records[1].level, Level::Error);
        assert_eq!(
            records[1].error.as_deref(),
            Some("Lighting device wheel failed: timeout")
        );
        assert_eq!(sink.count_at(Level::Error), 1);
    }
}
