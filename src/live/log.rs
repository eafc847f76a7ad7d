use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Entries kept by `MemoryLogSink`
pub const MAX_LOG_ENTRIES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
    /// Protocol traffic
    Api,
    /// Per-chunk audio traffic
    Audio,
}

/// Diagnostic entry mirrored from the session client and controller
#[derive(Debug, Clone, Serialize)]
pub struct StreamingLog {
    pub date: DateTime<Utc>,
    pub level: LogLevel,
    /// Event kind, e.g. `client.open` or `server.turncomplete`
    pub kind: String,
    pub message: String,
}

impl StreamingLog {
    pub fn new(level: LogLevel, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            date: Utc::now(),
            level,
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Receiver of diagnostic entries
///
/// Implementations must not panic; a failing sink never affects the
/// protocol.
pub trait LogSink: Send + Sync {
    fn record(&self, entry: StreamingLog);
}

/// Forwards entries to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn record(&self, entry: StreamingLog) {
        match entry.level {
            LogLevel::Error => error!("[{}] {}", entry.kind, entry.message),
            LogLevel::Warn => warn!("[{}] {}", entry.kind, entry.message),
            LogLevel::Info | LogLevel::Success => info!("[{}] {}", entry.kind, entry.message),
            LogLevel::Api | LogLevel::Audio => debug!("[{}] {}", entry.kind, entry.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFilter {
    All,
    /// Everything except per-chunk audio traffic
    #[default]
    Important,
    Errors,
}

impl LogFilter {
    pub fn matches(&self, entry: &StreamingLog) -> bool {
        match self {
            LogFilter::All => true,
            LogFilter::Important => entry.level != LogLevel::Audio,
            LogFilter::Errors => entry.level == LogLevel::Error,
        }
    }
}

/// Keeps the most recent entries for display, also forwarding to `tracing`
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    entries: Mutex<VecDeque<StreamingLog>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries matching `filter`, oldest first
    pub fn entries(&self, filter: LogFilter) -> Vec<StreamingLog> {
        self.entries
            .lock()
            .map(|entries| entries.iter().filter(|e| filter.matches(e)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogSink for MemoryLogSink {
    fn record(&self, entry: StreamingLog) {
        TracingLogSink.record(entry.clone());

        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() == MAX_LOG_ENTRIES {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_keeps_last_entries() {
        let sink = MemoryLogSink::new();
        for i in 0..(MAX_LOG_ENTRIES + 10) {
            sink.record(StreamingLog::new(LogLevel::Info, "test", format!("entry {}", i)));
        }

        let entries = sink.entries(LogFilter::All);
        assert_eq!(entries.len(), MAX_LOG_ENTRIES);
        assert_eq!(entries[0].message, "entry 10");
        assert_eq!(entries[MAX_LOG_ENTRIES - 1].message, "entry 59");
    }

    #[test]
    fn test_filters() {
        let sink = MemoryLogSink::new();
        sink.record(StreamingLog::new(LogLevel::Audio, "client.realtimeInput", "chunk"));
        sink.record(StreamingLog::new(LogLevel::Success, "client.open", "connected"));
        sink.record(StreamingLog::new(LogLevel::Error, "client.error", "boom"));

        assert_eq!(sink.entries(LogFilter::All).len(), 3);
        assert_eq!(sink.entries(LogFilter::Important).len(), 2);

        let errors = sink.entries(LogFilter::Errors);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "boom");
    }
}
