//! Asynchronous migration timeline.
//!
//! Callers enqueue entries on a bounded channel; a single drain task forwards
//! each entry to `tracing` and appends it to the timeline.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the entry queue.
pub const LOG_QUEUE_CAPACITY: usize = 256;

/// Severity of a timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One timeline entry.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

impl LogEntry {
    fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            details: None,
            table: None,
        }
    }

    fn emit(&self) {
        let table = self.table.as_deref().unwrap_or("");
        let details = self.details.as_deref().unwrap_or("");
        match self.level {
            LogLevel::Debug => debug!(table, details, "{}", self.message),
            LogLevel::Info => info!(table, details, "{}", self.message),
            LogLevel::Warn => warn!(table, details, "{}", self.message),
            LogLevel::Error => error!(table, details, "{}", self.message),
        }
    }
}

/// Migration logger with a background drain task.
///
/// Must be created inside a tokio runtime.
pub struct MigrationLogger {
    tx: Mutex<Option<mpsc::Sender<LogEntry>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MigrationLogger {
    pub fn new() -> Self {
        Self::with_capacity(LOG_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<LogEntry>(capacity.max(1));
        let entries = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&entries);

        let handle = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                entry.emit();
                sink.lock().push(entry);
            }
        });

        Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            entries,
        }
    }

    /// Enqueue an entry. Entries logged after [`close`](Self::close) are
    /// emitted directly and not kept.
    pub async fn log(&self, entry: LogEntry) {
        let tx = self.tx.lock().clone();
        match tx {
            Some(tx) => {
                if let Err(mpsc::error::SendError(entry)) = tx.send(entry).await {
                    entry.emit();
                }
            }
            None => entry.emit(),
        }
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Info, message)).await;
    }

    pub async fn warn(&self, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Warn, message)).await;
    }

    pub async fn error(&self, message: impl Into<String>, details: impl Into<String>) {
        let mut entry = LogEntry::new(LogLevel::Error, message);
        entry.details = Some(details.into());
        self.log(entry).await;
    }

    /// Record rows moved for a table.
    pub async fn table_progress(&self, table: &str, rows: usize) {
        let mut entry = LogEntry::new(LogLevel::Info, format!("{} rows migrated", rows));
        entry.table = Some(table.to_string());
        self.log(entry).await;
    }

    /// Flush the queue and stop the drain task.
    pub async fn close(&self) {
        drop(self.tx.lock().take());
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Log drain task ended abnormally: {}", e);
            }
        }
    }

    /// Timeline entries drained so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }
}

impl Default for MigrationLogger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_available_after_close() {
        let logger = MigrationLogger::new();
        logger.info("Starting migration").await;
        logger.table_progress("users", 3).await;
        logger.error("Import failed", "table: orders").await;
        logger.close().await;

        let entries = logger.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "Starting migration");
        assert_eq!(entries[1].table.as_deref(), Some("users"));
        assert_eq!(entries[2].level, LogLevel::Error);
        assert_eq!(entries[2].details.as_deref(), Some("table: orders"));
    }

    #[tokio::test]
    async fn test_small_queue_keeps_order() {
        let logger = MigrationLogger::with_capacity(1);
        for i in 0..20 {
            logger.info(format!("entry {}", i)).await;
        }
        logger.close().await;

        let messages: Vec<_> = logger.entries().into_iter().map(|e| e.message).collect();
        let expected: Vec<_> = (0..20).map(|i| format!("entry {}", i)).collect();
        assert_eq!(messages, expected);
    }

    #[tokio::test]
    async fn test_log_after_close_is_not_kept() {
        let logger = MigrationLogger::new();
        logger.close().await;
        logger.warn("late").await;
        logger.close().await;
        assert!(logger.entries().is_empty());
    }
}
