//! Progress tracking and the migration timeline.

pub mod logger;
pub mod progress;

pub use logger::{LogEntry, LogLevel, MigrationLogger};
pub use progress::{
    format_duration, BatchTracker, ProgressMetrics, ProgressMonitor, ProgressTracker,
    DEFAULT_PROGRESS_INTERVAL,
};
