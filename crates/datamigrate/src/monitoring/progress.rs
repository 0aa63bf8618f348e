//! Thread-safe progress counters and the periodic progress monitor.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default interval between progress reports.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Snapshot of migration progress at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressMetrics {
    pub total_rows: u64,
    pub processed_rows: u64,
    pub total_tables: u64,
    pub processed_tables: u64,
    pub rows_per_second: f64,
    pub tables_per_minute: f64,
    /// Estimated seconds until all rows are processed (0 when unknown).
    pub eta_seconds: f64,
    pub elapsed_seconds: f64,
    pub current_table: Option<String>,
    pub error_count: usize,
    pub progress_percent: f64,
}

#[derive(Debug, Default)]
struct TrackerState {
    current_table: Option<String>,
    errors: Vec<String>,
}

/// Shared progress counters for one migration run.
///
/// Row and table counters are atomics; the current table and the error
/// list sit behind a mutex. The monitor task reads concurrently with the
/// engine's writes.
#[derive(Debug)]
pub struct ProgressTracker {
    total_rows: AtomicU64,
    processed_rows: AtomicU64,
    total_tables: AtomicU64,
    processed_tables: AtomicU64,
    started: Instant,
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    pub fn new(total_rows: u64, total_tables: usize) -> Self {
        Self {
            total_rows: AtomicU64::new(total_rows),
            processed_rows: AtomicU64::new(0),
            total_tables: AtomicU64::new(total_tables as u64),
            processed_tables: AtomicU64::new(0),
            started: Instant::now(),
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Set the expected row total once it is known (after pre-validation).
    pub fn set_total_rows(&self, total: u64) {
        self.total_rows.store(total, Ordering::Relaxed);
    }

    /// Record processed rows.
    pub fn add_rows(&self, rows: u64) {
        self.processed_rows.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn set_current_table(&self, table: &str) {
        self.state.lock().current_table = Some(table.to_string());
    }

    /// Mark the current table as done.
    pub fn complete_table(&self) {
        self.processed_tables.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error, prefixed with its wall-clock time.
    pub fn add_error(&self, error: impl Into<String>) {
        let line = format!("[{}] {}", Utc::now().format("%H:%M:%S"), error.into());
        self.state.lock().errors.push(line);
    }

    pub fn processed_rows(&self) -> u64 {
        self.processed_rows.load(Ordering::Relaxed)
    }

    pub fn processed_tables(&self) -> u64 {
        self.processed_tables.load(Ordering::Relaxed)
    }

    /// Most recent errors, oldest first, at most `limit`.
    pub fn recent_errors(&self, limit: usize) -> Vec<String> {
        let state = self.state.lock();
        let skip = state.errors.len().saturating_sub(limit);
        state.errors[skip..].to_vec()
    }

    /// Compute current metrics.
    pub fn metrics(&self) -> ProgressMetrics {
        let total_rows = self.total_rows.load(Ordering::Relaxed);
        let processed_rows = self.processed_rows.load(Ordering::Relaxed);
        let total_tables = self.total_tables.load(Ordering::Relaxed);
        let processed_tables = self.processed_tables.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed().as_secs_f64();

        let (current_table, error_count) = {
            let state = self.state.lock();
            (state.current_table.clone(), state.errors.len())
        };

        let progress_percent = if total_rows > 0 {
            processed_rows as f64 / total_rows as f64 * 100.0
        } else {
            0.0
        };

        let rows_per_second = if elapsed > 0.0 {
            processed_rows as f64 / elapsed
        } else {
            0.0
        };

        let tables_per_minute = if elapsed > 0.0 {
            processed_tables as f64 / (elapsed / 60.0)
        } else {
            0.0
        };

        let eta_seconds = if rows_per_second > 0.0 && total_rows > processed_rows {
            (total_rows - processed_rows) as f64 / rows_per_second
        } else {
            0.0
        };

        ProgressMetrics {
            total_rows,
            processed_rows,
            total_tables,
            processed_tables,
            rows_per_second,
            tables_per_minute,
            eta_seconds,
            elapsed_seconds: elapsed,
            current_table,
            error_count,
            progress_percent,
        }
    }

    /// Emit one progress line.
    pub fn log_progress(&self) {
        let m = self.metrics();
        info!(
            "Progress: {:.1}% ({}/{} rows, {}/{} tables) | {:.0} rows/s | ETA {}{}",
            m.progress_percent,
            m.processed_rows,
            m.total_rows,
            m.processed_tables,
            m.total_tables,
            m.rows_per_second,
            format_duration(m.eta_seconds),
            m.current_table
                .as_deref()
                .map(|t| format!(" | current: {}", t))
                .unwrap_or_default(),
        );
    }

    /// Emit the end-of-run summary, including the most recent errors.
    pub fn log_summary(&self) {
        let m = self.metrics();
        info!(
            "Migration summary: {}/{} rows, {}/{} tables in {} ({:.0} rows/s, {:.1} tables/min)",
            m.processed_rows,
            m.total_rows,
            m.processed_tables,
            m.total_tables,
            format_duration(m.elapsed_seconds),
            m.rows_per_second,
            m.tables_per_minute,
        );
        if m.error_count > 0 {
            info!("{} error(s) recorded, most recent:", m.error_count);
            for error in self.recent_errors(5) {
                info!("  {}", error);
            }
        }
    }

    /// Create a batch tracker for a table that feeds row counts back into this tracker.
    pub fn batch_tracker(self: &Arc<Self>, table: &str, total_batches: usize) -> BatchTracker {
        BatchTracker {
            progress: Arc::clone(self),
            table: table.to_string(),
            total_batches,
            completed: AtomicUsize::new(0),
            rows: AtomicU64::new(0),
        }
    }
}

/// Per-batch progress for one table.
#[derive(Debug)]
pub struct BatchTracker {
    progress: Arc<ProgressTracker>,
    table: String,
    total_batches: usize,
    completed: AtomicUsize,
    rows: AtomicU64,
}

impl BatchTracker {
    pub fn start_batch(&self, batch: usize) {
        debug!(
            "{}: importing batch {}/{}",
            self.table, batch, self.total_batches
        );
    }

    /// Record a finished batch and advance the shared row counter.
    pub fn complete_batch(&self, rows: u64) {
        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        let total_rows = self.rows.fetch_add(rows, Ordering::Relaxed) + rows;
        self.progress.add_rows(rows);
        debug!(
            "{}: batch {}/{} complete ({} rows so far)",
            self.table, done, self.total_batches, total_rows
        );
    }

    pub fn completed_batches(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }
}

/// Background task logging progress on an interval.
pub struct ProgressMonitor {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressMonitor {
    /// Start reporting `tracker` every `interval`.
    pub fn start(tracker: Arc<ProgressTracker>, interval: Duration) -> Self {
        let token = CancellationToken::new();
        let stop = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => tracker.log_progress(),
                }
            }
        });

        Self { token, handle }
    }

    /// Stop the monitor and wait for it to exit.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            debug!("Progress monitor task ended abnormally: {}", e);
        }
    }
}

/// Format seconds as `1h2m3s`.
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "0s".to_string();
    }
    let total = seconds.round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}h{}m{}s", h, m, s)
    } else if m > 0 {
        format!("{}m{}s", m, s)
    } else {
        format!("{}s", s)
    }
}
