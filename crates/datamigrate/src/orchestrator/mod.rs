//! Migration engine - main workflow coordinator.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{MigrationConfig, MigrationMode};
use crate::core::{group_by_source_table, Record, StoreClient};
use crate::error::{MigrateError, Result};
use crate::monitoring::{
    LogEntry, MigrationLogger, ProgressMonitor, ProgressTracker, DEFAULT_PROGRESS_INTERVAL,
};
use crate::state::{RollbackManager, SnapshotStore, DEFAULT_SNAPSHOT_DIR};
use crate::transfer::{batch_count, BatchProcessor, WorkerPool};
use crate::verify::{ValidationResult, ValidationSummary, Validator};

/// Runs one migration between two stores.
pub struct MigrationEngine {
    config: MigrationConfig,
    source: Arc<dyn StoreClient>,
    target: Arc<dyn StoreClient>,
    snapshot_dir: PathBuf,
    cancel: CancellationToken,
    progress_interval: Duration,
}

/// Result of a migration run.
///
/// Populated on failure too, with whatever progress was made.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    /// Whether every phase succeeded.
    pub success: bool,

    pub mode: MigrationMode,
    pub source_db: String,
    pub target_db: String,

    /// Tables fully imported.
    pub tables_processed: usize,

    /// Rows written to the target.
    pub rows_migrated: u64,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Average throughput (rows/second).
    pub rows_per_second: f64,

    pub pre_validation: Vec<ValidationResult>,
    pub post_validation: Vec<ValidationResult>,

    /// Ordered error messages; the audit trail of a failed run.
    pub errors: Vec<String>,

    /// Snapshot to pass to rollback, when backups are enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,

    /// Timeline recorded by the migration logger.
    #[serde(skip)]
    pub timeline: Vec<LogEntry>,
}

/// A failed run: the partial result and the error that stopped it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct MigrationFailure {
    pub result: Box<MigrationResult>,
    #[source]
    pub error: MigrateError,
}

impl MigrationResult {
    fn new(config: &MigrationConfig) -> Self {
        let now = Utc::now();
        Self {
            success: false,
            mode: config.mode,
            source_db: config.source_db.clone(),
            target_db: config.target_db.clone(),
            tables_processed: 0,
            rows_migrated: 0,
            started_at: now,
            completed_at: now,
            duration_seconds: 0.0,
            rows_per_second: 0.0,
            pre_validation: Vec::new(),
            post_validation: Vec::new(),
            errors: Vec::new(),
            snapshot_id: None,
            timeline: Vec::new(),
        }
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Log a one-line summary plus any errors.
    pub fn log_summary(&self) {
        info!(
            "Migration {}: {} tables, {} rows in {:.1}s ({:.0} rows/s)",
            if self.success { "completed" } else { "failed" },
            self.tables_processed,
            self.rows_migrated,
            self.duration_seconds,
            self.rows_per_second
        );
        for error in &self.errors {
            warn!("  {}", error);
        }
        if let Some(id) = &self.snapshot_id {
            info!("Snapshot: {}", id);
        }
    }
}

impl MigrationEngine {
    /// Create an engine. Fails if the config is invalid.
    pub fn new(
        config: MigrationConfig,
        source: Arc<dyn StoreClient>,
        target: Arc<dyn StoreClient>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            target,
            snapshot_dir: PathBuf::from(DEFAULT_SNAPSHOT_DIR),
            cancel: CancellationToken::new(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        })
    }

    /// Directory for rollback snapshots.
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = dir.into();
        self
    }

    /// Token that aborts the run between tables, batches and pool jobs.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Interval between progress log lines.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Run the migration.
    pub async fn execute(&self) -> std::result::Result<MigrationResult, MigrationFailure> {
        let started = Instant::now();
        let mut result = MigrationResult::new(&self.config);

        let logger = MigrationLogger::new();
        let progress = Arc::new(ProgressTracker::new(0, self.config.tables.len()));
        let monitor = ProgressMonitor::start(Arc::clone(&progress), self.progress_interval);

        let rollback = self.config.create_backup.then(|| {
            RollbackManager::new(
                Arc::clone(&self.target),
                SnapshotStore::new(&self.snapshot_dir),
            )
        });

        logger
            .info(format!(
                "Starting {} migration from {} to {} ({} tables)",
                self.config.mode,
                self.config.source_db,
                self.config.target_db,
                self.config.tables.len()
            ))
            .await;

        let outcome = self
            .run(&mut result, &logger, &progress, rollback.as_ref())
            .await;

        monitor.stop().await;
        progress.log_summary();

        if let (Some(manager), Some(id)) = (&rollback, &result.snapshot_id) {
            let marked = if outcome.is_ok() {
                manager.mark_completed(id)
            } else {
                manager.mark_failed(id)
            };
            if let Err(e) = marked {
                warn!("Failed to finalize snapshot {}: {}", id, e);
                result.errors.push(format!("failed to finalize snapshot {}: {}", id, e));
            }
        }

        match &outcome {
            Ok(()) => logger.info("Migration completed successfully").await,
            Err(e) => {
                result.errors.push(e.to_string());
                logger.error("Migration failed", e.to_string()).await;
                if let Some(id) = &result.snapshot_id {
                    logger
                        .info(format!("Snapshot {} is available for rollback", id))
                        .await;
                }
            }
        }
        logger.close().await;

        result.success = outcome.is_ok();
        result.completed_at = Utc::now();
        result.duration_seconds = started.elapsed().as_secs_f64();
        result.rows_per_second = if result.duration_seconds > 0.0 {
            result.rows_migrated as f64 / result.duration_seconds
        } else {
            0.0
        };
        result.timeline = logger.entries();
        result.log_summary();

        match outcome {
            Ok(()) => Ok(result),
            Err(error) => Err(MigrationFailure {
                result: Box::new(result),
                error,
            }),
        }
    }

    async fn run(
        &self,
        result: &mut MigrationResult,
        logger: &MigrationLogger,
        progress: &Arc<ProgressTracker>,
        rollback: Option<&RollbackManager>,
    ) -> Result<()> {
        if self.config.mode != MigrationMode::Full {
            return Err(MigrateError::NotSupported(self.config.mode.to_string()));
        }

        if let Some(manager) = rollback {
            let snapshot = manager.create_snapshot(&self.config).await?;
            logger
                .info(format!("Created rollback snapshot {}", snapshot.id))
                .await;
            result.snapshot_id = Some(snapshot.id);
        }

        let validator = Validator::new(Arc::clone(&self.source), Arc::clone(&self.target))
            .with_sample_size(self.config.sample_size)
            .with_primary_keys(self.config.primary_keys.clone());

        // Phase 1: Pre-migration validation
        if self.config.validate_data {
            info!("Phase 1: Validating source");
            let phase_start = Instant::now();
            let pre = validator
                .pre_migration_validation(&self.config.tables)
                .await?;
            let summary = ValidationSummary::from_results(&pre, phase_start);
            summary.log("Pre-migration");
            progress.set_total_rows(summary.total_rows);
            result.pre_validation = pre;

            if !summary.is_valid() {
                result.errors.extend(summary.errors.iter().cloned());
                return Err(MigrateError::Validation(format!(
                    "pre-migration validation failed for {} of {} tables",
                    summary.invalid_tables, summary.total_tables
                )));
            }
        }

        // Phase 2: Transfer
        info!("Phase 2: Migrating data");
        let snapshot_id = result.snapshot_id.clone();
        let snapshot = rollback.zip(snapshot_id.as_deref());
        self.run_full(result, logger, progress, &validator, snapshot)
            .await?;

        // Phase 3: Post-migration validation
        if self.config.validate_data {
            info!("Phase 3: Validating target");
            let phase_start = Instant::now();
            let post = validator
                .post_migration_validation(&self.config.tables, &result.pre_validation)
                .await?;
            let summary = ValidationSummary::from_results(&post, phase_start);
            summary.log("Post-migration");
            result.post_validation = post;

            if !summary.is_valid() {
                result.errors.extend(summary.errors.iter().cloned());
                return Err(MigrateError::Validation(format!(
                    "post-migration validation failed for {} of {} tables",
                    summary.invalid_tables, summary.total_tables
                )));
            }
        }

        Ok(())
    }

    async fn run_full(
        &self,
        result: &mut MigrationResult,
        logger: &MigrationLogger,
        progress: &Arc<ProgressTracker>,
        validator: &Validator,
        snapshot: Option<(&RollbackManager, &str)>,
    ) -> Result<()> {
        let tables = &self.config.tables;
        let batch_size = self.config.batch_size;

        let prefetch = self.config.concurrent && tables.len() > 1;
        let mut fetched: BTreeMap<String, Vec<Record>> = if prefetch {
            let records = WorkerPool::new(self.config.workers)
                .with_cancellation(self.cancel.clone())
                .process_tables(Arc::clone(&self.source), tables)
                .await
                .inspect_err(|e| progress.add_error(e.to_string()))?;
            group_by_source_table(records).tables
        } else {
            BTreeMap::new()
        };

        for table in tables {
            if self.cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }
            progress.set_current_table(table);

            let mut records = if prefetch {
                fetched.remove(table).unwrap_or_default()
            } else {
                self.source
                    .fetch_all_data(std::slice::from_ref(table))
                    .await
                    .inspect_err(|e| progress.add_error(e.to_string()))?
            };
            for record in &mut records {
                record.set_source_table(table);
            }
            debug!("{}: fetched {} records", table, records.len());

            if self.config.validate_data {
                validator
                    .validate_data_types(&records)
                    .inspect_err(|e| progress.add_error(e.to_string()))?;
            }

            let count = records.len();
            let committed = AtomicU64::new(0);
            let imported = if count > batch_size {
                let tracker = progress.batch_tracker(table, batch_count(count, batch_size));
                BatchProcessor::new(batch_size)
                    .with_cancellation(self.cancel.clone())
                    .process_tracked(&records, &tracker, |chunk| {
                        self.import_chunk(chunk, snapshot, &committed)
                    })
                    .await
            } else if count > 0 {
                let imported = self.import_chunk(&records, snapshot, &committed).await;
                if imported.is_ok() {
                    progress.add_rows(count as u64);
                }
                imported
            } else {
                Ok(())
            };

            // Batches written before a failure stay on the target.
            result.rows_migrated += committed.load(Ordering::Relaxed);

            if let Err(e) = imported {
                progress.add_error(format!("{}: {}", table, e));
                return Err(match e {
                    MigrateError::Cancelled => MigrateError::Cancelled,
                    e @ MigrateError::Import { .. } => e,
                    other => MigrateError::import(table, other.to_string()),
                });
            }

            progress.complete_table();
            result.tables_processed += 1;
            logger.table_progress(table, count).await;
            info!("{}: migrated {} rows", table, count);
        }

        Ok(())
    }

    async fn import_chunk(
        &self,
        chunk: &[Record],
        snapshot: Option<(&RollbackManager, &str)>,
        committed: &AtomicU64,
    ) -> Result<()> {
        self.target.import_data(chunk).await?;
        committed.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        if let Some((manager, id)) = snapshot {
            manager.update_snapshot_with_migrated_data(id, chunk)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MemoryStore;
    use crate::state::SnapshotStatus;
    use tempfile::TempDir;

    fn rows(n: i64) -> Vec<Record> {
        (1..=n)
            .map(|i| Record::new().with("id", i).with("name", format!("row {}", i)))
            .collect()
    }

    fn stores() -> (Arc<MemoryStore>, Arc<MemoryStore>) {
        let source = Arc::new(MemoryStore::new("source"));
        source.seed("users", rows(3));
        source.seed("orders", rows(4));
        (source, Arc::new(MemoryStore::new("target")))
    }

    fn config(tables: &[&str]) -> MigrationConfig {
        MigrationConfig::new(
            "source",
            "target",
            tables.iter().map(|t| t.to_string()).collect(),
        )
    }

    fn engine(
        config: MigrationConfig,
        source: &Arc<MemoryStore>,
        target: &Arc<MemoryStore>,
        dir: &TempDir,
    ) -> MigrationEngine {
        MigrationEngine::new(config, source.clone(), target.clone())
            .unwrap()
            .with_snapshot_dir(dir.path())
            .with_progress_interval(Duration::from_millis(10))
    }

    // =========================================================================
    // Full mode
    // =========================================================================

    #[tokio::test]
    async fn test_sequential_rows_equal_fetched() {
        let dir = TempDir::new().unwrap();
        let (source, target) = stores();

        let result = engine(config(&["users", "orders"]), &source, &target, &dir)
            .execute()
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.tables_processed, 2);
        assert_eq!(result.rows_migrated, 7);
        assert!(result.errors.is_empty());
        assert!(result.snapshot_id.is_none());
        assert_eq!(target.row_count("users"), 3);
        assert_eq!(target.row_count("orders"), 4);
    }

    #[tokio::test]
    async fn test_end_to_end_concurrent_batched_with_backup() {
        let dir = TempDir::new().unwrap();
        let (source, target) = stores();
        let mut cfg = config(&["users", "orders"]);
        cfg.concurrent = true;
        cfg.workers = 2;
        cfg.batch_size = 2;
        cfg.validate_data = true;
        cfg.create_backup = true;

        let result = engine(cfg, &source, &target, &dir).execute().await.unwrap();

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.rows_migrated, 7);
        assert_eq!(result.tables_processed, 2);
        assert_eq!(target.row_count("users"), source.row_count("users"));
        assert_eq!(target.row_count("orders"), source.row_count("orders"));
        assert_eq!(result.pre_validation.len(), 2);
        assert!(result.post_validation.iter().all(|r| r.is_valid));

        // users: 2 batches, orders: 2 batches
        assert_eq!(target.import_calls(), 4);

        let id = result.snapshot_id.clone().unwrap();
        let snapshot = SnapshotStore::new(dir.path()).load(&id).unwrap();
        assert_eq!(snapshot.status, SnapshotStatus::Completed);
        assert_eq!(snapshot.migrated_rows(), 7);
    }

    #[tokio::test]
    async fn test_single_table_with_concurrency_fetches_directly() {
        let dir = TempDir::new().unwrap();
        let (source, target) = stores();
        let mut cfg = config(&["users"]);
        cfg.concurrent = true;

        let result = engine(cfg, &source, &target, &dir).execute().await.unwrap();
        assert_eq!(result.rows_migrated, 3);
        assert_eq!(source.fetch_calls(), 1);
        assert_eq!(target.import_calls(), 1);
    }

    #[tokio::test]
    async fn test_batch_processor_used_above_batch_size() {
        let dir = TempDir::new().unwrap();
        let (source, target) = stores();
        source.seed("events", rows(5));
        let mut cfg = config(&["events"]);
        cfg.batch_size = 2;

        engine(cfg, &source, &target, &dir).execute().await.unwrap();
        assert_eq!(target.import_calls(), 3);
        assert_eq!(target.row_count("events"), 5);
    }

    #[tokio::test]
    async fn test_empty_table_counts_as_processed() {
        let dir = TempDir::new().unwrap();
        let (source, target) = stores();
        source.seed("empty", Vec::new());

        let result = engine(config(&["empty"]), &source, &target, &dir)
            .execute()
            .await
            .unwrap();
        assert_eq!(result.tables_processed, 1);
        assert_eq!(result.rows_migrated, 0);
        assert_eq!(target.import_calls(), 0);
    }

    // =========================================================================
    // Failures
    // =========================================================================

    #[tokio::test]
    async fn test_pre_validation_failure_aborts_before_writes() {
        let dir = TempDir::new().unwrap();
        let (source, target) = stores();
        let mut cfg = config(&["users", "missing"]);
        cfg.validate_data = true;

        let failure = engine(cfg, &source, &target, &dir)
            .execute()
            .await
            .unwrap_err();

        assert!(matches!(failure.error, MigrateError::Validation(_)));
        assert!(!failure.result.success);
        assert_eq!(failure.result.pre_validation.len(), 2);
        assert!(failure.result.errors.iter().any(|e| e.contains("missing")));
        assert_eq!(target.import_calls(), 0);
    }

    #[tokio::test]
    async fn test_import_failure_marks_snapshot_failed() {
        let dir = TempDir::new().unwrap();
        let (source, target) = stores();
        target.fail_imports(true);
        let mut cfg = config(&["users", "orders"]);
        cfg.create_backup = true;

        let failure = engine(cfg, &source, &target, &dir)
            .execute()
            .await
            .unwrap_err();

        assert!(matches!(failure.error, MigrateError::Import { .. }));
        assert_eq!(failure.result.tables_processed, 0);
        // Aborted on the first table.
        assert_eq!(target.import_calls(), 1);

        let id = failure.result.snapshot_id.clone().unwrap();
        let snapshot = SnapshotStore::new(dir.path()).load(&id).unwrap();
        assert_eq!(snapshot.status, SnapshotStatus::Failed);
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_committed_row_count() {
        let dir = TempDir::new().unwrap();
        let (source, target) = stores();
        source.seed("events", rows(5));
        target.fail_imports_after(1);
        let mut cfg = config(&["events"]);
        cfg.batch_size = 2;

        let failure = engine(cfg, &source, &target, &dir)
            .execute()
            .await
            .unwrap_err();

        assert!(matches!(failure.error, MigrateError::Import { .. }));
        assert!(failure.error.to_string().contains("batch 2/3"));
        assert_eq!(target.row_count("events"), 2);
        assert_eq!(failure.result.rows_migrated, 2);
        assert_eq!(failure.result.tables_processed, 0);
    }

    #[tokio::test]
    async fn test_worker_pool_failure_aborts_without_writes() {
        let dir = TempDir::new().unwrap();
        let (source, target) = stores();
        source.fail_fetch_for("orders");
        let mut cfg = config(&["users", "orders"]);
        cfg.concurrent = true;

        let failure = engine(cfg, &source, &target, &dir)
            .execute()
            .await
            .unwrap_err();

        match &failure.error {
            MigrateError::Fetch { table, .. } => assert_eq!(table, "orders"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(target.import_calls(), 0);
    }

    #[tokio::test]
    async fn test_post_validation_detects_mismatch() {
        let dir = TempDir::new().unwrap();
        let (source, target) = stores();
        // Pre-existing target row makes the count differ after import.
        target.seed("users", vec![Record::new().with("id", 100)]);
        let mut cfg = config(&["users"]);
        cfg.validate_data = true;

        let failure = engine(cfg, &source, &target, &dir)
            .execute()
            .await
            .unwrap_err();

        assert!(matches!(failure.error, MigrateError::Validation(_)));
        assert_eq!(failure.result.rows_migrated, 3);
        assert!(!failure.result.post_validation[0].is_valid);
        // Detection only: imported rows stay in place.
        assert_eq!(target.row_count("users"), 4);
    }

    #[tokio::test]
    async fn test_non_finite_values_rejected() {
        let dir = TempDir::new().unwrap();
        let (source, target) = stores();
        source.seed("metrics", vec![Record::new().with("id", 1).with("ratio", f64::INFINITY)]);
        let mut cfg = config(&["metrics"]);
        cfg.validate_data = true;

        let failure = engine(cfg, &source, &target, &dir)
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(failure.error, MigrateError::Validation(_)));
        assert_eq!(target.import_calls(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_modes() {
        for mode in [MigrationMode::Incremental, MigrationMode::Scheduled] {
            let dir = TempDir::new().unwrap();
            let (source, target) = stores();
            let mut cfg = config(&["users"]);
            cfg.mode = mode;
            cfg.create_backup = true;

            let failure = engine(cfg, &source, &target, &dir)
                .execute()
                .await
                .unwrap_err();
            assert!(matches!(failure.error, MigrateError::NotSupported(_)));
            assert!(failure.error.to_string().contains("not supported"));
            assert!(failure.result.snapshot_id.is_none());
            assert_eq!(source.fetch_calls(), 0);
        }
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let dir = TempDir::new().unwrap();
        let (source, target) = stores();
        let token = CancellationToken::new();
        token.cancel();

        let failure = engine(config(&["users", "orders"]), &source, &target, &dir)
            .with_cancellation(token)
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(failure.error, MigrateError::Cancelled));
        assert_eq!(target.import_calls(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (source, target) = stores();
        let result = MigrationEngine::new(config(&[]), source, target);
        assert!(matches!(result, Err(MigrateError::Config(_))));
    }

    // =========================================================================
    // Result and rollback
    // =========================================================================

    #[tokio::test]
    async fn test_result_json_and_timeline() {
        let dir = TempDir::new().unwrap();
        let (source, target) = stores();

        let result = engine(config(&["users"]), &source, &target, &dir)
            .execute()
            .await
            .unwrap();

        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["rows_migrated"], 3);
        assert_eq!(json["mode"], "full");
        assert!(json.get("timeline").is_none());

        assert!(result
            .timeline
            .iter()
            .any(|e| e.table.as_deref() == Some("users")));
    }

    #[tokio::test]
    async fn test_rollback_after_migration_restores_target() {
        let dir = TempDir::new().unwrap();
        let (source, target) = stores();
        let mut cfg = config(&["users", "orders"]);
        cfg.create_backup = true;

        let result = engine(cfg, &source, &target, &dir).execute().await.unwrap();
        let id = result.snapshot_id.unwrap();

        let manager = RollbackManager::new(target.clone(), SnapshotStore::new(dir.path()));
        manager.roll_back_migration(&id).await.unwrap();
        assert_eq!(target.row_count("users"), 0);
        assert_eq!(target.row_count("orders"), 0);

        assert!(matches!(
            manager.roll_back_migration(&id).await,
            Err(MigrateError::AlreadyRolledBack(_))
        ));
    }
}
