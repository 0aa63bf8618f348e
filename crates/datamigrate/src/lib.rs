//! # datamigrate
//!
//! Migration orchestration between heterogeneous record stores.
//!
//! This library moves every record of a set of tables from a source store to
//! a target store with:
//!
//! - **Concurrent fetches** through a bounded worker pool
//! - **Batched imports** with per-batch progress
//! - **Pre/post validation** of row counts and record samples
//! - **Rollback snapshots** persisted as JSON files
//! - **Progress tracking** with throughput and ETA
//!
//! Stores plug in through the [`StoreClient`] trait; a JSON directory store
//! and an in-memory store are bundled.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use datamigrate::{JsonDirStore, MigrationConfig, MigrationEngine, StoreClient};
//!
//! #[tokio::main]
//! async fn main() -> datamigrate::Result<()> {
//!     let source = Arc::new(JsonDirStore::new("legacy", "./data/legacy"));
//!     let target = Arc::new(JsonDirStore::new("warehouse", "./data/warehouse"));
//!     source.connect().await?;
//!     target.connect().await?;
//!
//!     let config = MigrationConfig::new("legacy", "warehouse", vec!["users".into()]);
//!     let engine = MigrationEngine::new(config, source, target)?;
//!     match engine.execute().await {
//!         Ok(result) => println!("Migrated {} rows", result.rows_migrated),
//!         Err(failure) => eprintln!("Migration failed: {}", failure.error),
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod monitoring;
pub mod orchestrator;
pub mod state;
pub mod transfer;
pub mod verify;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, MigrationMode, MigrationSettings, StoreConfig, StoreKind};
pub use core::{group_by_source_table, Record, StoreClient, Value, SOURCE_TABLE_KEY};
pub use drivers::{open_store, JsonDirStore, MemoryStore};
pub use error::{MigrateError, Result};
pub use monitoring::{MigrationLogger, ProgressTracker};
pub use orchestrator::{MigrationEngine, MigrationFailure, MigrationResult};
pub use state::{MigrationSnapshot, RollbackManager, SnapshotStatus, SnapshotStore};
pub use transfer::{BatchProcessor, WorkerPool};
pub use verify::{ValidationResult, ValidationSummary, Validator};
