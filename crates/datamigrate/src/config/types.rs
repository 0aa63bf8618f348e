//! Configuration type definitions with auto-tuning based on system resources.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

use crate::error::MigrateError;

/// Default number of records per import batch.
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

/// Default number of records retained per table for sample comparison.
pub const DEFAULT_SAMPLE_SIZE: usize = 100;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let total_memory_gb = sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
        let cpu_cores = sys.cpus().len().max(1);

        Self {
            total_memory_gb,
            cpu_cores,
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Migration mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
    /// Copy every record of every configured table.
    #[default]
    Full,

    /// Delta-only copy above a per-table watermark. Not supported.
    Incremental,

    /// Recurring runs on a schedule. Not supported.
    Scheduled,
}

impl MigrationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationMode::Full => "full",
            MigrationMode::Incremental => "incremental",
            MigrationMode::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationMode {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(MigrationMode::Full),
            "incremental" => Ok(MigrationMode::Incremental),
            "scheduled" => Ok(MigrationMode::Scheduled),
            other => Err(MigrateError::Config(format!(
                "invalid mode '{}', expected one of: full, incremental, scheduled",
                other
            ))),
        }
    }
}

/// Immutable input for one migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Migration mode.
    pub mode: MigrationMode,

    /// Source store identifier.
    pub source_db: String,

    /// Target store identifier.
    pub target_db: String,

    /// Tables or collections to migrate, in processing order.
    pub tables: Vec<String>,

    /// Worker pool size for concurrent fetches.
    pub workers: usize,

    /// Maximum records per import batch.
    pub batch_size: usize,

    /// Fetch tables through the worker pool.
    pub concurrent: bool,

    /// Run pre/post validation and value type checks.
    pub validate_data: bool,

    /// Capture a rollback snapshot before writing.
    pub create_backup: bool,

    /// Explicit primary key column per table.
    ///
    /// Used to correlate validation samples and to delete migrated rows on rollback.
    #[serde(default)]
    pub primary_keys: BTreeMap<String, String>,

    /// Records retained per table for sample comparison.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Watermark column for incremental mode (recorded only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incremental_column: Option<String>,
}

impl MigrationConfig {
    /// Create a full-mode config with default tuning.
    pub fn new(
        source_db: impl Into<String>,
        target_db: impl Into<String>,
        tables: Vec<String>,
    ) -> Self {
        Self {
            mode: MigrationMode::Full,
            source_db: source_db.into(),
            target_db: target_db.into(),
            tables,
            workers: 4,
            batch_size: DEFAULT_BATCH_SIZE,
            concurrent: false,
            validate_data: false,
            create_backup: false,
            primary_keys: BTreeMap::new(),
            sample_size: DEFAULT_SAMPLE_SIZE,
            incremental_column: None,
        }
    }

    /// Primary key column configured for a table.
    pub fn primary_key(&self, table: &str) -> Option<&str> {
        self.primary_keys.get(table).map(String::as_str)
    }
}

/// Root configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Store definitions keyed by identifier.
    #[serde(default)]
    pub stores: BTreeMap<String, StoreConfig>,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationSettings,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.migration = self.migration.with_auto_tuning(&resources);
        self
    }
}

/// Store definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Driver kind.
    pub kind: StoreKind,

    /// Data location (directory for `json_dir`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Bundled store drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// One `<table>.json` array per table inside a directory.
    JsonDir,

    /// Process-local in-memory store.
    Memory,
}

/// Migration behavior as written in the config file.
/// Tuning fields use Option<T> to distinguish "not set" (auto-tuned) from
/// "explicitly set".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    /// Migration mode (default: full).
    #[serde(default)]
    pub mode: MigrationMode,

    /// Default source store identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Default target store identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Tables to migrate. Empty means discover from the source.
    #[serde(default)]
    pub tables: Vec<String>,

    /// Worker pool size. Auto-tuned to CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Records per import batch (default: 1000).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Concurrent per-table fetch (default: true).
    #[serde(default = "default_true")]
    pub concurrent: bool,

    /// Pre/post validation (default: true).
    #[serde(default = "default_true")]
    pub validate: bool,

    /// Rollback snapshot before writing (default: false).
    #[serde(default)]
    pub backup: bool,

    /// Primary key column per table.
    #[serde(default)]
    pub primary_keys: BTreeMap<String, String>,

    /// Records sampled per table during validation (default: 100).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<usize>,

    /// Snapshot directory (default: migration_snapshots).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_dir: Option<PathBuf>,

    /// Watermark column for incremental mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incremental_column: Option<String>,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            mode: MigrationMode::Full,
            source: None,
            target: None,
            tables: Vec::new(),
            workers: None,
            batch_size: None,
            concurrent: true,
            validate: true,
            backup: false,
            primary_keys: BTreeMap::new(),
            sample_size: None,
            snapshot_dir: None,
            incremental_column: None,
        }
    }
}

impl MigrationSettings {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        // Workers: one per core, capped at 32
        if self.workers.is_none() {
            self.workers = Some(resources.cpu_cores.clamp(1, 32));
        }

        if self.batch_size.is_none() {
            self.batch_size = Some(DEFAULT_BATCH_SIZE);
        }

        info!(
            "Auto-tuned config: workers={}, batch_size={}",
            self.get_workers(),
            self.get_batch_size(),
        );

        self
    }

    pub fn get_workers(&self) -> usize {
        self.workers.unwrap_or(4)
    }

    pub fn get_batch_size(&self) -> usize {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }

    pub fn get_sample_size(&self) -> usize {
        self.sample_size.unwrap_or(DEFAULT_SAMPLE_SIZE)
    }

    /// Build the run config for a source/target pair and table list.
    pub fn to_migration_config(
        &self,
        source_db: &str,
        target_db: &str,
        tables: Vec<String>,
    ) -> MigrationConfig {
        MigrationConfig {
            mode: self.mode,
            source_db: source_db.to_string(),
            target_db: target_db.to_string(),
            tables,
            workers: self.get_workers(),
            batch_size: self.get_batch_size(),
            concurrent: self.concurrent,
            validate_data: self.validate,
            create_backup: self.backup,
            primary_keys: self.primary_keys.clone(),
            sample_size: self.get_sample_size(),
            incremental_column: self.incremental_column.clone(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_sample_size() -> usize {
    DEFAULT_SAMPLE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("full".parse::<MigrationMode>().unwrap(), MigrationMode::Full);
        assert_eq!(
            "Incremental".parse::<MigrationMode>().unwrap(),
            MigrationMode::Incremental
        );
        assert!("delta".parse::<MigrationMode>().is_err());
    }

    #[test]
    fn test_auto_tuning_keeps_explicit_values() {
        let settings = MigrationSettings {
            workers: Some(3),
            ..Default::default()
        };
        let resources = SystemResources {
            total_memory_gb: 16.0,
            cpu_cores: 12,
        };

        let tuned = settings.with_auto_tuning(&resources);
        assert_eq!(tuned.get_workers(), 3);
        assert_eq!(tuned.get_batch_size(), DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_auto_tuning_workers_from_cores() {
        let resources = SystemResources {
            total_memory_gb: 8.0,
            cpu_cores: 64,
        };
        let tuned = MigrationSettings::default().with_auto_tuning(&resources);
        assert_eq!(tuned.get_workers(), 32);
    }

    #[test]
    fn test_to_migration_config() {
        let mut settings = MigrationSettings::default();
        settings.primary_keys.insert("users".into(), "id".into());
        settings.backup = true;

        let config = settings.to_migration_config("src", "dst", vec!["users".into()]);
        assert_eq!(config.source_db, "src");
        assert_eq!(config.primary_key("users"), Some("id"));
        assert!(config.create_backup);
        assert!(config.concurrent);
        assert!(config.validate_data);
        assert_eq!(config.sample_size, DEFAULT_SAMPLE_SIZE);
    }
}
