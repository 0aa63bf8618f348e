//! Configuration validation.

use super::{Config, MigrationConfig, StoreKind};
use crate::error::{MigrateError, Result};

/// Validate a configuration file.
pub fn validate(config: &Config) -> Result<()> {
    for (id, store) in &config.stores {
        if id.trim().is_empty() {
            return Err(MigrateError::Config("store identifiers cannot be empty".into()));
        }
        if store.kind == StoreKind::JsonDir && store.path.is_none() {
            return Err(MigrateError::Config(format!(
                "stores.{}.path is required for kind json_dir",
                id
            )));
        }
    }

    if let Some(0) = config.migration.workers {
        return Err(MigrateError::Config(
            "migration.workers must be at least 1".into(),
        ));
    }
    if let Some(0) = config.migration.batch_size {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if let Some(0) = config.migration.sample_size {
        return Err(MigrateError::Config(
            "migration.sample_size must be at least 1".into(),
        ));
    }

    Ok(())
}

/// Validate a run config before the engine accepts it.
pub fn validate_migration(config: &MigrationConfig) -> Result<()> {
    if config.source_db.trim().is_empty() || config.target_db.trim().is_empty() {
        return Err(MigrateError::Config(
            "both source and target must be specified".into(),
        ));
    }
    if config.tables.is_empty() {
        return Err(MigrateError::Config(
            "at least one table must be configured".into(),
        ));
    }
    if config.tables.iter().any(|t| t.trim().is_empty()) {
        return Err(MigrateError::Config("table names cannot be empty".into()));
    }
    if config.workers == 0 {
        return Err(MigrateError::Config("workers must be at least 1".into()));
    }
    if config.batch_size == 0 {
        return Err(MigrateError::Config("batch_size must be at least 1".into()));
    }
    Ok(())
}
