//! Snapshot lifecycle and rollback against the target store.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::snapshot::{MigrationSnapshot, SnapshotStatus, TableSnapshot};
use super::store::SnapshotStore;
use crate::config::MigrationConfig;
use crate::core::{group_by_source_table, Record, StoreClient, Value};
use crate::error::{MigrateError, Result};

/// Creates, updates and rolls back migration snapshots.
pub struct RollbackManager {
    target: Arc<dyn StoreClient>,
    store: SnapshotStore,
}

impl RollbackManager {
    pub fn new(target: Arc<dyn StoreClient>, store: SnapshotStore) -> Self {
        Self { target, store }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Capture the target's pre-migration state and persist an
    /// `in_progress` snapshot.
    ///
    /// A table whose state cannot be read is recorded as pre-existing, never
    /// as absent, so rollback will not clear it.
    pub async fn create_snapshot(&self, config: &MigrationConfig) -> Result<MigrationSnapshot> {
        let mut snapshot = MigrationSnapshot::new(config);
        info!("Creating migration snapshot {}", snapshot.id);

        for table in &config.tables {
            let state = match self.capture_table_state(table).await {
                Ok(state) => state,
                Err(e) => {
                    error!("Failed to capture state of table {}: {}", table, e);
                    TableSnapshot::unreadable(table, e.to_string())
                }
            };
            snapshot.pre_migration_state.insert(table.clone(), state);
        }

        self.store.save(&snapshot)?;
        info!("Migration snapshot {} created", snapshot.id);
        Ok(snapshot)
    }

    async fn capture_table_state(&self, table: &str) -> Result<TableSnapshot> {
        if !self.target.table_exists(table).await? {
            return Ok(TableSnapshot::absent(table));
        }
        let records = self.target.fetch_all_data(&[table.to_string()]).await?;
        Ok(TableSnapshot::existing(table, &records))
    }

    /// Append imported records to the snapshot, grouped by table.
    pub fn update_snapshot_with_migrated_data(&self, id: &str, records: &[Record]) -> Result<()> {
        let mut snapshot = self.store.load(id)?;

        let grouped = group_by_source_table(records.to_vec());
        if !grouped.untagged.is_empty() {
            warn!(
                "Snapshot {}: skipping {} records without a source table",
                id,
                grouped.untagged.len()
            );
        }
        for (table, rows) in grouped.tables {
            snapshot
                .migrated_data
                .entry(table)
                .or_default()
                .extend(rows.iter().map(Record::without_metadata));
        }

        self.store.save(&snapshot)
    }

    pub fn load_snapshot(&self, id: &str) -> Result<MigrationSnapshot> {
        self.store.load(id)
    }

    pub fn mark_completed(&self, id: &str) -> Result<()> {
        self.set_status(id, SnapshotStatus::Completed)
    }

    pub fn mark_failed(&self, id: &str) -> Result<()> {
        self.set_status(id, SnapshotStatus::Failed)
    }

    fn set_status(&self, id: &str, status: SnapshotStatus) -> Result<()> {
        let mut snapshot = self.store.load(id)?;
        snapshot.status = status;
        self.store.save(&snapshot)
    }

    /// Undo a migration on the target.
    ///
    /// Tables that did not exist before are cleared. Tables that existed
    /// lose only the migrated rows, matched on the table's primary key.
    /// Every table is attempted; the snapshot becomes `rolled_back` only if
    /// all of them succeed.
    pub async fn roll_back_migration(&self, id: &str) -> Result<()> {
        let mut snapshot = self.store.load(id)?;
        if snapshot.status == SnapshotStatus::RolledBack {
            return Err(MigrateError::AlreadyRolledBack(id.to_string()));
        }

        info!(
            "Rolling back migration {} ({} tables, {} migrated rows)",
            id,
            snapshot.tables.len(),
            snapshot.migrated_rows()
        );

        let mut failures = Vec::new();
        for table in &snapshot.tables {
            if let Err(e) = self.roll_back_table(&snapshot, table).await {
                error!("Rollback of table {} failed: {}", table, e);
                failures.push(format!("{}: {}", table, e));
            }
        }

        if !failures.is_empty() {
            return Err(MigrateError::Rollback(format!(
                "{} of {} tables failed: {}",
                failures.len(),
                snapshot.tables.len(),
                failures.join("; ")
            )));
        }

        snapshot.status = SnapshotStatus::RolledBack;
        self.store.save(&snapshot)?;
        info!("Rollback of {} complete", id);
        Ok(())
    }

    async fn roll_back_table(&self, snapshot: &MigrationSnapshot, table: &str) -> Result<()> {
        let existed = snapshot
            .pre_migration_state
            .get(table)
            .is_some_and(|s| s.existed_before);

        if !existed {
            info!("{}: did not exist before migration, clearing", table);
            return self.target.clear_table(table).await;
        }

        let migrated = snapshot
            .migrated_data
            .get(table)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if migrated.is_empty() {
            info!("{}: no migrated rows to remove", table);
            return Ok(());
        }

        let key = snapshot.primary_keys.get(table).ok_or_else(|| {
            MigrateError::Rollback(format!(
                "table {} existed before migration and has no primary key configured",
                table
            ))
        })?;

        let keys: Vec<Value> = migrated
            .iter()
            .filter_map(|r| r.get(key).filter(|v| !v.is_null()).cloned())
            .collect();
        if keys.len() < migrated.len() {
            warn!(
                "{}: {} migrated rows have no value for key {}",
                table,
                migrated.len() - keys.len(),
                key
            );
        }

        let deleted = self.target.delete_records(table, key, &keys).await?;
        info!("{}: deleted {} migrated rows", table, deleted);
        Ok(())
    }

}
