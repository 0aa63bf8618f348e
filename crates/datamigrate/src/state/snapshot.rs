//! Snapshot records persisted for rollback.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::MigrationConfig;
use crate::core::Record;

/// Lifecycle status of a snapshot.
///
/// `in_progress` moves to `completed` or `failed`; either may later move to
/// `rolled_back`, which is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl SnapshotStatus {
    /// Completed and rolled-back snapshots may be cleaned up.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SnapshotStatus::Completed | SnapshotStatus::RolledBack)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotStatus::InProgress => "in_progress",
            SnapshotStatus::Completed => "completed",
            SnapshotStatus::Failed => "failed",
            SnapshotStatus::RolledBack => "rolled_back",
        }
    }
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target table state captured before migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub table_name: String,
    pub row_count: u64,
    pub existed_before: bool,
    /// SHA-256 of the sorted data field names seen on the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_hash: Option<String>,
    /// Set when the table could not be read; `row_count` is then unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_error: Option<String>,
}

impl TableSnapshot {
    pub fn absent(table: &str) -> Self {
        Self {
            table_name: table.to_string(),
            row_count: 0,
            existed_before: false,
            schema_hash: None,
            capture_error: None,
        }
    }

    pub fn existing(table: &str, records: &[Record]) -> Self {
        Self {
            table_name: table.to_string(),
            row_count: records.len() as u64,
            existed_before: true,
            schema_hash: schema_hash(records),
            capture_error: None,
        }
    }

    /// A table whose state could not be captured.
    ///
    /// It is treated as pre-existing so rollback only ever deletes migrated
    /// rows from it.
    pub fn unreadable(table: &str, error: impl Into<String>) -> Self {
        Self {
            table_name: table.to_string(),
            row_count: 0,
            existed_before: true,
            schema_hash: None,
            capture_error: Some(error.into()),
        }
    }
}

/// Durable record of one migration attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSnapshot {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source_db: String,
    pub target_db: String,
    pub tables: Vec<String>,
    pub pre_migration_state: BTreeMap<String, TableSnapshot>,
    /// Records written during the run, by table, without metadata.
    #[serde(default)]
    pub migrated_data: BTreeMap<String, Vec<Record>>,
    pub status: SnapshotStatus,
    /// Key column per table used for rollback deletes.
    #[serde(default)]
    pub primary_keys: BTreeMap<String, String>,
}

impl MigrationSnapshot {
    /// Start a snapshot for `config` with no table state captured yet.
    pub fn new(config: &MigrationConfig) -> Self {
        let timestamp = Utc::now();
        Self {
            id: snapshot_id(&config.source_db, &config.target_db, timestamp),
            timestamp,
            source_db: config.source_db.clone(),
            target_db: config.target_db.clone(),
            tables: config.tables.clone(),
            pre_migration_state: BTreeMap::new(),
            migrated_data: BTreeMap::new(),
            status: SnapshotStatus::InProgress,
            primary_keys: config.primary_keys.clone(),
        }
    }

    /// Number of migrated records across all tables.
    pub fn migrated_rows(&self) -> usize {
        self.migrated_data.values().map(Vec::len).sum()
    }
}

/// Build a snapshot ID: `migration_<source>_to_<target>_<unix>_<suffix>`.
///
/// The random suffix keeps IDs unique when runs start in the same second.
pub fn snapshot_id(source: &str, target: &str, at: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "migration_{}_to_{}_{}_{}",
        sanitize(source),
        sanitize(target),
        at.timestamp(),
        &suffix[..8]
    )
}

// IDs double as file names.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Hash of the data field names present in `records`, or `None` when empty.
pub fn schema_hash(records: &[Record]) -> Option<String> {
    let fields: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.data_fields().map(|(k, _)| k.as_str()))
        .collect();
    if fields.is_empty() {
        return None;
    }

    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(field.as_bytes());
        hasher.update(b"\n");
    }
    Some(hex::encode(hasher.finalize()))
}
