//! Snapshot persistence and rollback.
//!
//! A snapshot is written before the first import of a run, grows as batches
//! land on the target, and is finalized as `completed` or `failed`. Rollback
//! is an explicit operator action driven from the persisted file, so it
//! works from a different process than the one that ran the migration.

mod rollback;
mod snapshot;
mod store;

pub use rollback::RollbackManager;
pub use snapshot::{schema_hash, snapshot_id, MigrationSnapshot, SnapshotStatus, TableSnapshot};
pub use store::{SnapshotStore, DEFAULT_SNAPSHOT_DIR};
