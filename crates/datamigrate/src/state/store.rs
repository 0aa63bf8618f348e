//! File-backed snapshot storage.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use super::snapshot::MigrationSnapshot;
use crate::error::{MigrateError, Result};

/// Default directory for snapshot files.
pub const DEFAULT_SNAPSHOT_DIR: &str = "migration_snapshots";

/// Stores one `<id>.json` file per snapshot in a directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Use `dir` for snapshot files. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(MigrateError::Snapshot(format!("invalid snapshot id '{}'", id)));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    /// Persist a snapshot (atomic write).
    pub fn save(&self, snapshot: &MigrationSnapshot) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&snapshot.id)?;

        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| MigrateError::Snapshot(format!("Failed to serialize snapshot: {}", e)))?;

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, &path)?;

        debug!("Saved snapshot {} ({})", snapshot.id, snapshot.status);
        Ok(())
    }

    /// Load a snapshot by ID.
    pub fn load(&self, id: &str) -> Result<MigrationSnapshot> {
        let path = self.path_for(id)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MigrateError::SnapshotNotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content)
            .map_err(|e| MigrateError::Snapshot(format!("Failed to parse snapshot {}: {}", id, e)))
    }

    /// All readable snapshots, newest first. Unparseable files are skipped.
    pub fn list(&self) -> Result<Vec<MigrationSnapshot>> {
        let mut snapshots: Vec<MigrationSnapshot> = self
            .snapshot_files()?
            .into_iter()
            .filter_map(|path| match read_snapshot(&path) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!("Skipping unreadable snapshot {}: {}", path.display(), e);
                    None
                }
            })
            .collect();

        snapshots.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(snapshots)
    }

    /// Delete snapshot files older than `max_age` whose status is terminal.
    ///
    /// In-progress and failed snapshots are never removed. Returns the
    /// number of files deleted.
    pub fn cleanup_older_than(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;

        for path in self.snapshot_files()? {
            let modified = std::fs::metadata(&path)?.modified()?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= max_age {
                continue;
            }

            let snapshot = match read_snapshot(&path) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Skipping unreadable snapshot {}: {}", path.display(), e);
                    continue;
                }
            };
            if !snapshot.status.is_terminal() {
                debug!("Keeping {} snapshot {}", snapshot.status, snapshot.id);
                continue;
            }

            std::fs::remove_file(&path)?;
            info!("Removed old snapshot {}", snapshot.id);
            removed += 1;
        }

        Ok(removed)
    }

    fn snapshot_files(&self) -> Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_DIR)
    }
}

fn read_snapshot(path: &Path) -> Result<MigrationSnapshot> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
