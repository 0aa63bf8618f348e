//! Document store backed by a directory of JSON files.
//!
//! Each table is a file `<dir>/<table>.json` containing a JSON array of
//! objects. Writes replace the file atomically (temp file + rename).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::{group_by_source_table, Record, StoreClient, Value};
use crate::error::{MigrateError, Result};

const TABLE_EXTENSION: &str = "json";

/// JSON-directory store.
#[derive(Debug)]
pub struct JsonDirStore {
    name: String,
    root: PathBuf,
    // Serializes read-modify-write cycles on table files.
    write_lock: Mutex<()>,
}

impl JsonDirStore {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_path(&self, table: &str) -> Result<PathBuf> {
        let valid = !table.is_empty()
            && table != "."
            && table != ".."
            && !table.contains(['/', '\\'])
            && !table.contains('\0');
        if !valid {
            return Err(MigrateError::Config(format!(
                "invalid table name for {}: '{}'",
                self.name, table
            )));
        }
        Ok(self.root.join(format!("{}.{}", table, TABLE_EXTENSION)))
    }

    async fn read_table(&self, table: &str) -> Result<Option<Vec<Record>>> {
        let path = self.table_path(table)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MigrateError::fetch(table, e.to_string())),
        };
        let records: Vec<Record> = serde_json::from_str(&content)
            .map_err(|e| MigrateError::fetch(table, format!("{}: {}", path.display(), e)))?;
        Ok(Some(records))
    }

    async fn write_table(&self, table: &str, records: &[Record]) -> Result<()> {
        let path = self.table_path(table)?;
        let content = serde_json::to_string_pretty(records)?;

        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &content)
            .await
            .map_err(|e| MigrateError::import(table, e.to_string()))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|e| MigrateError::import(table, e.to_string()))?;

        debug!("{}: wrote {} records to {}", self.name, records.len(), path.display());
        Ok(())
    }
}

#[async_trait]
impl StoreClient for JsonDirStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| MigrateError::connection(&self.name, format!("{}: {}", self.root.display(), e)))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_all_data(&self, tables: &[String]) -> Result<Vec<Record>> {
        let mut all = Vec::new();
        for table in tables {
            let records = self
                .read_table(table)
                .await?
                .ok_or_else(|| MigrateError::fetch(table, "table does not exist"))?;
            all.extend(records.into_iter().map(|r| r.tagged(table)));
        }
        Ok(all)
    }

    async fn import_data(&self, records: &[Record]) -> Result<()> {
        let grouped = group_by_source_table(records.to_vec());
        if !grouped.untagged.is_empty() {
            return Err(MigrateError::import(
                "unknown",
                format!("{} records carry no _source_table tag", grouped.untagged.len()),
            ));
        }

        let _guard = self.write_lock.lock().await;
        for (table, rows) in grouped.tables {
            let mut existing = self.read_table(&table).await?.unwrap_or_default();
            existing.extend(rows.iter().map(Record::without_metadata));
            self.write_table(&table, &existing).await?;
        }
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let path = self.table_path(table)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| MigrateError::connection(&self.name, format!("{}: {}", self.root.display(), e)))?;

        let mut tables = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TABLE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                tables.push(stem.to_string());
            }
        }
        tables.sort();
        Ok(tables)
    }

    async fn clear_table(&self, table: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.read_table(table).await?.is_some() {
            self.write_table(table, &[]).await?;
        }
        Ok(())
    }

    async fn delete_records(&self, table: &str, key_column: &str, keys: &[Value]) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let Some(mut rows) = self.read_table(table).await? else {
            return Ok(0);
        };

        let before = rows.len();
        rows.retain(|row| match row.get(key_column) {
            Some(v) => !keys.iter().any(|k| k.loosely_equals(v)),
            None => true,
        });
        let deleted = before - rows.len();
        if deleted > 0 {
            self.write_table(table, &rows).await?;
        }
        Ok(deleted as u64)
    }
}
