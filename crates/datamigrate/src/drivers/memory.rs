//! Process-local in-memory store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::core::{group_by_source_table, Record, StoreClient, Value};
use crate::error::{MigrateError, Result};

/// In-memory store holding tables as record vectors.
///
/// Used by tests and by embedders that stage data in memory. Failure
/// injection and call counters make it usable as a test double.
#[derive(Debug, Default)]
pub struct MemoryStore {
    name: String,
    tables: RwLock<BTreeMap<String, Vec<Record>>>,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    fail_import: AtomicBool,
    import_limit: Mutex<Option<usize>>,
    fail_fetch_table: Mutex<Option<String>>,
    connect_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    import_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Replace a table's contents.
    pub fn seed(&self, table: &str, records: Vec<Record>) {
        let clean = records.iter().map(Record::without_metadata).collect();
        self.tables.write().insert(table.to_string(), clean);
    }

    /// Records currently stored in a table (no metadata).
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, Vec::len)
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.read().contains_key(table)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Make every fetch that includes `table` fail.
    pub fn fail_fetch_for(&self, table: &str) {
        *self.fail_fetch_table.lock() = Some(table.to_string());
    }

    pub fn fail_imports(&self, fail: bool) {
        self.fail_import.store(fail, Ordering::SeqCst);
    }

    /// Let the first `calls` imports succeed and fail every later one.
    pub fn fail_imports_after(&self, calls: usize) {
        *self.import_limit.lock() = Some(calls);
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn import_calls(&self) -> usize {
        self.import_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(MigrateError::connection(&self.name, "injected connect failure"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_all_data(&self, tables: &[String]) -> Result<Vec<Record>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(failing) = self.fail_fetch_table.lock().as_deref() {
            if tables.iter().any(|t| t == failing) {
                return Err(MigrateError::fetch(failing, "injected fetch failure"));
            }
        }

        let store = self.tables.read();
        let mut records = Vec::new();
        for table in tables {
            let rows = store
                .get(table)
                .ok_or_else(|| MigrateError::fetch(table, "table does not exist"))?;
            records.extend(rows.iter().map(|r| r.clone().tagged(table)));
        }
        Ok(records)
    }

    async fn import_data(&self, records: &[Record]) -> Result<()> {
        let call = self.import_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let over_limit = self.import_limit.lock().is_some_and(|limit| call > limit);
        if over_limit || self.fail_import.load(Ordering::SeqCst) {
            let table = records
                .first()
                .and_then(Record::source_table)
                .unwrap_or("unknown");
            return Err(MigrateError::import(table, "injected import failure"));
        }

        let grouped = group_by_source_table(records.to_vec());
        if !grouped.untagged.is_empty() {
            return Err(MigrateError::import(
                "unknown",
                format!("{} records carry no _source_table tag", grouped.untagged.len()),
            ));
        }

        let mut store = self.tables.write();
        for (table, rows) in grouped.tables {
            store
                .entry(table)
                .or_default()
                .extend(rows.iter().map(Record::without_metadata));
        }
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.has_table(table))
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.tables.read().keys().cloned().collect())
    }

    async fn clear_table(&self, table: &str) -> Result<()> {
        if let Some(rows) = self.tables.write().get_mut(table) {
            rows.clear();
        }
        Ok(())
    }

    async fn delete_records(&self, table: &str, key_column: &str, keys: &[Value]) -> Result<u64> {
        let mut store = self.tables.write();
        let Some(rows) = store.get_mut(table) else {
            return Ok(0);
        };

        let before = rows.len();
        rows.retain(|row| match row.get(key_column) {
            Some(v) => !keys.iter().any(|k| k.loosely_equals(v)),
            None => true,
        });
        Ok((before - rows.len()) as u64)
    }
}
