//! The store client contract consumed by every core component.
//!
//! Concrete clients (relational drivers, document stores, the bundled
//! [`MemoryStore`](crate::drivers::MemoryStore) and
//! [`JsonDirStore`](crate::drivers::JsonDirStore)) implement [`StoreClient`];
//! the engine, worker pool, validator and rollback manager only ever see
//! `Arc<dyn StoreClient>`.
//!
//! # Thread Safety
//!
//! Implementations must be `Send + Sync`. When concurrency is enabled the
//! worker pool issues `fetch_all_data` from several tasks at once, so reads
//! must be safe to run concurrently. Writes are issued from one task at a time.

use async_trait::async_trait;

use crate::error::{MigrateError, Result};

use super::value::{Record, Value};

/// A connection to one data store.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Store identifier used in logs and errors.
    fn name(&self) -> &str;

    /// Establish the connection.
    async fn connect(&self) -> Result<()>;

    /// Release the connection.
    async fn close(&self) -> Result<()>;

    /// Fetch every record of the given tables.
    ///
    /// Every returned record must carry the `_source_table` tag.
    async fn fetch_all_data(&self, tables: &[String]) -> Result<Vec<Record>>;

    /// Fetch every record of the given tables using up to `workers` parallel reads.
    ///
    /// The default delegates to [`fetch_all_data`](Self::fetch_all_data).
    async fn fetch_all_data_concurrently(
        &self,
        tables: &[String],
        _workers: usize,
    ) -> Result<Vec<Record>> {
        self.fetch_all_data(tables).await
    }

    /// Write records to their tagged tables.
    async fn import_data(&self, records: &[Record]) -> Result<()>;

    /// Write records in chunks of `batch_size`.
    ///
    /// The default imports each chunk sequentially through
    /// [`import_data`](Self::import_data).
    async fn import_data_concurrently(&self, records: &[Record], batch_size: usize) -> Result<()> {
        if batch_size == 0 {
            return self.import_data(records).await;
        }
        for chunk in records.chunks(batch_size) {
            self.import_data(chunk).await?;
        }
        Ok(())
    }

    /// Run a native query.
    ///
    /// Stores without a query language return [`MigrateError::Unsupported`].
    async fn execute_query(&self, _query: &str) -> Result<Vec<Record>> {
        Err(MigrateError::unsupported(self.name(), "execute_query"))
    }

    /// Check whether a table or collection exists.
    ///
    /// The default probes with a fetch: success means the table exists and
    /// a fetch error is returned as-is, since it cannot tell a missing table
    /// from an unreadable one.
    async fn table_exists(&self, table: &str) -> Result<bool> {
        self.fetch_all_data(&[table.to_string()]).await?;
        Ok(true)
    }

    /// List the tables or collections available in the store.
    async fn list_tables(&self) -> Result<Vec<String>> {
        Err(MigrateError::unsupported(self.name(), "list_tables"))
    }

    /// Remove every record of a table.
    async fn clear_table(&self, _table: &str) -> Result<()> {
        Err(MigrateError::unsupported(self.name(), "clear_table"))
    }

    /// Delete the records of `table` whose `key_column` matches one of `keys`.
    ///
    /// Returns the number of deleted records.
    async fn delete_records(&self, _table: &str, _key_column: &str, _keys: &[Value]) -> Result<u64> {
        Err(MigrateError::unsupported(self.name(), "delete_records"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Minimal client that only implements the required methods.
    struct CountingStore {
        imports: AtomicUsize,
    }

    #[async_trait]
    impl StoreClient for CountingStore {
        fn name(&self) -> &str {
            "counting"
        }

        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        async fn fetch_all_data(&self, tables: &[String]) -> Result<Vec<Record>> {
            if tables.iter().any(|t| t == "missing") {
                return Err(MigrateError::fetch("missing", "no such table"));
            }
            Ok(Vec::new())
        }

        async fn import_data(&self, _records: &[Record]) -> Result<()> {
            self.imports.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_import_concurrently_chunks() {
        let store = CountingStore {
            imports: AtomicUsize::new(0),
        };
        let records: Vec<Record> = (0..5).map(|i| Record::new().with("id", i)).collect();

        store.import_data_concurrently(&records, 2).await.unwrap();
        assert_eq!(store.imports.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_default_optional_operations() {
        let store = CountingStore {
            imports: AtomicUsize::new(0),
        };

        assert!(matches!(
            store.execute_query("SELECT 1").await,
            Err(MigrateError::Unsupported { .. })
        ));
        assert!(store.table_exists("users").await.unwrap());
        assert!(matches!(
            store.table_exists("missing").await,
            Err(MigrateError::Fetch { .. })
        ));
    }
}
