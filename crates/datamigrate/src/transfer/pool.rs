//! Fixed-size worker pool for parallel per-table fetches.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::core::{Record, StoreClient};
use crate::error::{MigrateError, Result};

/// One table to fetch.
pub struct TableJob {
    pub table: String,
    pub client: Arc<dyn StoreClient>,
}

/// Outcome of one [`TableJob`].
#[derive(Debug)]
pub struct TableResult {
    pub table: String,
    pub records: Vec<Record>,
    pub error: Option<MigrateError>,
}

/// Fans per-table fetches out to a fixed number of tasks.
///
/// Jobs go through a bounded multi-consumer queue; results come back on a
/// bounded channel. Both queues hold `2 × workers` entries.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    cancel: Option<CancellationToken>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            cancel: None,
        }
    }

    /// Stop pulling new jobs once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Fetch every table through the pool and aggregate the records.
    ///
    /// Each returned record is tagged with its table. Records from different
    /// tables arrive in no particular order. If any table fails, the call
    /// fails naming every failed table and no records are returned.
    pub async fn process_tables(
        &self,
        client: Arc<dyn StoreClient>,
        tables: &[String],
    ) -> Result<Vec<Record>> {
        if tables.is_empty() {
            return Ok(Vec::new());
        }

        let workers = self.workers.clamp(1, tables.len());
        let capacity = workers * 2;
        let cancel = self.cancel.clone().unwrap_or_default();

        info!(
            "Fetching {} tables with {} workers",
            tables.len(),
            workers
        );

        let (job_tx, job_rx) = async_channel::bounded::<TableJob>(capacity);
        let (result_tx, mut result_rx) = mpsc::channel::<TableResult>(capacity);

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(run_worker(worker_id, jobs, results, cancel)));
        }
        // Workers own the only remaining handles, so the queues close when they exit.
        drop(job_rx);
        drop(result_tx);

        let pending: Vec<String> = tables.to_vec();
        let submitter = tokio::spawn(async move {
            for table in pending {
                let job = TableJob {
                    table,
                    client: Arc::clone(&client),
                };
                if job_tx.send(job).await.is_err() {
                    break;
                }
            }
        });

        let mut records = Vec::new();
        let mut failures: Vec<(String, String)> = Vec::new();
        let mut received = 0;

        while received < tables.len() {
            let Some(result) = result_rx.recv().await else {
                break;
            };
            received += 1;

            match result.error {
                Some(e) => {
                    error!("{}: fetch failed - {}", result.table, e);
                    failures.push((result.table, e.to_string()));
                }
                None => {
                    debug!("{}: fetched {} records", result.table, result.records.len());
                    records.extend(result.records.into_iter().map(|mut r| {
                        r.set_source_table(&result.table);
                        r
                    }));
                }
            }
        }

        let mut panics = Vec::new();
        for (worker_id, handle) in handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                panics.push(format!("worker {}: {}", worker_id, e));
            }
        }
        if let Err(e) = submitter.await {
            panics.push(format!("submitter: {}", e));
        }

        if received < tables.len() {
            if cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }
            let reason = if panics.is_empty() {
                "pool closed before all results arrived".to_string()
            } else {
                panics.join("; ")
            };
            return Err(MigrateError::WorkerPool(format!(
                "received {}/{} results: {}",
                received,
                tables.len(),
                reason
            )));
        }

        if !failures.is_empty() {
            let names: Vec<&str> = failures.iter().map(|(t, _)| t.as_str()).collect();
            let details: Vec<String> = failures
                .iter()
                .map(|(t, e)| format!("{}: {}", t, e))
                .collect();
            return Err(MigrateError::Fetch {
                table: names.join(", "),
                message: details.join("; "),
            });
        }

        Ok(records)
    }
}

async fn run_worker(
    worker_id: usize,
    jobs: async_channel::Receiver<TableJob>,
    results: mpsc::Sender<TableResult>,
    cancel: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Worker {} cancelled", worker_id);
                break;
            }
            job = jobs.recv() => match job {
                Ok(job) => job,
                Err(_) => break,
            },
        };

        debug!("Worker {} fetching {}", worker_id, job.table);
        let result = match job
            .client
            .fetch_all_data(std::slice::from_ref(&job.table))
            .await
        {
            Ok(records) => TableResult {
                table: job.table,
                records,
                error: None,
            },
            Err(e) => TableResult {
                table: job.table,
                records: Vec::new(),
                error: Some(e),
            },
        };

        if results.send(result).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MemoryStore;
    use std::collections::BTreeSet;

    fn seeded_store(tables: usize, rows: usize) -> Arc<MemoryStore> {
        let store = MemoryStore::new("source");
        for t in 0..tables {
            let name = format!("t{}", t);
            store.seed(
                &name,
                (0..rows).map(|i| Record::new().with("id", i as i64)).collect(),
            );
        }
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_every_table_fetched_once() {
        for workers in 1..=5 {
            let store = seeded_store(5, 3);
            let tables: Vec<String> = (0..5).map(|t| format!("t{}", t)).collect();

            let records = WorkerPool::new(workers)
                .process_tables(store.clone(), &tables)
                .await
                .unwrap();

            assert_eq!(records.len(), 15);
            let names: BTreeSet<&str> = records.iter().filter_map(|r| r.source_table()).collect();
            let expected: BTreeSet<&str> = tables.iter().map(String::as_str).collect();
            assert_eq!(names, expected);
            assert_eq!(store.fetch_calls(), 5);
        }
    }

    #[tokio::test]
    async fn test_more_workers_than_tables() {
        let store = seeded_store(2, 1);
        let tables = vec!["t0".to_string(), "t1".to_string()];

        let records = WorkerPool::new(16)
            .process_tables(store, &tables)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_failures_listed_and_rows_discarded() {
        let store = seeded_store(3, 2);
        store.fail_fetch_for("t1");
        let tables: Vec<String> = (0..3).map(|t| format!("t{}", t)).collect();

        let err = WorkerPool::new(2)
            .process_tables(store, &tables)
            .await
            .unwrap_err();

        match err {
            MigrateError::Fetch { table, .. } => assert_eq!(table, "t1"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_table_list() {
        let store = seeded_store(0, 0);
        let records = WorkerPool::new(4).process_tables(store, &[]).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_pool() {
        let store = seeded_store(3, 1);
        let token = CancellationToken::new();
        token.cancel();
        let tables: Vec<String> = (0..3).map(|t| format!("t{}", t)).collect();

        let result = WorkerPool::new(2)
            .with_cancellation(token)
            .process_tables(store, &tables)
            .await;
        assert!(matches!(result, Err(MigrateError::Cancelled)));
    }
}
