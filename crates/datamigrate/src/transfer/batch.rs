//! Sequential batched import.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::Record;
use crate::error::{MigrateError, Result};
use crate::monitoring::BatchTracker;

/// Number of batches needed for `len` records at `batch_size` per batch.
pub fn batch_count(len: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        return 0;
    }
    len.div_ceil(batch_size)
}

/// Splits a record set into contiguous chunks and imports them in order.
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    batch_size: usize,
    cancel: Option<CancellationToken>,
}

impl BatchProcessor {
    /// Create a processor. A batch size of zero is treated as one.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            cancel: None,
        }
    }

    /// Abort between batches when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Import `records` one chunk at a time, stopping at the first failure.
    pub async fn process<'a, F, Fut>(&self, records: &'a [Record], import_fn: F) -> Result<()>
    where
        F: FnMut(&'a [Record]) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.run(records, None, import_fn).await
    }

    /// Like [`process`](Self::process), reporting each batch to `tracker`.
    pub async fn process_tracked<'a, F, Fut>(
        &self,
        records: &'a [Record],
        tracker: &BatchTracker,
        import_fn: F,
    ) -> Result<()>
    where
        F: FnMut(&'a [Record]) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.run(records, Some(tracker), import_fn).await
    }

    async fn run<'a, F, Fut>(
        &self,
        records: &'a [Record],
        tracker: Option<&BatchTracker>,
        mut import_fn: F,
    ) -> Result<()>
    where
        F: FnMut(&'a [Record]) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let total = batch_count(records.len(), self.batch_size);

        for (i, chunk) in records.chunks(self.batch_size).enumerate() {
            if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                return Err(MigrateError::Cancelled);
            }

            let batch = i + 1;
            if let Some(tracker) = tracker {
                tracker.start_batch(batch);
            }
            debug!("Importing batch {}/{} ({} records)", batch, total, chunk.len());

            import_fn(chunk).await.map_err(|e| match e {
                MigrateError::Cancelled => MigrateError::Cancelled,
                other => MigrateError::Batch {
                    batch,
                    total,
                    message: other.to_string(),
                },
            })?;

            if let Some(tracker) = tracker {
                tracker.complete_batch(chunk.len() as u64);
            }
        }

        Ok(())
    }
}
