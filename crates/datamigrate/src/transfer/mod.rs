//! Concurrency primitives for moving records.
//!
//! - [`WorkerPool`]: parallel per-table fetches with bounded queues
//! - [`BatchProcessor`]: ordered, chunked imports

mod batch;
mod pool;

pub use batch::{batch_count, BatchProcessor};
pub use pool::{TableJob, TableResult, WorkerPool};
