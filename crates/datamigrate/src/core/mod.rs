//! Core abstractions for store-agnostic migration.
//!
//! - [`value`]: dynamically typed [`Value`] and [`Record`]
//! - [`traits`]: the [`StoreClient`] contract implemented by store drivers
//!
//! The core stays schema-agnostic: column types, DDL inference and connection
//! handling live in the store clients.

pub mod traits;
pub mod value;

pub use traits::StoreClient;
pub use value::{group_by_source_table, GroupedRecords, Record, Value, SOURCE_TABLE_KEY};
