//! Bundled store clients.
//!
//! - [`MemoryStore`]: process-local tables, used by tests and embedders
//! - [`JsonDirStore`]: one JSON array file per table inside a directory
//!
//! Network drivers for relational and document databases live outside this
//! crate and plug in through [`StoreClient`].

mod json_dir;
mod memory;

pub use json_dir::JsonDirStore;
pub use memory::MemoryStore;

use std::sync::Arc;

use crate::config::{StoreConfig, StoreKind};
use crate::core::StoreClient;
use crate::error::{MigrateError, Result};

/// Build the client for a configured store.
pub fn open_store(id: &str, config: &StoreConfig) -> Result<Arc<dyn StoreClient>> {
    match config.kind {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new(id))),
        StoreKind::JsonDir => {
            let path = config.path.clone().ok_or_else(|| {
                MigrateError::Config(format!("stores.{}.path is required for kind json_dir", id))
            })?;
            Ok(Arc::new(JsonDirStore::new(id, path)))
        }
    }
}
