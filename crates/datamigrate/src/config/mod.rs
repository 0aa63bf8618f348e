//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{MigrateError, Result};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Look up a store definition by identifier.
    pub fn store(&self, id: &str) -> Result<&StoreConfig> {
        self.stores.get(id).ok_or_else(|| {
            MigrateError::Config(format!(
                "unknown store '{}' (configured: {})",
                id,
                self.stores.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })
    }
}

impl MigrationConfig {
    /// Validate the run configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate_migration(self)
    }
}
