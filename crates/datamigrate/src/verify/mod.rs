//! Pre- and post-migration validation.
//!
//! The pre-phase certifies that every source table can be read and records
//! its row count and a bounded sample. The post-phase reads the target and
//! checks it against the pre-phase:
//!
//! - **Row count**: exact match required
//! - **Sample**: up to [`SAMPLE_COMPARE_ROWS`] rows compared by key column
//!
//! Failures are reported per table; validation itself only errors when the
//! caller passes inconsistent input.

pub mod normalize;
pub mod types;

pub use normalize::{compare_samples, SAMPLE_COMPARE_ROWS};
pub use types::{ValidationResult, ValidationSummary};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::DEFAULT_SAMPLE_SIZE;
use crate::core::{Record, StoreClient};
use crate::error::{MigrateError, Result};

/// Validates source readiness and target equivalence.
pub struct Validator {
    source: Arc<dyn StoreClient>,
    target: Arc<dyn StoreClient>,
    sample_size: usize,
    primary_keys: BTreeMap<String, String>,
}

impl Validator {
    pub fn new(source: Arc<dyn StoreClient>, target: Arc<dyn StoreClient>) -> Self {
        Self {
            source,
            target,
            sample_size: DEFAULT_SAMPLE_SIZE,
            primary_keys: BTreeMap::new(),
        }
    }

    /// Records retained per table in the pre-phase.
    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// Primary key column per table, used to correlate sample rows.
    pub fn with_primary_keys(mut self, primary_keys: BTreeMap<String, String>) -> Self {
        self.primary_keys = primary_keys;
        self
    }

    /// Read every table from the source and record count and sample.
    ///
    /// A table that cannot be read is marked invalid; the others are still
    /// validated.
    pub async fn pre_migration_validation(&self, tables: &[String]) -> Result<Vec<ValidationResult>> {
        info!("Starting pre-migration validation of {} tables", tables.len());

        let mut results = Vec::with_capacity(tables.len());
        for table in tables {
            let result = match self.source.fetch_all_data(std::slice::from_ref(table)).await {
                Ok(records) => {
                    info!("Pre-validation: table {} contains {} rows", table, records.len());
                    ValidationResult::valid(table, records.len() as u64, self.take_sample(records))
                }
                Err(e) => {
                    warn!("Pre-validation: table {} unreadable: {}", table, e);
                    ValidationResult::invalid(
                        table,
                        format!("failed to fetch from source table {}: {}", table, e),
                    )
                }
            };
            results.push(result);
        }

        Ok(results)
    }

    /// Read every table from the target and compare it with `pre_results`.
    pub async fn post_migration_validation(
        &self,
        tables: &[String],
        pre_results: &[ValidationResult],
    ) -> Result<Vec<ValidationResult>> {
        info!("Starting post-migration validation of {} tables", tables.len());

        let pre_by_table: HashMap<&str, &ValidationResult> = pre_results
            .iter()
            .map(|r| (r.table_name.as_str(), r))
            .collect();

        let mut results = Vec::with_capacity(tables.len());
        for table in tables {
            let Some(pre) = pre_by_table.get(table.as_str()) else {
                results.push(ValidationResult::invalid(
                    table,
                    format!("no pre-migration result for table {}", table),
                ));
                continue;
            };

            let records = match self.target.fetch_all_data(std::slice::from_ref(table)).await {
                Ok(records) => records,
                Err(e) => {
                    results.push(ValidationResult::invalid(
                        table,
                        format!("failed to fetch from target table {}: {}", table, e),
                    ));
                    continue;
                }
            };

            let row_count = records.len() as u64;
            let mut result = ValidationResult::valid(table, row_count, self.take_sample(records));

            if row_count != pre.row_count {
                result = result.fail(format!(
                    "row count mismatch: source={}, target={}",
                    pre.row_count, row_count
                ));
            } else if let Some(mismatch) = compare_samples(
                &pre.sample,
                &result.sample,
                self.primary_keys.get(table).map(String::as_str),
            ) {
                result = result.fail(format!("sample integrity check failed: {}", mismatch));
            }

            if result.is_valid {
                info!("Post-validation: table {} matches ({} rows)", table, row_count);
            } else {
                warn!(
                    "Post-validation: table {} invalid: {}",
                    table,
                    result.error.as_deref().unwrap_or_default()
                );
            }
            results.push(result);
        }

        Ok(results)
    }

    /// Reject records carrying NaN or infinite floats.
    pub fn validate_data_types(&self, records: &[Record]) -> Result<()> {
        match normalize::find_non_finite(records) {
            Some((row, field, value)) => {
                let table = records[row].source_table().unwrap_or("unknown");
                Err(MigrateError::Validation(format!(
                    "table {} row {}: field {} holds non-finite value {}",
                    table,
                    row + 1,
                    field,
                    value
                )))
            }
            None => Ok(()),
        }
    }

    fn take_sample(&self, mut records: Vec<Record>) -> Vec<Record> {
        records.truncate(self.sample_size);
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MemoryStore;

    fn users() -> Vec<Record> {
        vec![
            Record::new().with("id", 1).with("name", "A"),
            Record::new().with("id", 2).with("name", "B"),
        ]
    }

    fn stores() -> (Arc<MemoryStore>, Arc<MemoryStore>) {
        (
            Arc::new(MemoryStore::new("source")),
            Arc::new(MemoryStore::new("target")),
        )
    }

    fn tables(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_pre_validation_counts_and_samples() {
        let (source, target) = stores();
        source.seed("users", users());
        let validator = Validator::new(source, target).with_sample_size(1);

        let results = validator
            .pre_migration_validation(&tables(&["users"]))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_valid);
        assert_eq!(results[0].row_count, 2);
        assert_eq!(results[0].sample.len(), 1);
    }

    #[tokio::test]
    async fn test_pre_validation_continues_after_failure() {
        let (source, target) = stores();
        source.seed("users", users());
        let validator = Validator::new(source, target);

        let results = validator
            .pre_migration_validation(&tables(&["missing", "users"]))
            .await
            .unwrap();
        assert!(!results[0].is_valid);
        assert!(results[0].error.as_deref().unwrap().contains("missing"));
        assert!(results[1].is_valid);
    }

    #[tokio::test]
    async fn test_pre_validation_is_repeatable() {
        let (source, target) = stores();
        source.seed("users", users());
        source.seed("orders", vec![Record::new().with("order_id", 9)]);
        let validator = Validator::new(source, target);
        let names = tables(&["users", "orders"]);

        let first = validator.pre_migration_validation(&names).await.unwrap();
        let second = validator.pre_migration_validation(&names).await.unwrap();
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.row_count, b.row_count);
            assert_eq!(a.is_valid, b.is_valid);
        }
    }

    #[tokio::test]
    async fn test_post_validation_identical_data() {
        let (source, target) = stores();
        source.seed("users", users());
        target.seed("users", users());
        let validator = Validator::new(source, target);
        let names = tables(&["users"]);

        let pre = validator.pre_migration_validation(&names).await.unwrap();
        let post = validator.post_migration_validation(&names, &pre).await.unwrap();

        assert_eq!(post.len(), 1);
        assert!(post[0].is_valid, "{:?}", post[0].error);
        assert_eq!(post[0].row_count, 2);
    }

    #[tokio::test]
    async fn test_post_validation_row_count_mismatch() {
        let (source, target) = stores();
        source.seed("users", users());
        target.seed("users", users()[..1].to_vec());
        let validator = Validator::new(source, target);
        let names = tables(&["users"]);

        let pre = validator.pre_migration_validation(&names).await.unwrap();
        let post = validator.post_migration_validation(&names, &pre).await.unwrap();

        assert!(!post[0].is_valid);
        let error = post[0].error.as_deref().unwrap();
        assert!(error.contains("source=2"));
        assert!(error.contains("target=1"));
    }

    #[tokio::test]
    async fn test_post_validation_sample_mismatch() {
        let (source, target) = stores();
        source.seed("users", users());
        target.seed(
            "users",
            vec![
                Record::new().with("id", 1).with("name", "A"),
                Record::new().with("id", 3).with("name", "B"),
            ],
        );
        let validator = Validator::new(source, target);
        let names = tables(&["users"]);

        let pre = validator.pre_migration_validation(&names).await.unwrap();
        let post = validator.post_migration_validation(&names, &pre).await.unwrap();
        assert!(!post[0].is_valid);
        assert!(post[0].error.as_deref().unwrap().contains("sample"));
    }

    #[tokio::test]
    async fn test_post_validation_without_pre_result() {
        let (source, target) = stores();
        target.seed("users", users());
        let validator = Validator::new(source, target);

        let post = validator
            .post_migration_validation(&tables(&["users"]), &[])
            .await
            .unwrap();
        assert!(!post[0].is_valid);
    }

    #[test]
    fn test_validate_data_types() {
        let (source, target) = stores();
        let validator = Validator::new(source, target);

        let good = vec![Record::new()
            .with("id", 1)
            .with("salary", 150000.0)
            .with("is_active", true)
            .tagged("users")];
        assert!(validator.validate_data_types(&good).is_ok());

        let bad = vec![Record::new().with("id", 1).with("ratio", f64::NAN).tagged("users")];
        let err = validator.validate_data_types(&bad).unwrap_err();
        assert!(matches!(err, MigrateError::Validation(_)));
        assert!(err.to_string().contains("ratio"));
    }
}
