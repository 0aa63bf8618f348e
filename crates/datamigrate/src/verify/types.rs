//! Validation result types.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::core::Record;

/// Outcome of validating one table in one phase.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub table_name: String,
    pub is_valid: bool,
    pub row_count: u64,
    /// First records of the table, kept for sample comparison.
    #[serde(skip)]
    pub sample: Vec<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ValidationResult {
    pub fn valid(table: &str, row_count: u64, sample: Vec<Record>) -> Self {
        Self {
            table_name: table.to_string(),
            is_valid: true,
            row_count,
            sample,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn invalid(table: &str, error: impl Into<String>) -> Self {
        Self {
            table_name: table.to_string(),
            is_valid: false,
            row_count: 0,
            sample: Vec::new(),
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }

    /// Mark this result invalid, keeping counts and sample.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.is_valid = false;
        self.error = Some(error.into());
        self
    }
}

/// Aggregate over one phase's results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationSummary {
    pub total_tables: usize,
    pub valid_tables: usize,
    pub invalid_tables: usize,
    pub total_rows: u64,
    pub errors: Vec<String>,
    pub duration_seconds: f64,
}

impl ValidationSummary {
    /// Reduce a set of results. Pure; safe to call repeatedly.
    pub fn from_results(results: &[ValidationResult], started_at: Instant) -> Self {
        let mut summary = Self {
            total_tables: results.len(),
            duration_seconds: started_at.elapsed().as_secs_f64(),
            ..Default::default()
        };

        for result in results {
            summary.total_rows += result.row_count;
            if result.is_valid {
                summary.valid_tables += 1;
            } else {
                summary.invalid_tables += 1;
                if let Some(error) = &result.error {
                    summary.errors.push(format!("{}: {}", result.table_name, error));
                }
            }
        }

        summary
    }

    pub fn is_valid(&self) -> bool {
        self.invalid_tables == 0
    }

    pub fn log(&self, phase: &str) {
        info!(
            "{} validation: {}/{} tables valid, {} rows ({:.2}s)",
            phase, self.valid_tables, self.total_tables, self.total_rows, self.duration_seconds
        );
        for error in &self.errors {
            warn!("{} validation error: {}", phase, error);
        }
    }
}
