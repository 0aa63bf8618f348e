//! Sample comparison on normalized values.
//!
//! Values are compared through their normalized string form, so an integer
//! read from one store matches the same number read back as text from
//! another. NULL only matches NULL.

use crate::core::{Record, Value};

/// Maximum number of sample rows compared per table.
pub const SAMPLE_COMPARE_ROWS: usize = 5;

/// Column used to correlate sample rows.
///
/// The configured primary key wins; otherwise the first data field of the
/// source row in key order.
pub fn sample_key<'a>(primary_key: Option<&'a str>, source_row: &'a Record) -> Option<&'a str> {
    primary_key.or_else(|| source_row.first_data_field())
}

/// Compare two samples positionally over their first rows.
///
/// Returns a description of the first mismatch. Two empty samples are equal;
/// an empty sample on one side only is not compared.
pub fn compare_samples(
    source: &[Record],
    target: &[Record],
    primary_key: Option<&str>,
) -> Option<String> {
    if source.is_empty() || target.is_empty() {
        return None;
    }

    let rows = source.len().min(target.len()).min(SAMPLE_COMPARE_ROWS);
    for (i, (src, dst)) in source.iter().zip(target).take(rows).enumerate() {
        let Some(key) = sample_key(primary_key, src) else {
            continue;
        };

        let src_value = src.get(key).unwrap_or(&Value::Null);
        let dst_value = dst.get(key).unwrap_or(&Value::Null);
        if !src_value.loosely_equals(dst_value) {
            return Some(format!(
                "sample row {} differs on {}: source={}, target={}",
                i + 1,
                key,
                src_value,
                dst_value
            ));
        }
    }

    None
}

/// First non-finite float among the data fields of `records`.
pub fn find_non_finite(records: &[Record]) -> Option<(usize, String, f64)> {
    records.iter().enumerate().find_map(|(i, record)| {
        record.data_fields().find_map(|(field, value)| match value {
            Value::Float(f) if !f.is_finite() => Some((i, field.clone(), *f)),
            _ => None,
        })
    })
}
