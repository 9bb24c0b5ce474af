//! Per-column descriptive statistics: count/min/max/mean/median/stddev.
//!
//! Computation shape (sort once, derive mean/variance from the sum, index
//! into the sorted slice for median) follows the audit-log baseline
//! calculator's `compute_stats`: sum-based mean and variance rather than a
//! running Welford pass, since the full result set is already materialized
//! in memory before analytics runs.

use serde_json::Value;

use super::error::{AnalyticsError, AnalyticsResult};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ColumnStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub stddev: f64,
}

/// Extract `column_index`'s values as f64, skipping nulls. Returns `None`
/// if any non-null value in the column is not a JSON number. A column
/// that's only sometimes numeric isn't a numeric column.
pub fn numeric_column_values(rows: &[Vec<Value>], column_index: usize) -> Option<Vec<f64>> {
    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        match row.get(column_index) {
            Some(Value::Null) | None => continue,
            Some(Value::Number(n)) => values.push(n.as_f64()?),
            Some(_) => return None,
        }
    }
    Some(values)
}

/// Compute count/min/max/mean/median/stddev over `values`. `column_name` is
/// only used to label a row-count-mismatch error; it never happens in
/// practice since `numeric_column_values` derives `values` from the same
/// `rows` the caller got `total_rows` from, but the check is cheap and
/// catches a caller that passes mismatched inputs.
pub fn compute_column_stats(
    column_name: &str,
    values: &[f64],
    total_rows: usize,
) -> AnalyticsResult<ColumnStats> {
    if values.len() > total_rows {
        return Err(AnalyticsError::RowCountMismatch(
            column_name.to_string(),
            values.len(),
            total_rows,
        ));
    }
    if values.is_empty() {
        return Ok(ColumnStats {
            count: 0,
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            median: 0.0,
            stddev: 0.0,
        });
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let count = sorted.len();
    let sum: f64 = sorted.iter().sum();
    let mean = sum / count as f64;

    let median = if count % 2 == 1 {
        sorted[count / 2]
    } else {
        (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
    };

    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    let stddev = variance.sqrt();

    Ok(ColumnStats {
        count,
        min: sorted[0],
        max: sorted[count - 1],
        mean,
        median,
        stddev,
    })
}
