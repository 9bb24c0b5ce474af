//! Deterministic post-processing over the FULL execution result, before
//! pagination (C11): per-numeric-column statistics, z-score/IQR anomaly
//! flags, and (for time-series shaped results) deltas and moving
//! averages. No ML, nothing learned; every number here is reproducible
//! from the same rows.

pub mod anomaly;
pub mod error;
pub mod stats;
pub mod timeseries;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use anomaly::{Anomaly, AnomalyMethod};
pub use error::{AnalyticsError, AnalyticsResult};
pub use stats::ColumnStats;
pub use timeseries::TimeSeriesPoint;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsMetadata {
    pub total_rows: usize,
    pub computed_on_full_dataset: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub columns: BTreeMap<String, ColumnStats>,
    pub anomalies: Vec<Anomaly>,
    /// Present only when the result set qualified as time-series shaped:
    /// one date-typed dimension, at least one numeric measure, keyed by
    /// measure column name.
    pub time_series: BTreeMap<String, Vec<TimeSeriesPoint>>,
    pub metadata: AnalyticsMetadata,
}

/// One result column as analytics needs to see it: name, driver-reported
/// type, and its position in each row.
#[derive(Debug, Clone)]
pub struct AnalyticsColumn {
    pub name: String,
    pub data_type: String,
    pub index: usize,
}

/// Run the full C11 pass over `rows` (the complete, pre-pagination result
/// set) given `columns` describing each column's name/type/position.
///
/// Never panics; a column that turns out not to be uniformly numeric is
/// silently excluded from `columns`/`anomalies` rather than failing the
/// whole report, since one non-numeric column shouldn't blank out the
/// statistics on the rest.
pub fn analyze(columns: &[AnalyticsColumn], rows: &[Vec<Value>]) -> AnalyticsResult<AnalyticsReport> {
    if columns.is_empty() {
        return Err(AnalyticsError::NoColumns);
    }

    let total_rows = rows.len();
    let mut column_stats = BTreeMap::new();
    let mut anomalies = Vec::new();
    let mut numeric_series: Vec<(&AnalyticsColumn, Vec<(usize, f64)>)> = Vec::new();

    for column in columns {
        let Some(values) = stats::numeric_column_values(rows, column.index) else {
            continue;
        };
        let stat = stats::compute_column_stats(&column.name, &values, total_rows)?;
        let indexed: Vec<(usize, f64)> = values.iter().copied().enumerate().collect();

        anomalies.extend(anomaly::zscore_anomalies(&column.name, &indexed, stat.mean, stat.stddev));
        anomalies.extend(anomaly::iqr_anomalies(&column.name, &indexed));

        column_stats.insert(column.name.clone(), stat);
        numeric_series.push((column, indexed));
    }

    let date_columns: Vec<&AnalyticsColumn> =
        columns.iter().filter(|c| timeseries::is_date_typed(&c.data_type)).collect();

    let mut time_series = BTreeMap::new();
    if date_columns.len() == 1 && !numeric_series.is_empty() {
        for (column, indexed) in &numeric_series {
            let values: Vec<f64> = indexed.iter().map(|&(_, v)| v).collect();
            time_series.insert(column.name.clone(), timeseries::compute_time_series(&values));
        }
    }

    Ok(AnalyticsReport {
        columns: column_stats,
        anomalies,
        time_series,
        metadata: AnalyticsMetadata { total_rows, computed_on_full_dataset: true },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, data_type: &str, index: usize) -> AnalyticsColumn {
        AnalyticsColumn { name: name.to_string(), data_type: data_type.to_string(), index }
    }

    #[test]
    fn test_analyze_reports_metadata() {
        let rows = vec![vec![Value::from(1)], vec![Value::from(2)], vec![Value::from(3)]];
        let report = analyze(&[col("amount", "numeric", 0)], &rows).unwrap();
        assert_eq!(report.metadata.total_rows, 3);
        assert!(report.metadata.computed_on_full_dataset);
        assert_eq!(report.columns["amount"].count, 3);
    }

    #[test]
    fn test_analyze_skips_non_numeric_column() {
        let rows = vec![vec![Value::from("a"), Value::from(1)], vec![Value::from("b"), Value::from(2)]];
        let report = analyze(&[col("label", "text", 0), col("amount", "numeric", 1)], &rows).unwrap();
        assert!(!report.columns.contains_key("label"));
        assert!(report.columns.contains_key("amount"));
    }

    #[test]
    fn test_analyze_builds_time_series_for_one_date_column() {
        let rows = vec![
            vec![Value::from("2024-01-01"), Value::from(10)],
            vec![Value::from("2024-01-02"), Value::from(20)],
        ];
        let report = analyze(&[col("day", "date", 0), col("amount", "numeric", 1)], &rows).unwrap();
        assert!(report.time_series.contains_key("amount"));
        assert_eq!(report.time_series["amount"][1].delta, Some(10.0));
    }

    #[test]
    fn test_analyze_skips_time_series_with_multiple_date_columns() {
        let rows = vec![vec![
            Value::from("2024-01-01"),
            Value::from("2024-02-01"),
            Value::from(10),
        ]];
        let report = analyze(
            &[col("start", "date", 0), col("end", "date", 1), col("amount", "numeric", 2)],
            &rows,
        )
        .unwrap();
        assert!(report.time_series.is_empty());
    }

    #[test]
    fn test_analyze_empty_columns_errors() {
        let result = analyze(&[], &[]);
        assert!(result.is_err());
    }
}
