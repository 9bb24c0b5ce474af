//! Anomaly flags on numeric columns: z-score and the IQR (interquartile
//! range) rule, both deterministic. No learned model, no history.

use serde::{Deserialize, Serialize};

/// Which rule flagged the value. A single value can be flagged by both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyMethod {
    ZScore,
    Iqr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub column: String,
    pub row_index: usize,
    pub value: f64,
    pub method: AnomalyMethod,
    /// The z-score (for `ZScore`) or the IQR multiple past the fence (for
    /// `Iqr`) that triggered the flag.
    pub score: f64,
}

/// Flag values with `|z| > 3.0` relative to `mean`/`stddev`. Skipped
/// entirely when `stddev` is zero (a constant column has no anomalies by
/// definition, and dividing by zero would flag everything).
const ZSCORE_THRESHOLD: f64 = 3.0;

pub fn zscore_anomalies(column: &str, values: &[(usize, f64)], mean: f64, stddev: f64) -> Vec<Anomaly> {
    if stddev == 0.0 {
        return Vec::new();
    }
    values
        .iter()
        .filter_map(|&(row_index, value)| {
            let z = (value - mean) / stddev;
            if z.abs() > ZSCORE_THRESHOLD {
                Some(Anomaly {
                    column: column.to_string(),
                    row_index,
                    value,
                    method: AnomalyMethod::ZScore,
                    score: z,
                })
            } else {
                None
            }
        })
        .collect()
}

/// Flag values outside `[Q1 - 1.5*IQR, Q3 + 1.5*IQR]`, the standard Tukey
/// fence. Quartiles use linear interpolation between the two closest ranks,
/// the same percentile-by-sorted-index idea as the stats module's median,
/// generalized to arbitrary fractions.
const IQR_MULTIPLIER: f64 = 1.5;

fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = pos - lower as f64;
        sorted[lower] + (sorted[upper] - sorted[lower]) * frac
    }
}

pub fn iqr_anomalies(column: &str, values: &[(usize, f64)]) -> Vec<Anomaly> {
    if values.len() < 4 {
        return Vec::new();
    }
    let mut sorted: Vec<f64> = values.iter().map(|&(_, v)| v).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    if iqr == 0.0 {
        return Vec::new();
    }
    let lower_fence = q1 - IQR_MULTIPLIER * iqr;
    let upper_fence = q3 + IQR_MULTIPLIER * iqr;

    values
        .iter()
        .filter_map(|&(row_index, value)| {
            if value < lower_fence {
                Some(Anomaly {
                    column: column.to_string(),
                    row_index,
                    value,
                    method: AnomalyMethod::Iqr,
                    score: (lower_fence - value) / iqr,
                })
            } else if value > upper_fence {
                Some(Anomaly {
                    column: column.to_string(),
                    row_index,
                    value,
                    method: AnomalyMethod::Iqr,
                    score: (value - upper_fence) / iqr,
                })
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zscore_flags_outlier() {
        let mut raw = vec![10.0; 19];
        raw.push(1000.0);
        let values: Vec<(usize, f64)> = raw.iter().copied().enumerate().collect();
        let stats = super::super::stats::compute_column_stats("x", &raw, raw.len()).unwrap();
        let anomalies = zscore_anomalies("x", &values, stats.mean, stats.stddev);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].row_index, 19);
    }

    #[test]
    fn test_zscore_skips_constant_column() {
        let values: Vec<(usize, f64)> = vec![(0, 5.0), (1, 5.0), (2, 5.0)];
        assert!(zscore_anomalies("x", &values, 5.0, 0.0).is_empty());
    }

    #[test]
    fn test_iqr_flags_outlier() {
        let mut values: Vec<(usize, f64)> = (0..20).map(|i| (i, (i + 1) as f64)).collect();
        values.push((20, 1000.0));
        let anomalies = iqr_anomalies("x", &values);
        assert!(anomalies.iter().any(|a| a.row_index == 20));
    }

    #[test]
    fn test_iqr_requires_minimum_sample() {
        let values: Vec<(usize, f64)> = vec![(0, 1.0), (1, 2.0)];
        assert!(iqr_anomalies("x", &values).is_empty());
    }
}
