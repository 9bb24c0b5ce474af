//! Deltas and simple moving averages for time-series shaped results: one
//! date-typed dimension plus at least one numeric measure, ordered by that
//! dimension. Purely arithmetic over whatever row order the executor
//! returned. This module never re-sorts, since sort order is the query's
//! `ORDER BY` contract, not the analytics stage's to second-guess.

use serde::{Deserialize, Serialize};

/// Moving-average window sizes.
pub const MOVING_AVERAGE_WINDOWS: &[usize] = &[3, 7];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub row_index: usize,
    pub value: f64,
    /// `value - previous row's value`; `None` for the first point.
    pub delta: Option<f64>,
    /// window size -> trailing simple moving average, present once at
    /// least `window` points have been seen.
    pub moving_averages: std::collections::BTreeMap<usize, f64>,
}

/// Compute deltas and trailing moving averages over `values`, in the order
/// given (assumed already ordered by the time dimension).
pub fn compute_time_series(values: &[f64]) -> Vec<TimeSeriesPoint> {
    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let delta = if i == 0 { None } else { Some(value - values[i - 1]) };

            let moving_averages = MOVING_AVERAGE_WINDOWS
                .iter()
                .filter_map(|&window| {
                    if i + 1 < window {
                        return None;
                    }
                    let slice = &values[i + 1 - window..=i];
                    let avg = slice.iter().sum::<f64>() / window as f64;
                    Some((window, avg))
                })
                .collect();

            TimeSeriesPoint { row_index: i, value, delta, moving_averages }
        })
        .collect()
}

/// A result set qualifies as time-series shaped when exactly one dimension
/// column is date/timestamp-typed and at least one other column is numeric.
/// Matches against the driver-reported `data_type` string rather than
/// sniffing cell values, since the executor already carries that metadata
/// on `QueryResultColumn`.
pub fn is_date_typed(data_type: &str) -> bool {
    let lowered = data_type.to_lowercase();
    lowered.contains("date") || lowered.contains("timestamp") || lowered.contains("time")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_is_none_for_first_point() {
        let points = compute_time_series(&[1.0, 2.0, 4.0]);
        assert_eq!(points[0].delta, None);
        assert_eq!(points[1].delta, Some(1.0));
        assert_eq!(points[2].delta, Some(2.0));
    }

    #[test]
    fn test_moving_average_needs_full_window() {
        let points = compute_time_series(&[1.0, 2.0, 3.0]);
        assert!(points[0].moving_averages.get(&3).is_none());
        assert!(points[1].moving_averages.get(&3).is_none());
        assert_eq!(points[2].moving_averages.get(&3), Some(&2.0));
    }

    #[test]
    fn test_moving_average_window_of_seven() {
        let values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        let points = compute_time_series(&values);
        // points[6] covers values[0..=6] = 1..=7, average 4.0
        assert_eq!(points[6].moving_averages.get(&7), Some(&4.0));
    }

    #[test]
    fn test_is_date_typed() {
        assert!(is_date_typed("DATE"));
        assert!(is_date_typed("timestamptz"));
        assert!(!is_date_typed("integer"));
    }
}
