//! Analytics-specific error types.

use thiserror::Error;

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

/// Analytics failure is always demoted to a warning by the orchestrator
/// (`results` still returned, `analytics=null`) rather than short-circuiting
/// the pipeline. This type exists only so that demotion has something
/// typed to log.
#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("column {0} reports {1} values but the result set has {2} rows")]
    RowCountMismatch(String, usize, usize),

    #[error("no columns available to analyze")]
    NoColumns,
}
