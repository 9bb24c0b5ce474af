//! Typed errors for the plan validator.

use thiserror::Error;

pub type ValidationResult<T> = Result<T, ValidationError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("UNKNOWN_METRIC: '{0}' is not a known metric")]
    UnknownMetric(String),

    #[error("UNKNOWN_DIMENSION: '{0}' is not a known dimension")]
    UnknownDimension(String),

    #[error("UNKNOWN_NAMED_PERIOD: '{0}' is not a recognized named time period")]
    UnknownNamedPeriod(String),

    #[error("LIMIT_EXCEEDED: requested limit {limit} exceeds max_row_limit {max}")]
    LimitExceeded { limit: u64, max: u64 },

    #[error("INCOMPATIBLE_TIME_GRAIN: time_grain '{grain:?}' has no date-typed dimension to apply to")]
    IncompatibleTimeGrain { grain: String },
}
