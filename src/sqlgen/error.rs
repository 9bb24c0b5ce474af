//! Typed errors for SQL synthesis.

use thiserror::Error;

pub type SynthesisResult<T> = Result<T, SynthesisError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynthesisError {
    #[error("NO_METRIC: a query plan must name a metric to synthesize SQL")]
    NoMetric,

    #[error("UNKNOWN_FIELD: '{0}' is not a known active semantic field")]
    UnknownField(String),

    #[error("MISSING_TABLE: semantic field '{0}' has neither a table nor a resolvable formula base table")]
    MissingTable(String),

    #[error("NO_JOIN_PATH: no declared foreign-key path connects '{from}' to '{to}'")]
    NoJoinPath { from: String, to: String },

    #[error("NO_TIME_COLUMN: table '{0}' has no active date-typed field to filter on")]
    NoTimeColumn(String),

    #[error("INVALID_FILTER_VALUE: filter on '{field}' is invalid: {reason}")]
    InvalidFilterValue { field: String, reason: String },
}
