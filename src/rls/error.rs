//! Typed errors for the RLS store and engine.

use thiserror::Error;

pub type RlsResult<T> = Result<T, RlsError>;

#[derive(Error, Debug)]
pub enum RlsError {
    #[error("table is not readable for this user: {0}")]
    ForbiddenTable(String),

    #[error("no join path / RLS scope could be resolved for table {0}")]
    UnresolvedScope(String),

    #[error("RLS store storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("RLS store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid RLS filter value for {table}.{column}: {reason}")]
    InvalidFilterValue {
        table: String,
        column: String,
        reason: String,
    },
}
