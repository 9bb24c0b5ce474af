//! Error type for the semantic store.

use std::fmt;

/// Result type for semantic store operations.
pub type SemanticResult<T> = Result<T, SemanticError>;

/// Errors raised while resolving or mutating the governed semantic layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SemanticError {
    /// A referenced field, connection, or table doesn't exist (or was soft-deleted).
    NotFound(String),

    /// A write would violate a uniqueness or consistency constraint.
    Conflict(String),

    /// A calculated metric's formula references a field that no longer exists,
    /// or failed to parse against the current schema.
    StaleFormula { field: String, reason: String },

    /// No join path exists between two tables in the declared foreign-key graph.
    NoJoinPath { from: String, to: String },

    /// The formula text could not be parsed as a SQL expression.
    InvalidFormula(String),

    /// SQLite persistence failure.
    Storage(String),
}

impl fmt::Display for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticError::NotFound(what) => write!(f, "not found: {}", what),
            SemanticError::Conflict(msg) => write!(f, "conflict: {}", msg),
            SemanticError::StaleFormula { field, reason } => {
                write!(f, "stale formula for '{}': {}", field, reason)
            }
            SemanticError::NoJoinPath { from, to } => {
                write!(f, "no declared join path from '{}' to '{}'", from, to)
            }
            SemanticError::InvalidFormula(msg) => write!(f, "invalid formula: {}", msg),
            SemanticError::Storage(msg) => write!(f, "storage error: {}", msg),
        }
    }
}

impl std::error::Error for SemanticError {}

impl From<rusqlite::Error> for SemanticError {
    fn from(err: rusqlite::Error) -> Self {
        SemanticError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SemanticError {
    fn from(err: serde_json::Error) -> Self {
        SemanticError::Storage(err.to_string())
    }
}
