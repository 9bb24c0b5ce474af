//! Executor-specific error types.

use thiserror::Error;

use crate::worker::WorkerError;

/// Result type for executor operations.
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Errors surfaced by query execution, mapped to a stable `code()` an
/// orchestrator stage can attach to its typed pipeline error without
/// inspecting `message`.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// The statement exceeded the configured execution timeout.
    #[error("query execution timed out after {0}s")]
    Timeout(u64),

    /// The connection's read-only role was denied by the target database.
    #[error("permission denied executing query: {0}")]
    PermissionDenied(String),

    /// The backend rejected the SQL text itself. Should be unreachable once
    /// a query has passed `sqlvalidate`; surfaced distinctly so a failure
    /// here is investigated as a validator gap rather than a user error.
    #[error("backend rejected query syntax: {0}")]
    SyntaxError(String),

    /// No connection slot was available and the pool wait also timed out,
    /// or the backend process is not responding.
    #[error("executor backend unavailable: {0}")]
    Unavailable(String),

    /// The connection registry has no entry for the requested connection id.
    #[error("unknown connection: {0}")]
    UnknownConnection(String),

    /// Bubbled up from the backend's transport layer without a more
    /// specific classification.
    #[error("backend error: {0}")]
    Backend(#[from] WorkerError),
}

impl ExecutorError {
    /// Stable category string for the orchestrator's typed error payload.
    pub fn code(&self) -> &'static str {
        match self {
            ExecutorError::Timeout(_) => "TIMEOUT",
            ExecutorError::PermissionDenied(_) => "PERMISSION_DENIED",
            ExecutorError::SyntaxError(_) => "SYNTAX_ERROR",
            ExecutorError::Unavailable(_) => "UNAVAILABLE",
            ExecutorError::UnknownConnection(_) => "UNAVAILABLE",
            ExecutorError::Backend(_) => "UNAVAILABLE",
        }
    }

    /// Classify a raw backend error code/message pair the way
    /// `WorkerClient::classify_error` classifies transport errors, but one
    /// level up: turning `WorkerError` variants into the four executor-level
    /// categories the orchestrator contract names.
    pub fn from_worker_error(err: WorkerError) -> Self {
        match err {
            WorkerError::Timeout(secs) => ExecutorError::Timeout(secs),
            WorkerError::Remote { code, message } => match code.as_str() {
                "PERMISSION_DENIED" | "INSUFFICIENT_PRIVILEGE" => {
                    ExecutorError::PermissionDenied(message)
                }
                "SYNTAX_ERROR" | "INVALID_SQL" => ExecutorError::SyntaxError(message),
                _ => ExecutorError::Unavailable(message),
            },
            WorkerError::ConnectionFailed(msg) => ExecutorError::Unavailable(msg),
            WorkerError::DriverNotFound(msg) => ExecutorError::Unavailable(msg),
            other => ExecutorError::Backend(other),
        }
    }
}
