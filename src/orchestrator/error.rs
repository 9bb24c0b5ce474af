//! Typed, stage-tagged pipeline error surfaced to the caller on any
//! non-recoverable stage failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable top-level error category. `Overloaded` is raised by backpressure
/// ahead of the pipeline proper (queue-depth rejection), not by any one
/// stage, but shares the same `kind` vocabulary callers match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationError,
    PlanError,
    SqlGenerationError,
    ExecutionError,
    LlmError,
    AnalyticsError,
    AuthError,
    Overloaded,
    UnknownError,
}

/// `{kind, stage, message, debug_info?}` exactly as carried in the response
/// envelope's `error` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageError {
    pub kind: ErrorKind,
    pub stage: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<Value>,
}

impl StageError {
    pub fn new(kind: ErrorKind, stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind, stage: stage.into(), message: message.into(), debug_info: None }
    }

    pub fn with_debug(mut self, debug_info: Value) -> Self {
        self.debug_info = Some(debug_info);
        self
    }
}
