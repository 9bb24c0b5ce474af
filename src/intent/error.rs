//! Typed errors for intent extraction.

use thiserror::Error;

pub type IntentResult<T> = Result<T, IntentError>;

#[derive(Error, Debug)]
pub enum IntentError {
    /// The LLM call itself failed, or its output failed to parse as a
    /// `QueryPlan` twice in a row (initial attempt + one repair retry).
    #[error("LLM_ERROR: {0}")]
    LlmError(String),
}
