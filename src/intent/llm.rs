//! Pure-function boundary to the language model used for intent extraction.
//!
//! The model itself is out of scope; callers inject an implementation of
//! `Completer`. Shape mirrors the teacher's own collaborator-injection style
//! (e.g. `connection::SchemaProvider`): one async method, one string in,
//! one string out, no knowledge of prompts or JSON contracts baked in here.

use async_trait::async_trait;

use super::error::{IntentError, IntentResult};

#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, prompt: &str) -> IntentResult<String>;
}

/// Deterministic `Completer` double for tests: returns a fixed response
/// regardless of prompt, or an `LlmError` if configured to fail.
pub struct FixedCompleter {
    response: Result<String, String>,
}

impl FixedCompleter {
    pub fn ok(response: impl Into<String>) -> Self {
        Self { response: Ok(response.into()) }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { response: Err(message.into()) }
    }
}

#[async_trait]
impl Completer for FixedCompleter {
    async fn complete(&self, _prompt: &str) -> IntentResult<String> {
        self.response.clone().map_err(IntentError::LlmError)
    }
}
