//! Shapes of a SQL validation run: severity-tagged issues and run metadata.

use serde::{Deserialize, Serialize};

/// Governs function whitelists and complexity caps. Doesn't change which
/// structural/security checks run, only whether their findings are errors or
/// warnings and how generous the depth/join-count ceilings are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Strict,
    Moderate,
    Permissive,
}

/// `config::settings::ValidationSettings` carries the configured default as
/// its own enum (parsed straight off the TOML file); this maps that
/// config-layer value onto the domain-layer one a request can also
/// override per-call.
impl From<crate::config::settings::ValidationLevel> for ValidationLevel {
    fn from(level: crate::config::settings::ValidationLevel) -> Self {
        match level {
            crate::config::settings::ValidationLevel::Strict => ValidationLevel::Strict,
            crate::config::settings::ValidationLevel::Moderate => ValidationLevel::Moderate,
            crate::config::settings::ValidationLevel::Permissive => ValidationLevel::Permissive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// One finding. `code` is a stable identifier (`FORBIDDEN_OPERATION`,
/// `SQL_INJECTION_RISK`, `UNKNOWN_TABLE`, ...) callers can match on without
/// parsing `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: &'static str,
    pub message: String,
    pub severity: Severity,
    pub location: Option<String>,
    pub context: Option<String>,
}

impl ValidationIssue {
    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: Severity::Error,
            location: None,
            context: None,
        }
    }

    pub fn warning(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: Severity::Warning,
            location: None,
            context: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetadata {
    pub has_cte: bool,
    pub has_subquery: bool,
    pub join_count: usize,
    pub depth: usize,
    pub statement_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub metadata: ValidationMetadata,
}
