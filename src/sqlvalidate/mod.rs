//! AST-based governance checks over synthesized SQL text (C8).
//!
//! - `types`: `ValidationLevel`, `Severity`, `ValidationIssue`, `ValidationReport`.
//! - `validator`: `validate`, run once before RLS injection and again after
//!   (idempotent): structure, security, schema, performance, and LIMIT
//!   checks against three configurable strictness levels.

pub mod types;
pub mod validator;

pub use types::{Severity, ValidationIssue, ValidationLevel, ValidationMetadata, ValidationReport};
pub use validator::validate;
