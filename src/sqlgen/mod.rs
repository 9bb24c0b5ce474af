//! Deterministic, template-driven SQL synthesis from a validated query plan.
//!
//! - `synthesizer`: resolves a `QueryPlan` against a `SemanticContext`,
//!   selects a join path via `semantic::join_graph`'s BFS (never a
//!   cost-based optimizer), and emits a `sql::query::Query` with every
//!   literal value bound through `sql::expr::Expr::Param` (C7).

pub mod error;
pub mod synthesizer;

pub use error::{SynthesisError, SynthesisResult};
pub use synthesizer::{synthesize, SynthesizedQuery};
