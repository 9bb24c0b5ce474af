//! Governed semantic layer: the single source of truth for what a business
//! term ("revenue", "active customers") means in terms of physical tables,
//! columns, and join paths.
//!
//! - `store`: CRUD for `SemanticField`s and calculated metrics, plus
//!   `resolve()` producing the `SemanticContext` consumed by intent
//!   extraction and SQL synthesis.
//! - `formula`: parses calculated-metric formula text into `crate::sql::expr::Expr`.
//! - `join_graph`: join-path resolution over a connection's declared foreign keys.

pub mod error;
pub mod formula;
pub mod join_graph;
pub mod store;

pub use error::{SemanticError, SemanticResult};
pub use join_graph::{JoinEdge, JoinGraph, JoinPath};
pub use store::{Aggregation, FieldWrite, Format, SemanticContext, SemanticField, SemanticStore};
