//! Row-level security: per-user table permissions and row filters, enforced
//! against a synthesized query, with an append-only configuration audit trail.
//!
//! - `store`: `RlsStore`, the sqlite-backed catalog of roles/filters/permissions
//!   and the audit log (C4).
//! - `engine`: applies a loaded `UserContext` to a `sql::query::Query`: table
//!   access checks, column pruning, bound-parameter predicate injection (C9).

pub mod engine;
pub mod error;
pub mod store;

pub use engine::{apply, apply_with_offset, RlsApplication};
pub use error::{RlsError, RlsResult};
pub use store::{ActorContext, AuditAction, AuditRow, RlsFilter, RlsOperator, RlsStore, TablePermission, UserContext};
