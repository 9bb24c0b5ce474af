//! C6: rejects plans with unknown names, resolves named time periods to
//! concrete UTC bounds, and enforces row-limit/time-grain invariants before
//! a plan reaches SQL synthesis.

pub mod error;
pub mod validator;

pub use error::{ValidationError, ValidationResult};
pub use validator::validate;
