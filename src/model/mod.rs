//! Core scalar types shared by the semantic layer.

pub mod types;

pub use types::DataType;
