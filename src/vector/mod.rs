//! Embedding-backed retrieval: semantic search over field definitions,
//! learned user-term synonyms, and past successful NL -> plan samples.
//!
//! - `embedder`: the pure-function embedding boundary (`Embedder` trait),
//!   injected by callers.
//! - `store`: the three `rusqlite`-backed collections (`fields`, `synonyms`,
//!   `queries`) with an in-memory cosine-similarity index.

pub mod embedder;
pub mod store;

pub use embedder::{Embedder, HashEmbedder};
pub use store::{LearnedSynonym, QuerySample, ScoredField, VectorError, VectorResult, VectorStore};
