//! Persistent vector store: three collections (`fields`, `synonyms`,
//! `queries`) over `rusqlite`, with an in-memory cosine-similarity index
//! rebuilt from the table on open.
//!
//! Grounded in `crate::cache::MetadataCache`'s versioned-schema persistence
//! pattern, and in the pack's `InMemoryVectorStore` cosine-search shape
//! (linear scan + sort, no approximate index: collection sizes here are
//! per-connection field/synonym counts, not millions of documents).

use std::fmt;
use std::sync::RwLock;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::embedder::Embedder;

const SCHEMA_VERSION: i32 = 1;

#[derive(Debug)]
pub enum VectorError {
    Storage(String),
    Json(String),
    DimensionMismatch { expected: usize, actual: usize },
}

impl fmt::Display for VectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorError::Storage(msg) => write!(f, "vector store storage error: {}", msg),
            VectorError::Json(msg) => write!(f, "vector store serialization error: {}", msg),
            VectorError::DimensionMismatch { expected, actual } => write!(
                f,
                "embedding dimension mismatch: expected {}, got {}",
                expected, actual
            ),
        }
    }
}

impl std::error::Error for VectorError {}

impl From<rusqlite::Error> for VectorError {
    fn from(e: rusqlite::Error) -> Self {
        VectorError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for VectorError {
    fn from(e: serde_json::Error) -> Self {
        VectorError::Json(e.to_string())
    }
}

pub type VectorResult<T> = Result<T, VectorError>;

/// An embedded `SemanticField`, keyed by `(connection_id, field_name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FieldDoc {
    connection_id: String,
    field_name: String,
    text: String,
    embedding: Vec<f32>,
    tick: u64,
}

/// A learned user-term -> canonical-field mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedSynonym {
    pub connection_id: String,
    pub user_term: String,
    pub canonical_name: String,
    pub confidence: f64,
    pub match_count: u64,
    pub tick: u64,
}

/// A successful NL -> plan sample, kept for retrieval-augmented prompting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySample {
    pub connection_id: String,
    pub question: String,
    pub plan_json: String,
    pub embedding: Vec<f32>,
    pub tick: u64,
}

/// Result of a similarity search over `fields` or `queries`.
#[derive(Debug, Clone)]
pub struct ScoredField {
    pub connection_id: String,
    pub field_name: String,
    pub score: f32,
}

/// Three rusqlite-backed collections plus an in-memory cosine index over
/// `fields`, rebuilt on open from the table (no persisted ANN structure;
/// collection sizes are bounded by a connection's field count).
pub struct VectorStore {
    conn: Connection,
    embedder: Box<dyn Embedder>,
    field_index: RwLock<Vec<FieldDoc>>,
    tick: std::sync::atomic::AtomicU64,
}

impl VectorStore {
    pub fn open_in_memory(embedder: Box<dyn Embedder>) -> VectorResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, embedder)
    }

    pub fn open(path: &std::path::Path, embedder: Box<dyn Embedder>) -> VectorResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, embedder)
    }

    fn from_connection(conn: Connection, embedder: Box<dyn Embedder>) -> VectorResult<Self> {
        let store = Self {
            conn,
            embedder,
            field_index: RwLock::new(Vec::new()),
            tick: std::sync::atomic::AtomicU64::new(0),
        };
        store.init()?;
        store.rebuild_field_index()?;
        Ok(store)
    }

    fn init(&self) -> VectorResult<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS vector_fields (
                connection_id TEXT NOT NULL,
                field_name TEXT NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (connection_id, field_name)
            );

            CREATE TABLE IF NOT EXISTS vector_synonyms (
                connection_id TEXT NOT NULL,
                user_term TEXT NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (connection_id, user_term)
            );

            CREATE TABLE IF NOT EXISTS vector_queries (
                connection_id TEXT NOT NULL,
                question TEXT NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (connection_id, question)
            );
            ",
        )?;

        let stored: Option<i32> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| {
                    let s: String = row.get(0)?;
                    Ok(s.parse().unwrap_or(0))
                },
            )
            .optional()?;

        match stored {
            Some(v) if v == SCHEMA_VERSION => {}
            _ => {
                self.conn.execute_batch(
                    "DELETE FROM vector_fields; DELETE FROM vector_synonyms; DELETE FROM vector_queries;",
                )?;
                self.conn.execute(
                    "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?)",
                    params![SCHEMA_VERSION.to_string()],
                )?;
            }
        }
        Ok(())
    }

    fn next_tick(&self) -> u64 {
        self.tick
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    fn rebuild_field_index(&self) -> VectorResult<()> {
        let mut stmt = self.conn.prepare("SELECT payload FROM vector_fields")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut docs = Vec::new();
        for row in rows {
            docs.push(serde_json::from_str::<FieldDoc>(&row?)?);
        }
        *self.field_index.write().unwrap() = docs;
        Ok(())
    }

    /// Recompute and store the embedding for a field's searchable text
    /// (`display_name + description + synonyms`). Idempotent: writing the
    /// same text twice leaves the stored document unchanged aside from its
    /// tick advancing.
    pub fn upsert_field(&self, connection_id: &str, field_name: &str, text: &str) -> VectorResult<()> {
        let embedding = self.embedder.embed(text);
        let doc = FieldDoc {
            connection_id: connection_id.into(),
            field_name: field_name.into(),
            text: text.into(),
            embedding,
            tick: self.next_tick(),
        };
        self.put_field(&doc)
    }

    fn put_field(&self, doc: &FieldDoc) -> VectorResult<()> {
        // Last-writer-wins on the store's monotonic tick: if a newer write
        // already landed for this key, drop this one.
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM vector_fields WHERE connection_id = ? AND field_name = ?",
                params![doc.connection_id, doc.field_name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(raw) = &existing {
            let current: FieldDoc = serde_json::from_str(raw)?;
            if current.tick > doc.tick {
                return Ok(());
            }
        }

        let payload = serde_json::to_string(doc)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO vector_fields (connection_id, field_name, payload) VALUES (?, ?, ?)",
            params![doc.connection_id, doc.field_name, payload],
        )?;
        self.rebuild_field_index()
    }

    /// Cosine-similarity search over `fields`, optionally scoped to a
    /// connection, returning the top-k scored field names.
    pub fn search_fields(
        &self,
        query_text: &str,
        connection_id: Option<&str>,
        top_k: usize,
    ) -> VectorResult<Vec<ScoredField>> {
        let query_embedding = self.embedder.embed(query_text);
        let index = self.field_index.read().unwrap();

        let mut scored: Vec<ScoredField> = index
            .iter()
            .filter(|doc| connection_id.map_or(true, |c| c == doc.connection_id))
            .map(|doc| ScoredField {
                connection_id: doc.connection_id.clone(),
                field_name: doc.field_name.clone(),
                score: cosine_similarity(&query_embedding, &doc.embedding),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Upsert a learned synonym. On a repeat match for the same
    /// `(connection_id, user_term)`, blends the new confidence into the
    /// existing one with an exponential moving average (alpha = 0.3) rather
    /// than overwriting it outright.
    pub fn record_synonym(
        &self,
        connection_id: &str,
        user_term: &str,
        canonical_name: &str,
        confidence: f64,
    ) -> VectorResult<LearnedSynonym> {
        const EMA_ALPHA: f64 = 0.3;

        let existing = self.get_synonym(connection_id, user_term)?;
        let synonym = match existing {
            Some(mut prev) if prev.canonical_name == canonical_name => {
                prev.confidence = EMA_ALPHA * confidence + (1.0 - EMA_ALPHA) * prev.confidence;
                prev.match_count += 1;
                prev.tick = self.next_tick();
                prev
            }
            _ => LearnedSynonym {
                connection_id: connection_id.into(),
                user_term: user_term.into(),
                canonical_name: canonical_name.into(),
                confidence,
                match_count: 1,
                tick: self.next_tick(),
            },
        };

        let payload = serde_json::to_string(&synonym)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO vector_synonyms (connection_id, user_term, payload) VALUES (?, ?, ?)",
            params![connection_id, user_term, payload],
        )?;
        Ok(synonym)
    }

    fn get_synonym(
        &self,
        connection_id: &str,
        user_term: &str,
    ) -> VectorResult<Option<LearnedSynonym>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM vector_synonyms WHERE connection_id = ? AND user_term = ?",
                params![connection_id, user_term],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match payload {
            Some(p) => Some(serde_json::from_str(&p)?),
            None => None,
        })
    }

    /// Bulk load every learned synonym for a connection, for intent-prompt priming.
    pub fn get_synonyms(&self, connection_id: &str) -> VectorResult<Vec<LearnedSynonym>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM vector_synonyms WHERE connection_id = ?")?;
        let rows = stmt.query_map(params![connection_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    /// Record a successful NL -> plan sample for future retrieval.
    pub fn record_query(
        &self,
        connection_id: &str,
        question: &str,
        plan_json: &str,
    ) -> VectorResult<()> {
        let embedding = self.embedder.embed(question);
        let sample = QuerySample {
            connection_id: connection_id.into(),
            question: question.into(),
            plan_json: plan_json.into(),
            embedding,
            tick: self.next_tick(),
        };
        let payload = serde_json::to_string(&sample)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO vector_queries (connection_id, question, payload) VALUES (?, ?, ?)",
            params![connection_id, question, payload],
        )?;
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::embedder::HashEmbedder;

    fn store() -> VectorStore {
        VectorStore::open_in_memory(Box::new(HashEmbedder::new(64))).unwrap()
    }

    #[test]
    fn test_upsert_and_search_field() {
        let s = store();
        s.upsert_field("conn1", "revenue", "total revenue amount earned").unwrap();
        s.upsert_field("conn1", "cost", "total cost spent").unwrap();

        let results = s.search_fields("revenue earned", Some("conn1"), 5).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].field_name, "revenue");
    }

    #[test]
    fn test_search_scoped_by_connection() {
        let s = store();
        s.upsert_field("conn1", "revenue", "total revenue amount").unwrap();
        s.upsert_field("conn2", "revenue", "total revenue amount").unwrap();

        let results = s.search_fields("revenue", Some("conn1"), 10).unwrap();
        assert!(results.iter().all(|r| r.connection_id == "conn1"));
    }

    #[test]
    fn test_record_synonym_first_write() {
        let s = store();
        let syn = s.record_synonym("conn1", "sales", "revenue", 0.8).unwrap();
        assert_eq!(syn.match_count, 1);
        assert_eq!(syn.confidence, 0.8);
    }

    #[test]
    fn test_record_synonym_ema_on_repeat() {
        let s = store();
        s.record_synonym("conn1", "sales", "revenue", 0.8).unwrap();
        let syn = s.record_synonym("conn1", "sales", "revenue", 1.0).unwrap();
        assert_eq!(syn.match_count, 2);
        // EMA blend: 0.3*1.0 + 0.7*0.8 = 0.86
        assert!((syn.confidence - 0.86).abs() < 1e-9);
    }

    #[test]
    fn test_get_synonyms_bulk_load() {
        let s = store();
        s.record_synonym("conn1", "sales", "revenue", 0.8).unwrap();
        s.record_synonym("conn1", "spend", "cost", 0.7).unwrap();
        let all = s.get_synonyms("conn1").unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_last_writer_wins_on_tick() {
        let s = store();
        s.upsert_field("conn1", "revenue", "first text").unwrap();
        // Manually simulate an out-of-order write with an older tick by
        // writing directly through put_field.
        let stale = FieldDoc {
            connection_id: "conn1".into(),
            field_name: "revenue".into(),
            text: "stale text".into(),
            embedding: s.embedder.embed("stale text"),
            tick: 0,
        };
        s.put_field(&stale).unwrap();

        let index = s.field_index.read().unwrap();
        let doc = index
            .iter()
            .find(|d| d.field_name == "revenue")
            .expect("field present");
        assert_eq!(doc.text, "first text");
    }
}
