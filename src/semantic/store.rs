//! Persistent store for `SemanticField`s and calculated metrics.
//!
//! Schema and versioning follow `crate::cache::MetadataCache`: a
//! `CREATE TABLE IF NOT EXISTS` schema plus a `schema_version` row in a
//! `meta` table, auto-cleared on mismatch. Each connection additionally
//! tracks its own monotonic `semantic_version`, bumped on every mutating
//! write so plan/result caches keyed on it invalidate correctly.

use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::error::{SemanticError, SemanticResult};
use super::formula;
use super::join_graph::{table_key, JoinGraph};
use crate::sql::expr::Expr;
use crate::worker::protocol::ForeignKeyInfo;

const SCHEMA_VERSION: i32 = 1;

/// How a field's value is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregation {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Calculated,
    None,
}

/// Display formatting hint for a field's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    Currency,
    Percentage,
    Number,
    Date,
    Text,
}

/// A canonical business field bound to either a physical column or a
/// calculated-metric formula.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticField {
    pub connection_id: String,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub data_type: String,
    pub table: Option<String>,
    pub column: Option<String>,
    pub formula: Option<String>,
    pub aggregation: Aggregation,
    pub format: Option<Format>,
    pub synonyms: Vec<String>,
    pub default_filters: Vec<String>,
    pub active: bool,
}

/// Fields to write on create or update. Exactly one of `(table, column)` or
/// `formula` must be set.
#[derive(Debug, Clone)]
pub struct FieldWrite {
    pub connection_id: String,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub data_type: String,
    pub table: Option<String>,
    pub column: Option<String>,
    pub formula: Option<String>,
    pub aggregation: Aggregation,
    pub format: Option<Format>,
    pub synonyms: Vec<String>,
    pub default_filters: Vec<String>,
}

/// Everything the intent extractor and SQL synthesizer need for one
/// connection: the active fields, their parsed formulas, the join graph
/// built from declared foreign keys, and the semantic version the result
/// was resolved at.
#[derive(Debug, Clone)]
pub struct SemanticContext {
    pub fields: Vec<SemanticField>,
    pub formulas: HashMap<String, Expr>,
    pub join_graph: JoinGraph,
    pub version: u64,
}

pub struct SemanticStore {
    conn: Connection,
}

impl SemanticStore {
    pub fn open_in_memory() -> SemanticResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    pub fn open(path: &std::path::Path) -> SemanticResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> SemanticResult<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS semantic_versions (
                connection_id TEXT PRIMARY KEY,
                version INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS semantic_fields (
                connection_id TEXT NOT NULL,
                name TEXT NOT NULL,
                payload TEXT NOT NULL,
                active INTEGER NOT NULL,
                PRIMARY KEY (connection_id, name)
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
                self.conn
                    .execute_batch("DELETE FROM semantic_fields; DELETE FROM semantic_versions;")?;
                self.conn.execute(
                    "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?)",
                    params![SCHEMA_VERSION.to_string()],
                )?;
            }
        }

        Ok(())
    }

    /// Create a new field. Errors with `Conflict` if `name` is already taken
    /// (including by a soft-deleted field: names are never recycled).
    pub fn create_field(&self, write: FieldWrite) -> SemanticResult<SemanticField> {
        validate_write(&write)?;
        if let Some(formula_text) = &write.formula {
            formula::parse_formula(formula_text)
                .map_err(|_| SemanticError::InvalidFormula(formula_text.clone()))?;
        }

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM semantic_fields WHERE connection_id = ? AND name = ?",
                params![write.connection_id, write.name],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(SemanticError::Conflict(format!(
                "field '{}' already exists for connection '{}'",
                write.name, write.connection_id
            )));
        }

        let field = SemanticField {
            connection_id: write.connection_id.clone(),
            name: write.name.clone(),
            display_name: write.display_name,
            description: write.description,
            data_type: write.data_type,
            table: write.table,
            column: write.column,
            formula: write.formula,
            aggregation: write.aggregation,
            format: write.format,
            synonyms: write.synonyms,
            default_filters: write.default_filters,
            active: true,
        };

        self.put_field(&field)?;
        self.bump_version(&write.connection_id)?;
        Ok(field)
    }

    /// Update an existing active field in place (name and connection fixed).
    pub fn update_field(
        &self,
        connection_id: &str,
        name: &str,
        write: FieldWrite,
    ) -> SemanticResult<SemanticField> {
        validate_write(&write)?;
        let mut field = self.get_field(connection_id, name)?;

        if let Some(formula_text) = &write.formula {
            formula::parse_formula(formula_text)
                .map_err(|_| SemanticError::InvalidFormula(formula_text.clone()))?;
        }

        field.display_name = write.display_name;
        field.description = write.description;
        field.data_type = write.data_type;
        field.table = write.table;
        field.column = write.column;
        field.formula = write.formula;
        field.aggregation = write.aggregation;
        field.format = write.format;
        field.synonyms = write.synonyms;
        field.default_filters = write.default_filters;

        self.put_field(&field)?;
        self.bump_version(connection_id)?;
        Ok(field)
    }

    /// Soft-delete a field: flips `active` to false, never removes the row.
    pub fn deactivate_field(&self, connection_id: &str, name: &str) -> SemanticResult<()> {
        let mut field = self.get_field(connection_id, name)?;
        field.active = false;
        self.put_field(&field)?;
        self.bump_version(connection_id)?;
        Ok(())
    }

    pub fn get_field(&self, connection_id: &str, name: &str) -> SemanticResult<SemanticField> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM semantic_fields WHERE connection_id = ? AND name = ?",
                params![connection_id, name],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(p) => Ok(serde_json::from_str(&p)?),
            None => Err(SemanticError::NotFound(format!(
                "field '{}' for connection '{}'",
                name, connection_id
            ))),
        }
    }

    fn put_field(&self, field: &SemanticField) -> SemanticResult<()> {
        let payload = serde_json::to_string(field)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO semantic_fields (connection_id, name, payload, active)
             VALUES (?, ?, ?, ?)",
            params![field.connection_id, field.name, payload, field.active as i64],
        )?;
        Ok(())
    }

    /// Bump the monotonic semantic version for a connection, invalidating
    /// any plan/result cache entries keyed on the old version.
    pub fn bump_version(&self, connection_id: &str) -> SemanticResult<u64> {
        self.conn.execute(
            "INSERT INTO semantic_versions (connection_id, version) VALUES (?, 1)
             ON CONFLICT(connection_id) DO UPDATE SET version = version + 1",
            params![connection_id],
        )?;
        self.version(connection_id)
    }

    pub fn version(&self, connection_id: &str) -> SemanticResult<u64> {
        let v: Option<i64> = self
            .conn
            .query_row(
                "SELECT version FROM semantic_versions WHERE connection_id = ?",
                params![connection_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(v.unwrap_or(0) as u64)
    }

    /// Resolve the full semantic context for a connection: active fields,
    /// their parsed formulas, the declared-FK join graph, and the current
    /// version. Formulas that fail to re-parse against the given schema are
    /// deactivated in place and surfaced only in the `formulas` gap (callers
    /// see the field as `active = false` on the next `resolve`).
    pub fn resolve(
        &self,
        connection_id: &str,
        foreign_keys: &HashMap<String, Vec<ForeignKeyInfo>>,
    ) -> SemanticResult<SemanticContext> {
        let mut stmt = self.conn.prepare(
            "SELECT payload FROM semantic_fields WHERE connection_id = ? AND active = 1",
        )?;
        let rows = stmt.query_map(params![connection_id], |row| {
            let payload: String = row.get(0)?;
            Ok(payload)
        })?;

        let mut fields = Vec::new();
        let mut formulas = HashMap::new();
        let mut stale = Vec::new();

        for row in rows {
            let payload = row?;
            let field: SemanticField = serde_json::from_str(&payload)?;
            if let Some(formula_text) = &field.formula {
                match formula::parse_formula(formula_text) {
                    Ok(expr) => {
                        formulas.insert(field.name.clone(), expr);
                        fields.push(field);
                    }
                    Err(e) => {
                        stale.push((field.connection_id.clone(), field.name.clone(), e));
                    }
                }
            } else {
                fields.push(field);
            }
        }
        drop(stmt);

        for (conn_id, name, _err) in &stale {
            let mut field = self.get_field(conn_id, name)?;
            field.active = false;
            self.put_field(&field)?;
        }
        if !stale.is_empty() {
            self.bump_version(connection_id)?;
        }

        let join_graph = JoinGraph::build(foreign_keys);
        let version = self.version(connection_id)?;

        if let Some((_, name, err)) = stale.into_iter().next() {
            return Err(SemanticError::StaleFormula {
                field: name,
                reason: err.to_string(),
            });
        }

        Ok(SemanticContext {
            fields,
            formulas,
            join_graph,
            version,
        })
    }
}

fn validate_write(write: &FieldWrite) -> SemanticResult<()> {
    let has_column = write.table.is_some() && write.column.is_some();
    let has_formula = write.formula.is_some();
    if has_column == has_formula {
        return Err(SemanticError::Conflict(
            "exactly one of (table, column) or formula must be provided".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(name: &str) -> FieldWrite {
        FieldWrite {
            connection_id: "conn1".into(),
            name: name.into(),
            display_name: name.into(),
            description: None,
            data_type: "int64".into(),
            table: Some("orders".into()),
            column: Some("amount".into()),
            formula: None,
            aggregation: Aggregation::Sum,
            format: Some(Format::Currency),
            synonyms: vec![],
            default_filters: vec![],
        }
    }

    #[test]
    fn test_create_and_get_field() {
        let store = SemanticStore::open_in_memory().unwrap();
        store.create_field(write("revenue")).unwrap();
        let field = store.get_field("conn1", "revenue").unwrap();
        assert!(field.active);
        assert_eq!(field.table.as_deref(), Some("orders"));
    }

    #[test]
    fn test_create_duplicate_conflicts() {
        let store = SemanticStore::open_in_memory().unwrap();
        store.create_field(write("revenue")).unwrap();
        let err = store.create_field(write("revenue")).unwrap_err();
        assert!(matches!(err, SemanticError::Conflict(_)));
    }

    #[test]
    fn test_requires_exactly_one_of_column_or_formula() {
        let store = SemanticStore::open_in_memory().unwrap();
        let mut w = write("bad");
        w.formula = Some("a - b".into());
        let err = store.create_field(w).unwrap_err();
        assert!(matches!(err, SemanticError::Conflict(_)));
    }

    #[test]
    fn test_calculated_metric_parses_formula() {
        let store = SemanticStore::open_in_memory().unwrap();
        let mut w = write("profit");
        w.table = None;
        w.column = None;
        w.formula = Some("revenue - cost".into());
        w.aggregation = Aggregation::Calculated;
        store.create_field(w).unwrap();

        let fks = HashMap::new();
        let ctx = store.resolve("conn1", &fks).unwrap();
        assert!(ctx.formulas.contains_key("profit"));
    }

    #[test]
    fn test_invalid_formula_rejected_at_create() {
        let store = SemanticStore::open_in_memory().unwrap();
        let mut w = write("broken");
        w.table = None;
        w.column = None;
        w.formula = Some("sum(amount".into());
        let err = store.create_field(w).unwrap_err();
        assert!(matches!(err, SemanticError::InvalidFormula(_)));
    }

    #[test]
    fn test_deactivate_is_soft_delete() {
        let store = SemanticStore::open_in_memory().unwrap();
        store.create_field(write("revenue")).unwrap();
        store.deactivate_field("conn1", "revenue").unwrap();

        let field = store.get_field("conn1", "revenue").unwrap();
        assert!(!field.active);

        let fks = HashMap::new();
        let ctx = store.resolve("conn1", &fks).unwrap();
        assert!(ctx.fields.iter().all(|f| f.name != "revenue"));
    }

    #[test]
    fn test_bump_version_on_every_mutation() {
        let store = SemanticStore::open_in_memory().unwrap();
        assert_eq!(store.version("conn1").unwrap(), 0);
        store.create_field(write("revenue")).unwrap();
        assert_eq!(store.version("conn1").unwrap(), 1);
        store.deactivate_field("conn1", "revenue").unwrap();
        assert_eq!(store.version("conn1").unwrap(), 2);
    }

    #[test]
    fn test_resolve_builds_join_graph_from_foreign_keys() {
        let store = SemanticStore::open_in_memory().unwrap();
        store.create_field(write("revenue")).unwrap();

        let mut fks = HashMap::new();
        fks.insert(
            table_key("public", "orders"),
            vec![ForeignKeyInfo {
                name: "fk_customer".into(),
                columns: vec!["customer_id".into()],
                referenced_schema: "public".into(),
                referenced_table: "customers".into(),
                referenced_columns: vec!["id".into()],
                on_delete: None,
                on_update: None,
            }],
        );
        fks.insert(table_key("public", "customers"), vec![]);

        let ctx = store.resolve("conn1", &fks).unwrap();
        assert!(ctx
            .join_graph
            .has_table(&table_key("public", "orders")));
        assert!(ctx
            .join_graph
            .find_path(&table_key("public", "orders"), &table_key("public", "customers"))
            .is_ok());
    }
}
