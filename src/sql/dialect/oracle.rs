//! Oracle Database SQL dialect.
//!
//! Oracle has its own mix of ANSI and proprietary syntax:
//! - ANSI identifier quoting (`"`), uppercase case folding for unquoted identifiers
//! - No native boolean type pre-23c (modeled here as NUMBER(1))
//! - OFFSET ... FETCH NEXT ... ROWS ONLY for pagination (12c+, requires ORDER BY)
//! - NVL instead of COALESCE/IFNULL, though COALESCE also works
//! - NULLS FIRST/LAST supported natively
//! - RETURNING INTO bind variables instead of a plain RETURNING clause
//! - Native MERGE, PIVOT/UNPIVOT, and CREATE OR REPLACE VIEW
//! - GENERATED ALWAYS AS IDENTITY (12c+), same shape as PostgreSQL

use super::helpers;
use super::SqlDialect;
use crate::sql::token::TokenStream;

/// Oracle Database dialect.
#[derive(Debug, Clone, Copy)]
pub struct Oracle;

impl SqlDialect for Oracle {
    fn name(&self) -> &'static str {
        "oracle"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        // No native BOOLEAN in SELECT lists pre-23c; modeled as NUMBER(1).
        helpers::format_bool_numeric(b)
    }

    fn placeholder(&self, index: usize) -> String {
        format!(":{}", index)
    }

    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        helpers::emit_limit_offset_tsql(limit, offset)
    }

    fn requires_order_by_for_offset(&self) -> bool {
        true
    }

    fn supports_native_pivot(&self) -> bool {
        true
    }

    fn supports_returning(&self) -> bool {
        // Oracle uses RETURNING ... INTO bind variables, not a bare RETURNING clause.
        false
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_oracle(name)
    }

    fn date_trunc(&self, grain: &str, column_sql: &str) -> String {
        helpers::date_trunc_oracle(grain, column_sql)
    }

    fn emit_data_type(&self, dt: &crate::model::types::DataType) -> String {
        helpers::emit_data_type_oracle(dt)
    }

    fn emit_identity(&self, start: i64, increment: i64) -> TokenStream {
        helpers::emit_identity_postgres(start, increment)
    }

    fn supports_drop_cascade(&self) -> bool {
        // DROP TABLE ... CASCADE CONSTRAINTS
        true
    }

    fn supports_merge(&self) -> bool {
        true
    }

    fn supports_create_or_replace_view(&self) -> bool {
        true
    }
}
