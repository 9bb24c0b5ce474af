//! AST-based SQL governance checks, run on the synthesized SQL both before
//! and after RLS injection (the check itself is idempotent: running it
//! twice on the same text yields the same report).
//!
//! Structure and security checks walk the `sqlparser` AST directly. Schema
//! checks resolve 2-part `table.column` references against a
//! `SchemaSnapshot`; bare, unqualified column references aren't checked,
//! since resolving them would require full alias/scope binding that a
//! governance pass over arbitrary generated SQL doesn't need. The
//! synthesizer (C7) always qualifies the columns it emits. Injection-pattern
//! and LIMIT-value checks scan the AST-normalized text (the parsed statement
//! re-rendered via `Display`), not the caller's original string, so
//! whitespace/casing differences can't evade them.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::ast::{
    Expr as SqlExpr, FunctionArg, FunctionArgExpr, FunctionArguments, Query, SelectItem, SetExpr,
    Statement, TableFactor,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::connection::SchemaSnapshot;

use super::types::{ValidationIssue, ValidationLevel, ValidationMetadata, ValidationReport};

const DANGEROUS_FUNCTIONS: &[&str] = &[
    "xp_cmdshell",
    "load_file",
    "pg_read_file",
    "pg_read_binary_file",
    "copy",
];

fn is_dangerous_function(name: &str) -> bool {
    let lower = name.to_lowercase();
    DANGEROUS_FUNCTIONS.contains(&lower.as_str()) || lower.starts_with("dbms_java")
}

static INJECTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)'\s*or\s*'1'\s*=\s*'1").unwrap(),
        Regex::new(r"(?i)'\s*or\s+1\s*=\s*1").unwrap(),
        Regex::new(r"(?i);\s*(drop|delete|update|insert|alter|truncate)\s").unwrap(),
        Regex::new(r"(?i)\binto\s+outfile\b").unwrap(),
    ]
});

static LIMIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bLIMIT\s+(\d+)").unwrap());

/// Validate synthesized SQL text. Never panics, never returns `Err`. A
/// parse failure becomes a `PARSE_ERROR` entry in the report with `ok: false`
/// (fail closed), matching every other finding's shape.
pub fn validate(
    sql: &str,
    level: ValidationLevel,
    schema: Option<&SchemaSnapshot>,
    max_row_limit: u64,
    require_limit: bool,
) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut metadata = ValidationMetadata::default();

    let statements = match Parser::parse_sql(&GenericDialect {}, sql) {
        Ok(s) => s,
        Err(e) => {
            errors.push(ValidationIssue::error(
                "PARSE_ERROR",
                format!("failed to parse SQL: {}", e),
            ));
            return ValidationReport {
                ok: false,
                errors,
                warnings,
                metadata,
            };
        }
    };

    if statements.len() != 1 {
        errors.push(ValidationIssue::error(
            "MULTIPLE_STATEMENTS",
            format!("expected exactly one statement, found {}", statements.len()),
        ));
        return ValidationReport {
            ok: false,
            errors,
            warnings,
            metadata,
        };
    }

    let statement = &statements[0];
    let query = match statement {
        Statement::Query(q) => q.as_ref(),
        other => {
            metadata.statement_type = "OTHER".into();
            errors.push(ValidationIssue::error(
                "FORBIDDEN_OPERATION",
                format!("only SELECT statements are permitted; found: {}", other),
            ));
            return ValidationReport {
                ok: false,
                errors,
                warnings,
                metadata,
            };
        }
    };
    metadata.statement_type = "SELECT".into();

    // Re-rendered via Display. Normalizes whitespace/casing before the
    // text-level scans below.
    let normalized = statement.to_string();

    metadata.has_cte = query.with.is_some();
    metadata.depth = query_depth(query);
    metadata.has_subquery = metadata.depth > 1;
    metadata.join_count = count_joins(query);

    let (max_depth, max_joins) = match level {
        ValidationLevel::Strict => (3, 4),
        ValidationLevel::Moderate => (5, 8),
        ValidationLevel::Permissive => (8, 16),
    };

    if metadata.depth > max_depth {
        errors.push(ValidationIssue::error(
            "NESTING_TOO_DEEP",
            format!("query nesting depth {} exceeds max {}", metadata.depth, max_depth),
        ));
    }
    if metadata.join_count > max_joins {
        errors.push(ValidationIssue::error(
            "TOO_MANY_JOINS",
            format!("join count {} exceeds max {}", metadata.join_count, max_joins),
        ));
    }

    let mut functions = Vec::new();
    collect_functions(query, &mut functions);
    for name in &functions {
        if is_dangerous_function(name) {
            errors.push(
                ValidationIssue::error("FORBIDDEN_FUNCTION", format!("function '{}' is not permitted", name))
                    .with_context(name.clone()),
            );
        }
    }

    for pattern in INJECTION_PATTERNS.iter() {
        if pattern.is_match(&normalized) {
            errors.push(ValidationIssue::error(
                "SQL_INJECTION_RISK",
                "SQL text matches a known injection pattern",
            ));
            break;
        }
    }

    if let Some(snapshot) = schema {
        let ctes = cte_names(query);

        let mut tables = Vec::new();
        collect_tables(query, &mut tables);
        let mut alias_to_key: HashMap<String, String> = HashMap::new();
        for (schema_name, table_name, alias) in &tables {
            if ctes.contains(table_name) {
                continue;
            }
            let key = match schema_name {
                Some(s) => format!("{}.{}", s, table_name),
                None => snapshot
                    .tables
                    .keys()
                    .find(|k| k.ends_with(&format!(".{}", table_name)))
                    .cloned()
                    .unwrap_or_else(|| format!("public.{}", table_name)),
            };
            if snapshot.tables.contains_key(&key) {
                alias_to_key.insert(alias.clone().unwrap_or_else(|| table_name.clone()), key);
            } else {
                let issue = ValidationIssue::error(
                    "UNKNOWN_TABLE",
                    format!("table '{}' is not in the connection's schema", table_name),
                )
                .with_location(table_name.clone());
                push_by_level(level, &mut errors, &mut warnings, issue);
            }
        }

        let mut columns = Vec::new();
        collect_columns(query, &mut columns);
        for (qualifier, column) in &columns {
            if let Some(q) = qualifier {
                if let Some(table_key) = alias_to_key.get(q) {
                    if let Some(detail) = snapshot.tables.get(table_key) {
                        if !detail.columns.iter().any(|c| &c.name == column) {
                            let issue = ValidationIssue::error(
                                "UNKNOWN_COLUMN",
                                format!("column '{}.{}' is not in the connection's schema", q, column),
                            )
                            .with_location(format!("{}.{}", q, column));
                            push_by_level(level, &mut errors, &mut warnings, issue);
                        }
                    }
                }
            }
        }
    }

    if has_select_star(query) {
        warnings.push(ValidationIssue::warning(
            "SELECT_STAR",
            "SELECT * prevents column-level pruning and RLS column enforcement",
        ));
    }
    if metadata.join_count > 0 && !has_where(query) {
        warnings.push(ValidationIssue::warning(
            "JOIN_WITHOUT_WHERE",
            "query joins tables with no WHERE clause",
        ));
    }
    if metadata.depth > 3 {
        warnings.push(ValidationIssue::warning(
            "DEEP_NESTING",
            format!("query nesting depth {} exceeds 3", metadata.depth),
        ));
    }

    let limit_value = extract_limit(&normalized);
    if require_limit {
        match limit_value {
            None => errors.push(ValidationIssue::error("LIMIT_REQUIRED", "query must include a LIMIT clause")),
            Some(v) if v > max_row_limit => errors.push(ValidationIssue::error(
                "LIMIT_EXCEEDED",
                format!("LIMIT {} exceeds max_row_limit {}", v, max_row_limit),
            )),
            _ => {}
        }
    } else if limit_value.is_none() {
        warnings.push(ValidationIssue::warning("LIMIT_REQUIRED", "no LIMIT clause present"));
    }

    let ok = errors.is_empty();
    ValidationReport {
        ok,
        errors,
        warnings,
        metadata,
    }
}

fn push_by_level(
    level: ValidationLevel,
    errors: &mut Vec<ValidationIssue>,
    warnings: &mut Vec<ValidationIssue>,
    issue: ValidationIssue,
) {
    match level {
        ValidationLevel::Permissive => warnings.push(issue),
        _ => errors.push(issue),
    }
}

// ---------------------------------------------------------------------------
// Structure: depth, join count
// ---------------------------------------------------------------------------

fn query_depth(query: &Query) -> usize {
    1 + set_expr_depth(&query.body)
}

fn set_expr_depth(expr: &SetExpr) -> usize {
    match expr {
        SetExpr::Select(select) => {
            let mut max = 0;
            for twj in &select.from {
                max = max.max(table_factor_depth(&twj.relation));
                for join in &twj.joins {
                    max = max.max(table_factor_depth(&join.relation));
                }
            }
            if let Some(selection) = &select.selection {
                max = max.max(expr_subquery_depth(selection));
            }
            max
        }
        SetExpr::SetOperation { left, right, .. } => set_expr_depth(left).max(set_expr_depth(right)),
        SetExpr::Query(q) => query_depth(q),
        _ => 0,
    }
}

fn table_factor_depth(tf: &TableFactor) -> usize {
    match tf {
        TableFactor::Derived { subquery, .. } => query_depth(subquery),
        _ => 0,
    }
}

fn expr_subquery_depth(expr: &SqlExpr) -> usize {
    match expr {
        SqlExpr::Subquery(q) => query_depth(q),
        SqlExpr::InSubquery { subquery: q, .. } => query_depth(q),
        SqlExpr::Exists { subquery: q, .. } => query_depth(q),
        SqlExpr::BinaryOp { left, right, .. } => expr_subquery_depth(left).max(expr_subquery_depth(right)),
        SqlExpr::UnaryOp { expr: inner, .. } => expr_subquery_depth(inner),
        SqlExpr::Nested(inner) => expr_subquery_depth(inner),
        _ => 0,
    }
}

fn count_joins(query: &Query) -> usize {
    count_joins_in_set_expr(&query.body)
}

fn count_joins_in_set_expr(expr: &SetExpr) -> usize {
    match expr {
        SetExpr::Select(select) => select.from.iter().map(|twj| twj.joins.len()).sum(),
        SetExpr::SetOperation { left, right, .. } => count_joins_in_set_expr(left) + count_joins_in_set_expr(right),
        SetExpr::Query(q) => count_joins_in_set_expr(&q.body),
        _ => 0,
    }
}

// ---------------------------------------------------------------------------
// Expression walk: shared by the function- and column-collectors
// ---------------------------------------------------------------------------

fn walk_query_exprs(query: &Query, f: &mut impl FnMut(&SqlExpr)) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            walk_query_exprs(&cte.query, f);
        }
    }
    walk_set_expr(&query.body, f);
}

fn walk_set_expr(expr: &SetExpr, f: &mut impl FnMut(&SqlExpr)) {
    match expr {
        SetExpr::Select(select) => {
            for item in &select.projection {
                match item {
                    SelectItem::UnnamedExpr(e) | SelectItem::ExprWithAlias { expr: e, .. } => f(e),
                    _ => {}
                }
            }
            if let Some(selection) = &select.selection {
                f(selection);
            }
            if let Some(having) = &select.having {
                f(having);
            }
            for twj in &select.from {
                walk_table_factor_exprs(&twj.relation, f);
                for join in &twj.joins {
                    walk_table_factor_exprs(&join.relation, f);
                }
            }
        }
        SetExpr::SetOperation { left, right, .. } => {
            walk_set_expr(left, f);
            walk_set_expr(right, f);
        }
        SetExpr::Query(q) => walk_query_exprs(q, f),
        _ => {}
    }
}

fn walk_table_factor_exprs(tf: &TableFactor, f: &mut impl FnMut(&SqlExpr)) {
    if let TableFactor::Derived { subquery, .. } = tf {
        walk_query_exprs(subquery, f);
    }
}

fn function_arg_expr(arg: &FunctionArg) -> Option<&SqlExpr> {
    let arg_expr = match arg {
        FunctionArg::Unnamed(e) | FunctionArg::Named { arg: e, .. } | FunctionArg::ExprNamed { arg: e, .. } => e,
    };
    match arg_expr {
        FunctionArgExpr::Expr(inner) => Some(inner),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Security: dangerous functions
// ---------------------------------------------------------------------------

fn collect_functions(query: &Query, out: &mut Vec<String>) {
    walk_query_exprs(query, &mut |e| collect_functions_in_expr(e, out));
}

fn collect_functions_in_expr(expr: &SqlExpr, out: &mut Vec<String>) {
    match expr {
        SqlExpr::Function(func) => {
            out.push(func.name.to_string());
            if let FunctionArguments::List(list) = &func.args {
                for arg in &list.args {
                    if let Some(e) = function_arg_expr(arg) {
                        collect_functions_in_expr(e, out);
                    }
                }
            }
        }
        SqlExpr::BinaryOp { left, right, .. } => {
            collect_functions_in_expr(left, out);
            collect_functions_in_expr(right, out);
        }
        SqlExpr::UnaryOp { expr: inner, .. } => collect_functions_in_expr(inner, out),
        SqlExpr::Nested(inner) => collect_functions_in_expr(inner, out),
        SqlExpr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if let Some(o) = operand {
                collect_functions_in_expr(o, out);
            }
            for c in conditions {
                collect_functions_in_expr(c, out);
            }
            for r in results {
                collect_functions_in_expr(r, out);
            }
            if let Some(e) = else_result {
                collect_functions_in_expr(e, out);
            }
        }
        SqlExpr::Between { expr: inner, low, high, .. } => {
            collect_functions_in_expr(inner, out);
            collect_functions_in_expr(low, out);
            collect_functions_in_expr(high, out);
        }
        SqlExpr::InList { expr: inner, list, .. } => {
            collect_functions_in_expr(inner, out);
            for v in list {
                collect_functions_in_expr(v, out);
            }
        }
        SqlExpr::Subquery(q) | SqlExpr::InSubquery { subquery: q, .. } => collect_functions(q, out),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Schema: tables and (qualified) columns referenced
// ---------------------------------------------------------------------------

fn cte_names(query: &Query) -> HashSet<String> {
    let mut names = HashSet::new();
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            names.insert(cte.alias.name.value.clone());
        }
    }
    names
}

fn collect_tables(query: &Query, out: &mut Vec<(Option<String>, String, Option<String>)>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            collect_tables(&cte.query, out);
        }
    }
    collect_tables_set_expr(&query.body, out);
}

fn collect_tables_set_expr(expr: &SetExpr, out: &mut Vec<(Option<String>, String, Option<String>)>) {
    match expr {
        SetExpr::Select(select) => {
            for twj in &select.from {
                collect_table_factor(&twj.relation, out);
                for join in &twj.joins {
                    collect_table_factor(&join.relation, out);
                }
            }
        }
        SetExpr::SetOperation { left, right, .. } => {
            collect_tables_set_expr(left, out);
            collect_tables_set_expr(right, out);
        }
        SetExpr::Query(q) => collect_tables(q, out),
        _ => {}
    }
}

fn collect_table_factor(tf: &TableFactor, out: &mut Vec<(Option<String>, String, Option<String>)>) {
    match tf {
        TableFactor::Table { name, alias, .. } => {
            let parts: Vec<String> = name.0.iter().map(|i| i.value.clone()).collect();
            let (schema, table) = match parts.as_slice() {
                [s, t] => (Some(s.clone()), t.clone()),
                [t] => (None, t.clone()),
                _ => (None, parts.last().cloned().unwrap_or_default()),
            };
            let alias_name = alias.as_ref().map(|a| a.name.value.clone());
            out.push((schema, table, alias_name));
        }
        TableFactor::Derived { subquery, .. } => collect_tables(subquery, out),
        _ => {}
    }
}

fn collect_columns(query: &Query, out: &mut Vec<(Option<String>, String)>) {
    walk_query_exprs(query, &mut |e| collect_columns_in_expr(e, out));
}

fn collect_columns_in_expr(expr: &SqlExpr, out: &mut Vec<(Option<String>, String)>) {
    match expr {
        SqlExpr::CompoundIdentifier(parts) => {
            if let [table, column] = parts.as_slice() {
                out.push((Some(table.value.clone()), column.value.clone()));
            }
        }
        SqlExpr::BinaryOp { left, right, .. } => {
            collect_columns_in_expr(left, out);
            collect_columns_in_expr(right, out);
        }
        SqlExpr::UnaryOp { expr: inner, .. } => collect_columns_in_expr(inner, out),
        SqlExpr::Nested(inner) => collect_columns_in_expr(inner, out),
        SqlExpr::Function(func) => {
            if let FunctionArguments::List(list) = &func.args {
                for arg in &list.args {
                    if let Some(e) = function_arg_expr(arg) {
                        collect_columns_in_expr(e, out);
                    }
                }
            }
        }
        SqlExpr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if let Some(o) = operand {
                collect_columns_in_expr(o, out);
            }
            for c in conditions {
                collect_columns_in_expr(c, out);
            }
            for r in results {
                collect_columns_in_expr(r, out);
            }
            if let Some(e) = else_result {
                collect_columns_in_expr(e, out);
            }
        }
        SqlExpr::Between { expr: inner, low, high, .. } => {
            collect_columns_in_expr(inner, out);
            collect_columns_in_expr(low, out);
            collect_columns_in_expr(high, out);
        }
        SqlExpr::InList { expr: inner, list, .. } => {
            collect_columns_in_expr(inner, out);
            for v in list {
                collect_columns_in_expr(v, out);
            }
        }
        SqlExpr::Subquery(q) | SqlExpr::InSubquery { subquery: q, .. } => collect_columns(q, out),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Performance (warn-only) and LIMIT
// ---------------------------------------------------------------------------

fn has_select_star(query: &Query) -> bool {
    match query.body.as_ref() {
        SetExpr::Select(select) => select
            .projection
            .iter()
            .any(|item| matches!(item, SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..))),
        _ => false,
    }
}

fn has_where(query: &Query) -> bool {
    match query.body.as_ref() {
        SetExpr::Select(select) => select.selection.is_some(),
        _ => true,
    }
}

fn extract_limit(normalized: &str) -> Option<u64> {
    LIMIT_RE
        .captures_iter(normalized)
        .last()
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
