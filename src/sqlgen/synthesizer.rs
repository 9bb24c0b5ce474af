//! C7: deterministic, template-driven SQL synthesis from a validated
//! `QueryPlan`. Never LLM-driven: every decision is a lookup against
//! `SemanticContext` or a fixed rule below.
//!
//! Join-path selection is BFS over `semantic::join_graph::JoinGraph` (built
//! from declared foreign keys only), not a cost-based optimizer. All literal
//! values (plan filters, the time-range bound, RLS predicates appended
//! downstream) are bound via `Expr::Param`, never string-spliced; the
//! returned `bound_values` vector lines up with those placeholders 1:1.

use serde_json::Value;

use crate::intent::plan::{FilterOperator, OrderBy, PlanFilter, QueryPlan, SortDir as PlanSortDir, TimeRange};
use crate::query::{Join, JoinType, OrderByExpr, Query, SelectExpr, SortDir, TableRef};
use crate::semantic::{Aggregation, JoinEdge, SemanticContext, SemanticField};
use crate::sql::dialect::{Dialect, SqlDialect};
use crate::sql::expr::{avg, count, max, min, param, sum, table_col, BinaryOperator, Expr, ExprExt, Literal, UnaryOperator};

use super::error::{SynthesisError, SynthesisResult};

/// A synthesized query plus the ordered bound values for its `Expr::Param`
/// placeholders. `bound_values[i]` is the value for `Expr::Param(i + 1)`.
#[derive(Debug, Clone)]
pub struct SynthesizedQuery {
    pub query: Query,
    pub bound_values: Vec<Value>,
}

/// Split a join-graph table key (`"schema.table"`) into its parts, assuming
/// `public` when a field's table name carries no schema prefix. Semantic
/// fields store bare table names, join-graph keys are schema-qualified.
fn split_table_key(key: &str) -> (&str, &str) {
    match key.split_once('.') {
        Some((schema, table)) => (schema, table),
        None => ("public", key),
    }
}

fn qualify_table(table: &str) -> String {
    if table.contains('.') {
        table.to_string()
    } else {
        format!("public.{}", table)
    }
}

fn bare_table(key: &str) -> &str {
    split_table_key(key).1
}

fn table_ref(key: &str) -> TableRef {
    let (schema, table) = split_table_key(key);
    TableRef::new(table).with_schema(schema)
}

fn find_field<'a>(semantic: &'a SemanticContext, name: &str) -> SynthesisResult<&'a SemanticField> {
    semantic
        .fields
        .iter()
        .find(|f| f.active && f.name == name)
        .ok_or_else(|| SynthesisError::UnknownField(name.to_string()))
}

/// The table a field's value is materialized from: its own `table`, or (for
/// calculated fields) the first qualified table reference in its formula.
fn field_base_table(field: &SemanticField, semantic: &SemanticContext) -> SynthesisResult<String> {
    if let Some(table) = &field.table {
        return Ok(qualify_table(table));
    }
    if let Some(formula) = semantic.formulas.get(&field.name) {
        if let Some(table) = first_qualified_table(formula) {
            return Ok(qualify_table(&table));
        }
    }
    Err(SynthesisError::MissingTable(field.name.clone()))
}

fn first_qualified_table(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Column { table: Some(t), .. } => Some(t.clone()),
        Expr::BinaryOp { left, right, .. } => first_qualified_table(left).or_else(|| first_qualified_table(right)),
        Expr::UnaryOp { expr, .. } | Expr::Paren(expr) => first_qualified_table(expr),
        Expr::Function { args, .. } => args.iter().find_map(first_qualified_table),
        Expr::Case { operand, when_clauses, else_clause } => operand
            .as_deref()
            .and_then(first_qualified_table)
            .or_else(|| when_clauses.iter().find_map(|(c, r)| first_qualified_table(c).or_else(|| first_qualified_table(r))))
            .or_else(|| else_clause.as_deref().and_then(first_qualified_table)),
        _ => None,
    }
}

/// Fill in any unqualified `Column` reference in a formula with the metric's
/// base table, so a formula like `revenue - cost` (authored against a single
/// implicit table) renders as `orders.revenue - orders.cost`.
fn qualify_formula(expr: &Expr, default_table: &str) -> Expr {
    match expr {
        Expr::Column { table, column } => Expr::Column {
            table: Some(table.clone().unwrap_or_else(|| default_table.to_string())),
            column: column.clone(),
        },
        Expr::BinaryOp { left, op, right } => Expr::BinaryOp {
            left: Box::new(qualify_formula(left, default_table)),
            op: *op,
            right: Box::new(qualify_formula(right, default_table)),
        },
        Expr::UnaryOp { op, expr } => Expr::UnaryOp {
            op: *op,
            expr: Box::new(qualify_formula(expr, default_table)),
        },
        Expr::Function { name, args, distinct } => Expr::Function {
            name: name.clone(),
            args: args.iter().map(|a| qualify_formula(a, default_table)).collect(),
            distinct: *distinct,
        },
        Expr::Case { operand, when_clauses, else_clause } => Expr::Case {
            operand: operand.as_ref().map(|o| Box::new(qualify_formula(o, default_table))),
            when_clauses: when_clauses
                .iter()
                .map(|(c, r)| (qualify_formula(c, default_table), qualify_formula(r, default_table)))
                .collect(),
            else_clause: else_clause.as_ref().map(|e| Box::new(qualify_formula(e, default_table))),
        },
        Expr::Paren(inner) => Expr::Paren(Box::new(qualify_formula(inner, default_table))),
        other => other.clone(),
    }
}

fn wrap_aggregation(aggregation: Aggregation, expr: Expr) -> Expr {
    match aggregation {
        Aggregation::Sum => sum(expr),
        Aggregation::Avg => avg(expr),
        Aggregation::Min => min(expr),
        Aggregation::Max => max(expr),
        Aggregation::Count => count(expr),
        Aggregation::None | Aggregation::Calculated => expr,
    }
}

/// The rendered (unaggregated, pre-alias) expression for a semantic field:
/// its qualified column, or its qualifier-substituted formula.
fn field_value_expr(field: &SemanticField, base_table: &str, semantic: &SemanticContext) -> SynthesisResult<Expr> {
    if field.aggregation == Aggregation::Calculated {
        let formula = semantic
            .formulas
            .get(&field.name)
            .ok_or_else(|| SynthesisError::MissingTable(field.name.clone()))?;
        return Ok(Expr::Paren(Box::new(qualify_formula(formula, base_table))));
    }
    let column = field
        .column
        .as_deref()
        .ok_or_else(|| SynthesisError::MissingTable(field.name.clone()))?;
    Ok(table_col(base_table, column))
}

fn is_date_typed(data_type: &str) -> bool {
    let lower = data_type.to_lowercase();
    lower.contains("date") || lower.contains("time")
}

fn find_time_column<'a>(semantic: &'a SemanticContext, table_key: &str) -> Option<&'a SemanticField> {
    semantic
        .fields
        .iter()
        .find(|f| f.active && is_date_typed(&f.data_type) && f.table.as_deref().map(qualify_table) == Some(table_key.to_string()))
}

fn join_on(edge: &JoinEdge) -> Expr {
    let from_table = bare_table(&edge.from_table);
    let to_table = bare_table(&edge.to_table);
    edge.from_columns
        .iter()
        .zip(&edge.to_columns)
        .map(|(fc, tc)| table_col(from_table, fc).eq(table_col(to_table, tc)))
        .reduce(|a, b| a.and(b))
        .unwrap_or(Expr::Literal(Literal::Bool(true)))
}

fn value_to_expr(value: &Value, next_param: &mut usize, bound: &mut Vec<Value>) -> Expr {
    let idx = *next_param;
    *next_param += 1;
    bound.push(value.clone());
    param(idx)
}

fn build_filter_predicate(filter: &PlanFilter, target: Expr, next_param: &mut usize, bound: &mut Vec<Value>) -> SynthesisResult<Expr> {
    let invalid = |reason: &str| SynthesisError::InvalidFilterValue {
        field: filter.field.clone(),
        reason: reason.to_string(),
    };

    match filter.operator {
        FilterOperator::IsNull => Ok(target.is_null()),
        FilterOperator::IsNotNull => Ok(target.is_not_null()),
        FilterOperator::In | FilterOperator::NotIn => {
            let value = filter.value.as_ref().ok_or_else(|| invalid("IN/NOT IN requires a value"))?;
            let items = value.as_array().ok_or_else(|| invalid("IN/NOT IN requires an array value"))?;
            let values: Vec<Expr> = items.iter().map(|v| value_to_expr(v, next_param, bound)).collect();
            Ok(Expr::In {
                expr: Box::new(target),
                values,
                negated: matches!(filter.operator, FilterOperator::NotIn),
            })
        }
        other => {
            let value = filter.value.as_ref().ok_or_else(|| invalid("this operator requires a value"))?;
            let bound_expr = value_to_expr(value, next_param, bound);
            Ok(match other {
                FilterOperator::Eq => target.eq(bound_expr),
                FilterOperator::Ne => target.ne(bound_expr),
                FilterOperator::Lt => target.lt(bound_expr),
                FilterOperator::Le => target.lte(bound_expr),
                FilterOperator::Gt => target.gt(bound_expr),
                FilterOperator::Ge => target.gte(bound_expr),
                FilterOperator::Like => target.like(bound_expr),
                FilterOperator::NotLike => Expr::UnaryOp {
                    op: UnaryOperator::Not,
                    expr: Box::new(target.like(bound_expr)),
                },
                FilterOperator::In | FilterOperator::NotIn | FilterOperator::IsNull | FilterOperator::IsNotNull => unreachable!(),
            })
        }
    }
}

/// Synthesize governed SQL for a validated plan, targeting `dialect`.
/// `default_limit` is applied when the plan carries no explicit `limit`
/// (spec: always emit LIMIT).
pub fn synthesize(plan: &QueryPlan, semantic: &SemanticContext, dialect: Dialect, default_limit: u64) -> SynthesisResult<SynthesizedQuery> {
    let metric_name = plan.metric.as_ref().ok_or(SynthesisError::NoMetric)?;
    let metric_field = find_field(semantic, metric_name)?;
    let base_table = field_base_table(metric_field, semantic)?;
    let base_bare = bare_table(&base_table).to_string();

    let mut dim_fields = Vec::with_capacity(plan.dimensions.len());
    let mut dim_tables = Vec::new();
    for dim_name in &plan.dimensions {
        let field = find_field(semantic, dim_name)?;
        let table = field_base_table(field, semantic)?;
        if !dim_tables.contains(&table) {
            dim_tables.push(table.clone());
        }
        dim_fields.push((field, table));
    }

    let mut all_tables = vec![base_table.clone()];
    for t in &dim_tables {
        if !all_tables.contains(t) {
            all_tables.push(t.clone());
        }
    }
    let join_path = if all_tables.len() > 1 {
        let refs: Vec<&str> = all_tables.iter().map(String::as_str).collect();
        semantic.join_graph.find_join_tree(&refs).map_err(|e| match e {
            crate::semantic::SemanticError::NoJoinPath { from, to } => SynthesisError::NoJoinPath { from, to },
            other => SynthesisError::NoJoinPath {
                from: base_table.clone(),
                to: other.to_string(),
            },
        })?
    } else {
        Default::default()
    };

    let mut next_param = 1usize;
    let mut bound_values = Vec::new();

    // Determine, per dimension, whether a time_grain substitution applies
    // (the first date-typed dimension when plan.time_grain is set).
    let grain_dim_index = plan.time_grain.and_then(|_| {
        dim_fields
            .iter()
            .position(|(f, _)| is_date_typed(&f.data_type))
    });

    let mut select = Vec::with_capacity(dim_fields.len() + 1);
    let mut group_by = Vec::with_capacity(dim_fields.len());
    let mut dim_raw_exprs: Vec<(String, Expr)> = Vec::with_capacity(dim_fields.len());

    for (i, (field, table)) in dim_fields.iter().enumerate() {
        let bare = bare_table(table);
        let raw = field_value_expr(field, bare, semantic)?;
        let emitted = if Some(i) == grain_dim_index {
            let grain = format!("{:?}", plan.time_grain.unwrap()).to_lowercase();
            let column_sql = raw.to_tokens_for_dialect(dialect).serialize(dialect);
            Expr::Raw(dialect.date_trunc(&grain, &column_sql))
        } else {
            raw.clone()
        };
        select.push(SelectExpr::new(emitted.clone()).with_alias(&field.name));
        group_by.push(emitted.clone());
        dim_raw_exprs.push((field.name.clone(), emitted));
    }

    let metric_value = field_value_expr(metric_field, &base_bare, semantic)?;
    let metric_select = wrap_aggregation(metric_field.aggregation, metric_value.clone());
    select.push(SelectExpr::new(metric_select.clone()).with_alias(&metric_field.name));

    let mut query = Query::new().select(select).from(table_ref(&base_table));

    for edge in &join_path.edges {
        let on = join_on(edge);
        query.joins.push(Join {
            join_type: JoinType::Inner,
            table: table_ref(&edge.to_table),
            on: Some(on),
        });
    }

    // WHERE: default_filters(metric) AND plan.filters AND time_range predicate.
    let mut where_clause: Option<Expr> = None;
    for raw_filter in &metric_field.default_filters {
        let expr = Expr::Raw(raw_filter.clone());
        where_clause = Some(match where_clause {
            Some(existing) => existing.and(expr),
            None => expr,
        });
    }

    for filter in &plan.filters {
        let field = find_field(semantic, &filter.field)?;
        let table = field_base_table(field, semantic)?;
        let target = field_value_expr(field, bare_table(&table), semantic)?;
        let predicate = build_filter_predicate(filter, target, &mut next_param, &mut bound_values)?;
        where_clause = Some(match where_clause {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
    }

    if let Some(TimeRange::Explicit { start, end }) = &plan.time_range {
        let time_field = find_time_column(semantic, &base_table).ok_or_else(|| SynthesisError::NoTimeColumn(base_table.clone()))?;
        let time_col = table_col(&base_bare, time_field.column.as_deref().unwrap_or(&time_field.name));
        let start_value = Value::String(start.to_rfc3339());
        let end_value = Value::String(end.to_rfc3339());
        let predicate = time_col
            .clone()
            .gte(value_to_expr(&start_value, &mut next_param, &mut bound_values))
            .and(time_col.lt(value_to_expr(&end_value, &mut next_param, &mut bound_values)));
        where_clause = Some(match where_clause {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
    }

    if let Some(w) = where_clause {
        query = query.filter(w);
    }

    // GROUP BY: all non-aggregated projections (i.e. every dimension).
    if !group_by.is_empty() {
        query = query.group_by(group_by);
    }

    // ORDER BY: explicit plan ordering, else a documented default.
    let order_by = if !plan.order_by.is_empty() {
        plan.order_by
            .iter()
            .map(|o| resolve_order_by(o, &dim_raw_exprs, &metric_field.name, metric_select.clone()))
            .collect::<SynthesisResult<Vec<_>>>()?
    } else if let Some(idx) = grain_dim_index {
        vec![OrderByExpr::asc(dim_raw_exprs[idx].1.clone())]
    } else if plan.metric.is_some() {
        vec![OrderByExpr::desc(metric_select.clone())]
    } else {
        Vec::new()
    };
    if !order_by.is_empty() {
        query = query.order_by(order_by);
    }

    // LIMIT: always present.
    query = query.limit(plan.limit.unwrap_or(default_limit));
    if let Some(offset) = plan.offset {
        query = query.offset(offset);
    }

    Ok(SynthesizedQuery { query, bound_values })
}

fn resolve_order_by(order: &OrderBy, dims: &[(String, Expr)], metric_name: &str, metric_expr: Expr) -> SynthesisResult<OrderByExpr> {
    let expr = if order.field == metric_name {
        metric_expr
    } else {
        dims.iter()
            .find(|(name, _)| name == &order.field)
            .map(|(_, e)| e.clone())
            .ok_or_else(|| SynthesisError::UnknownField(order.field.clone()))?
    };
    Ok(match order.dir {
        PlanSortDir::Asc => OrderByExpr::asc(expr),
        PlanSortDir::Desc => OrderByExpr::desc(expr),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::plan::{QueryPlan, TimeGrain};
    use crate::semantic::{Format, JoinGraph};
    use crate::sql::dialect::{Dialect, SqlDialect as _};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn field(name: &str, table: &str, column: &str, data_type: &str, aggregation: Aggregation) -> SemanticField {
        SemanticField {
            connection_id: "conn1".into(),
            name: name.into(),
            display_name: name.into(),
            description: None,
            data_type: data_type.into(),
            table: Some(table.into()),
            column: Some(column.into()),
            formula: None,
            aggregation,
            format: Some(Format::Number),
            synonyms: vec![],
            default_filters: vec![],
            active: true,
        }
    }

    fn base_plan() -> QueryPlan {
        QueryPlan {
            metric: Some("revenue".into()),
            dimensions: vec![],
            time_range: None,
            time_grain: None,
            filters: vec![],
            order_by: vec![],
            limit: None,
            offset: None,
            intent: "test".into(),
            assumptions: vec![],
            needs_clarification: false,
            clarification_question: None,
        }
    }

    fn semantic_single_table() -> SemanticContext {
        SemanticContext {
            fields: vec![
                field("revenue", "orders", "amount", "numeric", Aggregation::Sum),
                field("region", "orders", "region", "text", Aggregation::None),
                field("order_date", "orders", "order_date", "date", Aggregation::None),
            ],
            formulas: HashMap::new(),
            join_graph: JoinGraph::new(),
            version: 1,
        }
    }

    #[test]
    fn test_missing_metric_rejected() {
        let mut plan = base_plan();
        plan.metric = None;
        let err = synthesize(&plan, &semantic_single_table(), Dialect::Postgres, 1000).unwrap_err();
        assert!(matches!(err, SynthesisError::NoMetric));
    }

    #[test]
    fn test_basic_metric_emits_limit_and_aggregation() {
        let plan = base_plan();
        let result = synthesize(&plan, &semantic_single_table(), Dialect::Postgres, 500).unwrap();
        assert_eq!(result.query.limit_offset.as_ref().and_then(|l| l.limit), Some(500));
        assert!(result.bound_values.is_empty());
        let sql = result.query.to_sql(Dialect::Postgres);
        assert!(sql.to_uppercase().contains("SUM"));
    }

    #[test]
    fn test_dimension_adds_group_by() {
        let mut plan = base_plan();
        plan.dimensions = vec!["region".into()];
        let result = synthesize(&plan, &semantic_single_table(), Dialect::Postgres, 500).unwrap();
        assert_eq!(result.query.group_by.len(), 1);
    }

    #[test]
    fn test_explicit_filter_binds_parameter() {
        let mut plan = base_plan();
        plan.filters = vec![PlanFilter {
            field: "region".into(),
            operator: FilterOperator::Eq,
            value: Some(Value::String("west".into())),
        }];
        let result = synthesize(&plan, &semantic_single_table(), Dialect::Postgres, 500).unwrap();
        assert_eq!(result.bound_values, vec![Value::String("west".into())]);
        let sql = result.query.to_sql(Dialect::Postgres);
        assert!(sql.contains("$1"));
        assert!(!sql.contains("west"));
    }

    #[test]
    fn test_time_range_adds_bound_predicate() {
        let mut plan = base_plan();
        plan.time_range = Some(TimeRange::Explicit {
            start: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap(),
        });
        let result = synthesize(&plan, &semantic_single_table(), Dialect::Postgres, 500).unwrap();
        assert_eq!(result.bound_values.len(), 2);
    }

    #[test]
    fn test_no_join_path_errors() {
        let mut semantic = semantic_single_table();
        semantic.fields.push(field("customer_name", "customers", "name", "text", Aggregation::None));
        let mut plan = base_plan();
        plan.dimensions = vec!["customer_name".into()];
        let err = synthesize(&plan, &semantic, Dialect::Postgres, 500).unwrap_err();
        assert!(matches!(err, SynthesisError::NoJoinPath { .. }));
    }

    #[test]
    fn test_time_grain_marks_grain_dimension_for_date_trunc() {
        let mut plan = base_plan();
        plan.dimensions = vec!["order_date".into()];
        plan.time_grain = Some(TimeGrain::Quarter);
        let result = synthesize(&plan, &semantic_single_table(), Dialect::Postgres, 500).unwrap();
        let sql = result.query.to_sql(Dialect::Postgres);
        assert!(sql.to_lowercase().contains("date_trunc"));
    }

    #[test]
    fn test_calculated_metric_wraps_formula() {
        let mut semantic = semantic_single_table();
        semantic.fields.push(SemanticField {
            connection_id: "conn1".into(),
            name: "profit".into(),
            display_name: "Profit".into(),
            description: None,
            data_type: "numeric".into(),
            table: None,
            column: None,
            formula: Some("revenue - cost".into()),
            aggregation: Aggregation::Calculated,
            format: Some(Format::Currency),
            synonyms: vec![],
            default_filters: vec!["status = 'completed'".into()],
            active: true,
        });
        semantic.fields.push(field("cost", "orders", "cost", "numeric", Aggregation::Sum));
        semantic
            .formulas
            .insert("profit".into(), Expr::BinaryOp {
                left: Box::new(Expr::Column { table: None, column: "revenue".into() }),
                op: BinaryOperator::Minus,
                right: Box::new(Expr::Column { table: None, column: "cost".into() }),
            });
        let mut plan = base_plan();
        plan.metric = Some("profit".into());
        let result = synthesize(&plan, &semantic, Dialect::Postgres, 500).unwrap();
        let sql = result.query.to_sql(Dialect::Postgres);
        assert!(sql.contains("orders"));
        assert!(sql.contains("status = 'completed'"));
    }

    #[test]
    fn test_default_order_is_metric_desc_when_no_time_grain() {
        let plan = base_plan();
        let result = synthesize(&plan, &semantic_single_table(), Dialect::Postgres, 500).unwrap();
        assert_eq!(result.query.order_by.len(), 1);
        assert_eq!(result.query.order_by[0].dir, Some(SortDir::Desc));
    }
}
