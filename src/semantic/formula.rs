//! Parses calculated-metric formula text into the dialect-agnostic `Expr` AST.
//!
//! Formulas are authored by semantic-layer admins (e.g. `"revenue - cost"` or
//! `"sum(amount) / nullif(sum(quantity), 0)"`). We wrap the text in a `SELECT`
//! and parse it with `sqlparser`'s `GenericDialect`, then walk the resulting
//! AST into `crate::sql::expr::Expr` so the synthesizer can emit it for any
//! target dialect. Constructs we don't translate structurally (CAST, EXTRACT,
//! and other dialect-flavored syntax) fall back to `Expr::Raw` rather than
//! rejecting the formula outright.

use sqlparser::ast::{
    BinaryOperator as SqlBinaryOp, DuplicateTreatment, Expr as SqlExpr, FunctionArg,
    FunctionArgExpr, FunctionArguments, SelectItem, SetExpr, Statement, UnaryOperator as SqlUnaryOp,
    Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use super::error::{SemanticError, SemanticResult};
use crate::sql::expr::{BinaryOperator, Expr, Literal, UnaryOperator};

/// Parse a formula string into an `Expr`.
///
/// Returns `SemanticError::InvalidFormula` if the text isn't a single valid
/// SQL scalar expression.
pub fn parse_formula(formula: &str) -> SemanticResult<Expr> {
    let sql = format!("SELECT {}", formula);
    let statements = Parser::parse_sql(&GenericDialect {}, &sql)
        .map_err(|e| SemanticError::InvalidFormula(e.to_string()))?;

    let select = match statements.as_slice() {
        [Statement::Query(query)] => match query.body.as_ref() {
            SetExpr::Select(select) => select,
            _ => {
                return Err(SemanticError::InvalidFormula(
                    "formula must be a single scalar expression".into(),
                ))
            }
        },
        _ => {
            return Err(SemanticError::InvalidFormula(
                "formula must be a single SQL statement".into(),
            ))
        }
    };

    let item = select.projection.first().ok_or_else(|| {
        SemanticError::InvalidFormula("formula did not produce an expression".into())
    })?;
    if select.projection.len() > 1 {
        return Err(SemanticError::InvalidFormula(
            "formula must be a single expression, not a list".into(),
        ));
    }

    match item {
        SelectItem::UnnamedExpr(e) | SelectItem::ExprWithAlias { expr: e, .. } => convert(e),
        _ => Err(SemanticError::InvalidFormula(
            "formula must not be a wildcard".into(),
        )),
    }
}

fn convert(expr: &SqlExpr) -> SemanticResult<Expr> {
    match expr {
        SqlExpr::Identifier(ident) => Ok(Expr::Column {
            table: None,
            column: ident.value.clone(),
        }),

        SqlExpr::CompoundIdentifier(parts) => match parts.as_slice() {
            [table, column] => Ok(Expr::Column {
                table: Some(table.value.clone()),
                column: column.value.clone(),
            }),
            [column] => Ok(Expr::Column {
                table: None,
                column: column.value.clone(),
            }),
            _ => Ok(Expr::Raw(expr.to_string())),
        },

        SqlExpr::Value(v) => convert_value(v),

        SqlExpr::BinaryOp { left, op, right } => {
            let op = convert_binary_op(op)?;
            Ok(Expr::BinaryOp {
                left: Box::new(convert(left)?),
                op,
                right: Box::new(convert(right)?),
            })
        }

        SqlExpr::UnaryOp { op, expr: inner } => match op {
            SqlUnaryOp::Plus => convert(inner),
            SqlUnaryOp::Minus => Ok(Expr::UnaryOp {
                op: UnaryOperator::Minus,
                expr: Box::new(convert(inner)?),
            }),
            SqlUnaryOp::Not => Ok(Expr::UnaryOp {
                op: UnaryOperator::Not,
                expr: Box::new(convert(inner)?),
            }),
            _ => Err(SemanticError::InvalidFormula(format!(
                "unsupported unary operator in formula: {}",
                expr
            ))),
        },

        SqlExpr::Nested(inner) => Ok(Expr::Paren(Box::new(convert(inner)?))),

        SqlExpr::Function(func) => {
            let name = func.name.to_string().to_uppercase();
            let (args, distinct) = match &func.args {
                FunctionArguments::List(list) => {
                    let distinct =
                        matches!(list.duplicate_treatment, Some(DuplicateTreatment::Distinct));
                    let mut args = Vec::with_capacity(list.args.len());
                    for arg in &list.args {
                        args.push(convert_function_arg(arg)?);
                    }
                    (args, distinct)
                }
                FunctionArguments::None => (Vec::new(), false),
                FunctionArguments::Subquery(_) => {
                    return Ok(Expr::Raw(expr.to_string()));
                }
            };
            Ok(Expr::Function {
                name,
                args,
                distinct,
            })
        }

        SqlExpr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            let operand = operand
                .as_ref()
                .map(|o| convert(o).map(Box::new))
                .transpose()?;
            let mut when_clauses = Vec::with_capacity(conditions.len());
            for (cond, res) in conditions.iter().zip(results.iter()) {
                when_clauses.push((convert(cond)?, convert(res)?));
            }
            let else_clause = else_result
                .as_ref()
                .map(|e| convert(e).map(Box::new))
                .transpose()?;
            Ok(Expr::Case {
                operand,
                when_clauses,
                else_clause,
            })
        }

        SqlExpr::Between {
            expr: inner,
            negated,
            low,
            high,
        } => Ok(Expr::Between {
            expr: Box::new(convert(inner)?),
            low: Box::new(convert(low)?),
            high: Box::new(convert(high)?),
            negated: *negated,
        }),

        SqlExpr::InList {
            expr: inner,
            list,
            negated,
        } => {
            let mut values = Vec::with_capacity(list.len());
            for v in list {
                values.push(convert(v)?);
            }
            Ok(Expr::In {
                expr: Box::new(convert(inner)?),
                values,
                negated: *negated,
            })
        }

        SqlExpr::IsNull(inner) => Ok(Expr::IsNull {
            expr: Box::new(convert(inner)?),
            negated: false,
        }),

        SqlExpr::IsNotNull(inner) => Ok(Expr::IsNull {
            expr: Box::new(convert(inner)?),
            negated: true,
        }),

        SqlExpr::Like {
            negated,
            expr: inner,
            pattern,
            escape_char,
            ..
        } => match escape_char {
            Some(c) => {
                let ch = c.chars().next().unwrap_or('\\');
                Ok(Expr::LikeEscape {
                    expr: Box::new(convert(inner)?),
                    pattern: Box::new(convert(pattern)?),
                    escape_char: ch,
                    negated: *negated,
                })
            }
            None => Ok(Expr::BinaryOp {
                left: Box::new(convert(inner)?),
                op: BinaryOperator::Like,
                right: Box::new(convert(pattern)?),
            }),
        },

        // CAST, EXTRACT, TRIM, POSITION, and other dialect-flavored forms
        // aren't worth a structural translation for a formula string; keep
        // the original text and let the synthesizer pass it through verbatim.
        other => Ok(Expr::Raw(other.to_string())),
    }
}

fn convert_function_arg(arg: &FunctionArg) -> SemanticResult<Expr> {
    let arg_expr = match arg {
        FunctionArg::Unnamed(e) | FunctionArg::Named { arg: e, .. } => e,
        FunctionArg::ExprNamed { arg: e, .. } => e,
    };
    match arg_expr {
        FunctionArgExpr::Expr(e) => convert(e),
        FunctionArgExpr::Wildcard => Ok(Expr::Star { table: None }),
        FunctionArgExpr::QualifiedWildcard(name) => Ok(Expr::Star {
            table: Some(name.to_string()),
        }),
    }
}

fn convert_value(value: &SqlValue) -> SemanticResult<Expr> {
    match value {
        SqlValue::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(Expr::Literal(Literal::Int(i)))
            } else {
                n.parse::<f64>()
                    .map(|f| Expr::Literal(Literal::Float(f)))
                    .map_err(|_| SemanticError::InvalidFormula(format!("invalid number: {}", n)))
            }
        }
        SqlValue::SingleQuotedString(s) | SqlValue::DoubleQuotedString(s) => {
            Ok(Expr::Literal(Literal::String(s.clone())))
        }
        SqlValue::Boolean(b) => Ok(Expr::Literal(Literal::Bool(*b))),
        SqlValue::Null => Ok(Expr::Literal(Literal::Null)),
        other => Err(SemanticError::InvalidFormula(format!(
            "unsupported literal in formula: {}",
            other
        ))),
    }
}

fn convert_binary_op(op: &SqlBinaryOp) -> SemanticResult<BinaryOperator> {
    match op {
        SqlBinaryOp::Plus => Ok(BinaryOperator::Plus),
        SqlBinaryOp::Minus => Ok(BinaryOperator::Minus),
        SqlBinaryOp::Multiply => Ok(BinaryOperator::Mul),
        SqlBinaryOp::Divide => Ok(BinaryOperator::Div),
        SqlBinaryOp::Modulo => Ok(BinaryOperator::Mod),
        SqlBinaryOp::StringConcat => Ok(BinaryOperator::Concat),
        SqlBinaryOp::Gt => Ok(BinaryOperator::Gt),
        SqlBinaryOp::Lt => Ok(BinaryOperator::Lt),
        SqlBinaryOp::GtEq => Ok(BinaryOperator::Gte),
        SqlBinaryOp::LtEq => Ok(BinaryOperator::Lte),
        SqlBinaryOp::Eq => Ok(BinaryOperator::Eq),
        SqlBinaryOp::NotEq => Ok(BinaryOperator::Ne),
        SqlBinaryOp::And => Ok(BinaryOperator::And),
        SqlBinaryOp::Or => Ok(BinaryOperator::Or),
        other => Err(SemanticError::InvalidFormula(format!(
            "unsupported operator in formula: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::dialect::Dialect;

    fn sql(formula: &str) -> String {
        parse_formula(formula)
            .unwrap()
            .to_tokens()
            .serialize(Dialect::Postgres)
    }

    #[test]
    fn test_simple_subtraction() {
        let e = parse_formula("revenue - cost").unwrap();
        assert_eq!(
            e,
            Expr::BinaryOp {
                left: Box::new(Expr::Column {
                    table: None,
                    column: "revenue".into()
                }),
                op: BinaryOperator::Minus,
                right: Box::new(Expr::Column {
                    table: None,
                    column: "cost".into()
                }),
            }
        );
    }

    #[test]
    fn test_aggregate_ratio() {
        let e = parse_formula("sum(revenue) / nullif(sum(quantity), 0)").unwrap();
        match e {
            Expr::BinaryOp { op, .. } => assert_eq!(op, BinaryOperator::Div),
            _ => panic!("expected binary op"),
        }
    }

    #[test]
    fn test_qualified_column() {
        let e = parse_formula("orders.amount").unwrap();
        assert_eq!(
            e,
            Expr::Column {
                table: Some("orders".into()),
                column: "amount".into()
            }
        );
    }

    #[test]
    fn test_case_expression() {
        assert!(sql("case when status = 'active' then 1 else 0 end").contains("CASE"));
    }

    #[test]
    fn test_count_distinct() {
        let e = parse_formula("count(distinct user_id)").unwrap();
        match e {
            Expr::Function { name, distinct, .. } => {
                assert_eq!(name, "COUNT");
                assert!(distinct);
            }
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn test_unclosed_paren_is_invalid() {
        assert!(parse_formula("sum(amount").is_err());
    }

    #[test]
    fn test_multiple_statements_rejected() {
        assert!(parse_formula("revenue; cost").is_err());
    }

    #[test]
    fn test_cast_falls_back_to_raw() {
        let e = parse_formula("cast(amount as decimal(10, 2))").unwrap();
        assert!(matches!(e, Expr::Raw(_)));
    }

    #[test]
    fn test_between() {
        let e = parse_formula("age between 18 and 65").unwrap();
        assert!(matches!(e, Expr::Between { .. }));
    }
}
