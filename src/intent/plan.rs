//! `QueryPlan`: the intermediate representation between a natural-language
//! question and synthesized SQL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named, pre-defined period ("last_quarter", "last_90_days", ...) or an
/// explicit UTC half-open interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeRange {
    Named(String),
    Explicit { start: DateTime<Utc>, end: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeGrain {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Like,
    NotLike,
    IsNull,
    IsNotNull,
}

/// A filter on a semantic field name (metric or dimension), applied before
/// synthesis resolves it to a physical column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFilter {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// An ordering request on a named metric or dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub dir: SortDir,
}

/// The intermediate representation an LLM (via `Completer`) is asked to
/// produce, and that the plan validator (C6) and SQL synthesizer (C7)
/// consume. Strict JSON contract: unknown keys are rejected so a
/// hallucinated field never silently passes through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryPlan {
    /// `None` with `needs_clarification=true` means the metric itself
    /// couldn't be resolved.
    pub metric: Option<String>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_grain: Option<TimeGrain>,
    #[serde(default)]
    pub filters: Vec<PlanFilter>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    pub intent: String,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub needs_clarification: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification_question: Option<String>,
}

impl QueryPlan {
    /// A plan that asks the user to disambiguate rather than attempting
    /// synthesis. Per the `QueryPlan` invariant, no SQL synthesis may be
    /// attempted against a plan with `needs_clarification=true`.
    pub fn needs_clarification(intent: &str, question: &str) -> Self {
        Self {
            metric: None,
            dimensions: Vec::new(),
            time_range: None,
            time_grain: None,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            intent: intent.to_string(),
            assumptions: Vec::new(),
            needs_clarification: true,
            clarification_question: Some(question.to_string()),
        }
    }
}

/// The full output of intent extraction (C5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub query_plan: QueryPlan,
    pub confidence: f64,
    pub entities_found: Vec<String>,
    /// The metric token as the LLM/ordinal/disambiguation rules left it,
    /// before `resolve_metric` rewrote `query_plan.metric` to the matched
    /// field's canonical name. `None` when no metric was ever proposed.
    /// Compared against the resolved name by the orchestrator's learning
    /// hook to decide whether a synonym was used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_metric: Option<String>,
    /// Set when the plan was served from the plan cache rather than freshly
    /// extracted.
    #[serde(default)]
    pub plan_cached: bool,
}

/// One turn of prior conversation, oldest-first. The extractor only ever
/// sees the most recent `MAX_HISTORY_TURNS` of these.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub question: String,
    pub answer_summary: Option<String>,
}

pub const MAX_HISTORY_TURNS: usize = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_rejects_unknown_keys() {
        let json = r#"{"metric":"revenue","intent":"top customers","bogus_field":true}"#;
        let result: Result<QueryPlan, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_plan_minimal_defaults() {
        let json = r#"{"metric":"revenue","intent":"total revenue"}"#;
        let plan: QueryPlan = serde_json::from_str(json).unwrap();
        assert!(plan.dimensions.is_empty());
        assert!(!plan.needs_clarification);
    }

    #[test]
    fn test_named_time_range_round_trips() {
        let plan = QueryPlan {
            time_range: Some(TimeRange::Named("last_quarter".into())),
            ..QueryPlan::needs_clarification("x", "y")
        };
        let json = serde_json::to_string(&plan).unwrap();
        let back: QueryPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back.time_range, Some(TimeRange::Named("last_quarter".into())));
    }
}
