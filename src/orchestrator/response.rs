//! Outbound orchestration response shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analytics::AnalyticsReport;
use crate::intent::plan::QueryPlan;

use super::error::StageError;

pub type Row = BTreeMap<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationResponse {
    pub page: u32,
    pub page_size: u32,
    pub total_rows: i64,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub total_ms: u64,
    pub stage_timings_ms: BTreeMap<String, u64>,
    pub plan_cached: bool,
    pub result_cached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResponse {
    pub success: bool,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_plan: Option<QueryPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    pub results: Vec<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics: Option<AnalyticsReport>,
    pub performance: PerformanceReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
}

impl OrchestrationResponse {
    pub fn failure(request_id: String, error: StageError, performance: PerformanceReport) -> Self {
        Self {
            success: false,
            request_id,
            query_plan: None,
            sql: None,
            results: Vec::new(),
            pagination: None,
            analytics: None,
            performance,
            error: Some(error),
        }
    }
}
