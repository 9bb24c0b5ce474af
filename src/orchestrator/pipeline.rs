//! C12: drives a single request through the ten stages in `spec.md` order,
//! timing each one and turning any non-recoverable failure into a typed,
//! stage-tagged `StageError` rather than a panic or a bare `Err`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Value};

use crate::analytics::{self, AnalyticsColumn, AnalyticsReport};
use crate::connection::{Connection, ConnectionRegistry, SchemaProvider, SchemaSnapshot};
use crate::executor::{Executor, ExecutorError};
use crate::intent::{Completer, ConversationTurn, ExtractionOutput, IntentExtractor, QueryPlan};
use crate::planvalidate;
use crate::planvalidate::ValidationError;
use crate::rls::{self, RlsError, RlsStore, UserContext};
use crate::semantic::{FieldWrite, SemanticStore};
use crate::sqlgen::{self, SynthesisError};
use crate::sqlvalidate::{self, ValidationLevel, ValidationReport};
use crate::vector::VectorStore;
use crate::worker::protocol::{ExecuteQueryResponse, ForeignKeyInfo};

use super::error::{ErrorKind, StageError};
use super::request::OrchestrationRequest;
use super::response::{OrchestrationResponse, PaginationResponse, PerformanceReport, Row};

/// Applied when a plan carries no explicit `limit`.
pub const DEFAULT_SYNTHESIS_LIMIT: u64 = 1_000;
/// Transient executor errors (`UNAVAILABLE`) are retried at most this many
/// times before the pipeline gives up.
const MAX_EXECUTOR_RETRIES: u32 = 2;
/// Confidence a same-name (case-insensitive) metric match always returns;
/// anything lower means `resolve_metric` took a synonym or fuzzy-search
/// path, i.e. the user's token differed textually from the canonical name.
const EXACT_MATCH_CONFIDENCE: f64 = 1.0;

type StageResult<T> = Result<T, StageError>;

/// Builds a `SchemaProvider` for a registered connection. Injected rather
/// than hardcoded so tests can swap in a stub without a driver process.
pub type SchemaProviderFactory = dyn Fn(&Connection) -> Arc<dyn SchemaProvider> + Send + Sync;

/// Row-limit/timeout knobs that aren't part of any one component's own
/// config (`config::settings::LimitSettings` carries the same numbers for
/// the on-disk config file; the orchestrator is handed the resolved values).
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorLimits {
    pub max_row_limit: u64,
    pub default_synthesis_limit: u64,
}

impl Default for OrchestratorLimits {
    fn default() -> Self {
        Self { max_row_limit: 10_000, default_synthesis_limit: DEFAULT_SYNTHESIS_LIMIT }
    }
}

/// Everything one request's run through the pipeline needs: the governed
/// stores (C1-C4), the intent extractor (C5), and the executor (C10). C6-C9
/// and C11 are pure functions called directly from `run`.
pub struct Orchestrator<C: Completer> {
    semantic: Arc<SemanticStore>,
    connections: Arc<ConnectionRegistry>,
    rls: Arc<RlsStore>,
    vector: Arc<VectorStore>,
    intent: Arc<IntentExtractor<C>>,
    executor: Arc<Executor>,
    schema_provider_factory: Arc<SchemaProviderFactory>,
    limits: OrchestratorLimits,
}

impl<C: Completer> Orchestrator<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        semantic: Arc<SemanticStore>,
        connections: Arc<ConnectionRegistry>,
        rls: Arc<RlsStore>,
        vector: Arc<VectorStore>,
        intent: Arc<IntentExtractor<C>>,
        executor: Arc<Executor>,
        schema_provider_factory: Arc<SchemaProviderFactory>,
        limits: OrchestratorLimits,
    ) -> Self {
        Self { semantic, connections, rls, vector, intent, executor, schema_provider_factory, limits }
    }

    /// Run the full pipeline. Infallible at this boundary: every internal
    /// failure becomes a `success: false` response carrying a typed error
    /// rather than propagating out as a `Result::Err`.
    pub async fn run(&self, request_id: String, request: OrchestrationRequest) -> OrchestrationResponse {
        let started = Instant::now();
        let mut timings = BTreeMap::new();

        match self.run_inner(&request, &mut timings).await {
            Ok(mut response) => {
                response.request_id = request_id;
                response.performance.total_ms = started.elapsed().as_millis() as u64;
                response.performance.stage_timings_ms = timings;
                response
            }
            Err(error) => {
                let performance = PerformanceReport {
                    total_ms: started.elapsed().as_millis() as u64,
                    stage_timings_ms: timings,
                    plan_cached: false,
                    result_cached: false,
                };
                OrchestrationResponse::failure(request_id, error, performance)
            }
        }
    }

    async fn run_inner(
        &self,
        request: &OrchestrationRequest,
        timings: &mut BTreeMap<String, u64>,
    ) -> StageResult<OrchestrationResponse> {
        let user_ctx = self
            .rls
            .load_user_context(&request.user_id, &request.connection_id)
            .map_err(|e| StageError::new(ErrorKind::AuthError, "semantic_context", e.to_string()))?;

        let (connection, snapshot, semantic) =
            timed(timings, "semantic_context", self.stage_semantic_context(&request.connection_id)).await?;

        let history: Vec<ConversationTurn> = request
            .conversation
            .iter()
            .map(|q| ConversationTurn { question: q.clone(), answer_summary: None })
            .collect();

        let extraction = timed(
            timings,
            "query_planning",
            self.stage_query_planning(request, &semantic, &user_ctx, &history),
        )
        .await?;

        let plan_cached = extraction.plan_cached;
        let plan = extraction.query_plan;

        if plan.needs_clarification {
            return Ok(OrchestrationResponse {
                success: true,
                request_id: String::new(),
                query_plan: Some(plan),
                sql: None,
                results: Vec::new(),
                pagination: None,
                analytics: None,
                performance: PerformanceReport { plan_cached, ..Default::default() },
                error: None,
            });
        }

        let validated_plan =
            timed(timings, "plan_validation", async { self.stage_plan_validation(&plan, &semantic) }).await?;

        let dialect = connection.driver.sql_dialect();
        let synthesized = timed(
            timings,
            "sql_generation",
            async { self.stage_sql_generation(&validated_plan, &semantic, dialect) },
        )
        .await?;

        let pre_rls_sql = synthesized.query.to_sql(dialect);
        timed(
            timings,
            "sql_validation",
            async {
                self.stage_sql_validation(
                    &pre_rls_sql,
                    request.validation_level,
                    Some(&snapshot),
                    "sql_validation",
                )
            },
        )
        .await?;

        let rls_application = timed(
            timings,
            "rls_injection",
            async {
                rls::apply_with_offset(synthesized.query, &user_ctx, request.enable_rls, synthesized.bound_values.len() + 1)
                    .map_err(|e| map_rls_error(e))
            },
        )
        .await?;

        let mut bound_values = synthesized.bound_values;
        bound_values.extend(rls_application.bound_values);
        let final_sql = rls_application.query.to_sql(dialect);

        timed(
            timings,
            "sql_validation_post",
            async {
                self.stage_sql_validation(&final_sql, request.validation_level, Some(&snapshot), "sql_validation_post")
            },
        )
        .await?;

        let user_context_digest = user_context_digest(&user_ctx);
        let outcome = timed(
            timings,
            "query_execution",
            self.stage_query_execution(
                &connection,
                &final_sql,
                bound_values,
                &user_context_digest,
                semantic.version,
                request.enable_caching,
            ),
        )
        .await?;

        let result_cached = outcome.from_cache;

        self.learning_hook(&request.connection_id, &validated_plan, &extraction.raw_metric);

        let analytics_report =
            timed(timings, "analytics", async { Ok(self.stage_analytics(request, &outcome.response)) }).await?;

        let pagination_request = request.pagination.clone().unwrap_or_default();
        let (results, pagination) = timed(
            timings,
            "pagination",
            async { Ok(paginate(&outcome.response, outcome.total_row_count_before_truncation, &pagination_request)) },
        )
        .await?;

        Ok(OrchestrationResponse {
            success: true,
            request_id: String::new(),
            query_plan: Some(validated_plan),
            sql: Some(final_sql),
            results,
            pagination: Some(pagination),
            analytics: analytics_report,
            performance: PerformanceReport { plan_cached, result_cached, ..Default::default() },
            error: None,
        })
    }

    /// Stage 1: `semantic_context`. Loads the connection's schema snapshot
    /// (C3, TTL-cached) and resolves the active semantic layer (C1) against
    /// its declared foreign keys.
    #[tracing::instrument(skip(self))]
    async fn stage_semantic_context(
        &self,
        connection_id: &str,
    ) -> StageResult<(Connection, SchemaSnapshot, crate::semantic::SemanticContext)> {
        let connection = self
            .connections
            .get(connection_id)
            .map_err(|e| StageError::new(ErrorKind::UnknownError, "semantic_context", e.to_string()))?;

        let provider = (self.schema_provider_factory)(&connection);
        let snapshot = self
            .connections
            .introspect(connection_id, &provider)
            .await
            .map_err(|e| StageError::new(ErrorKind::UnknownError, "semantic_context", e.to_string()))?;

        let foreign_keys = collect_foreign_keys(&snapshot);
        let semantic = self
            .semantic
            .resolve(connection_id, &foreign_keys)
            .map_err(|e| StageError::new(ErrorKind::UnknownError, "semantic_context", e.to_string()))?;

        Ok((connection, snapshot, semantic))
    }

    /// Stage 2: `query_planning` (C5). Pulls learned synonyms from the
    /// vector store (a miss here is non-fatal, the extractor falls back to
    /// direct name matching and semantic search) and extracts a plan.
    #[tracing::instrument(skip(self, request, semantic, user_ctx, history))]
    async fn stage_query_planning(
        &self,
        request: &OrchestrationRequest,
        semantic: &crate::semantic::SemanticContext,
        user_ctx: &UserContext,
        history: &[ConversationTurn],
    ) -> StageResult<ExtractionOutput> {
        let synonyms = self.vector.get_synonyms(&request.connection_id).unwrap_or_default();

        self.intent
            .extract(
                &request.question,
                &request.connection_id,
                user_ctx,
                history,
                semantic,
                &synonyms,
                Some(self.vector.as_ref()),
                request.enable_caching,
            )
            .await
            .map_err(|e| StageError::new(ErrorKind::LlmError, "query_planning", e.to_string()))
    }

    /// Stage 3: `plan_validation` (C6).
    fn stage_plan_validation(
        &self,
        plan: &QueryPlan,
        semantic: &crate::semantic::SemanticContext,
    ) -> StageResult<QueryPlan> {
        planvalidate::validate(plan, semantic, self.limits.max_row_limit, Utc::now()).map_err(|e| {
            let missing_names = match &e {
                ValidationError::UnknownMetric(name)
                | ValidationError::UnknownDimension(name)
                | ValidationError::UnknownNamedPeriod(name) => vec![name.clone()],
                _ => Vec::new(),
            };
            StageError::new(ErrorKind::PlanError, "plan_validation", e.to_string())
                .with_debug(json!({ "plan": plan, "missing_names": missing_names }))
        })
    }

    /// Stage 4: `sql_generation` (C7).
    fn stage_sql_generation(
        &self,
        plan: &QueryPlan,
        semantic: &crate::semantic::SemanticContext,
        dialect: crate::sql::Dialect,
    ) -> StageResult<sqlgen::SynthesizedQuery> {
        sqlgen::synthesize(plan, semantic, dialect, self.limits.default_synthesis_limit)
            .map_err(|e| map_synthesis_error(e))
    }

    /// Stages 5 and 7: `sql_validation` (pre-RLS) and `sql_validation_post`
    /// (post-RLS, C8 run again). A post-RLS failure is the synthesizer or
    /// RLS engine emitting something the validator itself would have
    /// rejected pre-RLS. It's logged critical, since it means a governance gap
    /// slipped through rather than a user-facing input problem.
    fn stage_sql_validation(
        &self,
        sql: &str,
        level: ValidationLevel,
        snapshot: Option<&SchemaSnapshot>,
        stage: &'static str,
    ) -> StageResult<ValidationReport> {
        let report = sqlvalidate::validate(sql, level, snapshot, self.limits.max_row_limit, true);
        if !report.ok {
            if stage == "sql_validation_post" {
                tracing::error!(sql = %sql, errors = ?report.errors, "post-RLS SQL failed governance validation");
            }
            return Err(StageError::new(ErrorKind::ValidationError, stage, "synthesized SQL failed validation")
                .with_debug(json!({ "errors": report.errors, "warnings": report.warnings })));
        }
        Ok(report)
    }

    /// Stage 8: `query_execution` (C10). Transient `UNAVAILABLE` failures
    /// are retried with exponential backoff; every other failure (timeout,
    /// permission, syntax) short-circuits immediately.
    #[allow(clippy::too_many_arguments)]
    async fn stage_query_execution(
        &self,
        connection: &Connection,
        sql: &str,
        params: Vec<Value>,
        user_context_digest: &str,
        semantic_version: u64,
        use_cache: bool,
    ) -> StageResult<crate::executor::ExecutionOutcome> {
        let mut attempt = 0;
        loop {
            let result = self
                .executor
                .run(
                    &connection.connection_id,
                    connection.driver,
                    connection.credential.connection_string(),
                    sql,
                    params.clone(),
                    user_context_digest,
                    semantic_version,
                    use_cache,
                )
                .await;

            match result {
                Ok(outcome) => return Ok(outcome),
                Err(ExecutorError::Unavailable(_)) if attempt < MAX_EXECUTOR_RETRIES => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
                }
                Err(e) => return Err(map_executor_error(e)),
            }
        }
    }

    /// Stage 9: `analytics` (C11). Demoted to a warning per the error
    /// handling policy: a failure here never short-circuits the pipeline,
    /// it just leaves `analytics: None` in the response.
    fn stage_analytics(&self, request: &OrchestrationRequest, response: &ExecuteQueryResponse) -> Option<AnalyticsReport> {
        if !request.enable_analytics {
            return None;
        }
        let columns: Vec<AnalyticsColumn> = response
            .columns
            .iter()
            .enumerate()
            .map(|(index, c)| AnalyticsColumn { name: c.name.clone(), data_type: c.data_type.clone(), index })
            .collect();

        match analytics::analyze(&columns, &response.rows) {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!(error = %e, "analytics pass failed, demoting to warning");
                None
            }
        }
    }

    /// Learning hook: a metric resolved via synonym/fuzzy match (confidence
    /// below the exact-name-match baseline) means the user's token differed
    /// textually from the canonical field name. Records the mapping in the
    /// vector store (C2) and appends the term to the field's own synonym
    /// list (C1) if it isn't there already. `update_field` unconditionally
    /// bumps `semantic_version`, so this only fires on a genuinely new term
    /// rather than on every repeat hit.
    fn learning_hook(&self, connection_id: &str, plan: &QueryPlan, raw_metric: &Option<String>) {
        let (Some(metric), Some(raw)) = (&plan.metric, raw_metric) else { return };
        if raw.eq_ignore_ascii_case(metric) {
            return;
        }

        if let Err(e) = self.vector.record_synonym(connection_id, raw, metric, EXACT_MATCH_CONFIDENCE) {
            tracing::warn!(error = %e, "failed to record learned synonym");
            return;
        }

        let field = match self.semantic.get_field(connection_id, metric) {
            Ok(field) => field,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load field for usage-frequency update");
                return;
            }
        };

        if field.synonyms.iter().any(|s| s.eq_ignore_ascii_case(raw)) {
            return;
        }

        let mut synonyms = field.synonyms.clone();
        synonyms.push(raw.clone());
        let write = FieldWrite {
            connection_id: connection_id.to_string(),
            name: field.name.clone(),
            display_name: field.display_name.clone(),
            description: field.description.clone(),
            data_type: field.data_type.clone(),
            table: field.table.clone(),
            column: field.column.clone(),
            formula: field.formula.clone(),
            aggregation: field.aggregation,
            format: field.format,
            synonyms,
            default_filters: field.default_filters.clone(),
        };
        if let Err(e) = self.semantic.update_field(connection_id, metric, write) {
            tracing::warn!(error = %e, "failed to record synonym on semantic field");
        }
    }
}

/// Stage 10: `pagination`. Windows `[offset, offset+page_size)` over the
/// (possibly executor-truncated) rows. A free function, not a method: it
/// only ever touches its arguments, never the orchestrator's own state.
fn paginate(
    response: &ExecuteQueryResponse,
    total_row_count_before_truncation: i32,
    pagination: &super::request::PaginationRequest,
) -> (Vec<Row>, PaginationResponse) {
    let page = pagination.page.max(1);
    let page_size = pagination.page_size.max(1);
    let offset = (page as usize - 1) * page_size as usize;

    let results: Vec<Row> = response
        .rows
        .iter()
        .skip(offset)
        .take(page_size as usize)
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(i, value)| {
                    let name = response.columns.get(i).map(|c| c.name.clone()).unwrap_or_else(|| i.to_string());
                    (name, value.clone())
                })
                .collect()
        })
        .collect();

    let total_rows = total_row_count_before_truncation.max(response.rows.len() as i32) as i64;
    let has_more = (offset + results.len()) < total_rows as usize;

    (results, PaginationResponse { page, page_size, total_rows, has_more })
}

/// Runs `fut`, recording its wall-clock duration under `stage` in `timings`
/// regardless of outcome.
async fn timed<T, F: std::future::Future<Output = StageResult<T>>>(
    timings: &mut BTreeMap<String, u64>,
    stage: &str,
    fut: F,
) -> StageResult<T> {
    let start = Instant::now();
    let result = fut.await;
    timings.insert(stage.to_string(), start.elapsed().as_millis() as u64);
    result
}

/// Digest folding in every RLS-relevant fact about the requesting user, so
/// the result cache never aliases rows across different row-level-security
/// scopes. Computed fresh per request rather than stored on `UserContext`.
fn user_context_digest(ctx: &UserContext) -> String {
    #[derive(serde::Serialize)]
    struct Digest<'a> {
        is_admin: bool,
        roles: &'a [String],
        rls_filters: &'a [crate::rls::RlsFilter],
        table_permissions: &'a [crate::rls::TablePermission],
    }
    crate::cache::compute_hash(&Digest {
        is_admin: ctx.is_admin,
        roles: &ctx.roles,
        rls_filters: &ctx.rls_filters,
        table_permissions: &ctx.table_permissions,
    })
    .unwrap_or_else(|_| "unhashable-user-context".to_string())
}

/// `SchemaSnapshot::tables` is already keyed `"{schema}.{table}"`, matching
/// `semantic::join_graph`'s table-key convention directly.
fn collect_foreign_keys(snapshot: &SchemaSnapshot) -> HashMap<String, Vec<ForeignKeyInfo>> {
    snapshot.tables.iter().map(|(key, table)| (key.clone(), table.foreign_keys.clone())).collect()
}

fn map_synthesis_error(e: SynthesisError) -> StageError {
    StageError::new(ErrorKind::SqlGenerationError, "sql_generation", e.to_string())
}

fn map_rls_error(e: RlsError) -> StageError {
    let kind = match e {
        RlsError::ForbiddenTable(_) => ErrorKind::AuthError,
        RlsError::UnresolvedScope(_) => ErrorKind::AuthError,
        RlsError::InvalidFilterValue { .. } => ErrorKind::ValidationError,
        RlsError::Storage(_) | RlsError::Serialization(_) => ErrorKind::UnknownError,
    };
    StageError::new(kind, "rls_injection", e.to_string())
}

fn map_executor_error(e: ExecutorError) -> StageError {
    let kind = match e.code() {
        "PERMISSION_DENIED" => ErrorKind::AuthError,
        "SYNTAX_ERROR" => ErrorKind::ValidationError,
        _ => ErrorKind::ExecutionError,
    };
    StageError::new(kind, "query_execution", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::protocol::{QueryResultColumn, TableDetailInfo};

    #[test]
    fn test_map_executor_error_kinds() {
        assert_eq!(
            map_executor_error(ExecutorError::PermissionDenied("no".into())).kind,
            ErrorKind::AuthError
        );
        assert_eq!(
            map_executor_error(ExecutorError::SyntaxError("bad".into())).kind,
            ErrorKind::ValidationError
        );
        assert_eq!(
            map_executor_error(ExecutorError::Unavailable("down".into())).kind,
            ErrorKind::ExecutionError
        );
        assert_eq!(map_executor_error(ExecutorError::Timeout(30)).kind, ErrorKind::ExecutionError);
    }

    #[test]
    fn test_map_rls_error_kinds() {
        assert_eq!(map_rls_error(RlsError::ForbiddenTable("orders".into())).kind, ErrorKind::AuthError);
        assert_eq!(
            map_rls_error(RlsError::InvalidFilterValue {
                table: "orders".into(),
                column: "region".into(),
                reason: "not a string".into(),
            })
            .kind,
            ErrorKind::ValidationError
        );
    }

    #[test]
    fn test_map_rls_error_preserves_stage() {
        let err = map_rls_error(RlsError::UnresolvedScope("orders".into()));
        assert_eq!(err.stage, "rls_injection");
    }

    #[test]
    fn test_collect_foreign_keys_preserves_snapshot_keys() {
        let mut snapshot = SchemaSnapshot::default();
        snapshot.tables.insert(
            "public.orders".to_string(),
            TableDetailInfo {
                schema: "public".to_string(),
                name: "orders".to_string(),
                table_type: "table".to_string(),
                columns: Vec::new(),
                primary_key: None,
                foreign_keys: vec![],
                unique_constraints: Vec::new(),
            },
        );
        let fks = collect_foreign_keys(&snapshot);
        assert!(fks.contains_key("public.orders"));
    }

    fn response_with_rows(n: usize) -> ExecuteQueryResponse {
        ExecuteQueryResponse {
            columns: vec![QueryResultColumn { name: "id".to_string(), data_type: "int".to_string() }],
            rows: (0..n).map(|i| vec![Value::from(i as i64)]).collect(),
            row_count: n as i32,
            rows_affected: None,
        }
    }

    #[test]
    fn test_pagination_windows_second_page() {
        let response = response_with_rows(25);
        let request = super::super::request::PaginationRequest { page: 2, page_size: 10 };
        let (rows, pagination) = paginate(&response, 25, &request);
        assert_eq!(rows.len(), 10);
        assert_eq!(rows[0]["id"], Value::from(10));
        assert_eq!(pagination.total_rows, 25);
        assert!(pagination.has_more);
    }

    #[test]
    fn test_pagination_last_page_has_no_more() {
        let response = response_with_rows(25);
        let request = super::super::request::PaginationRequest { page: 3, page_size: 10 };
        let (rows, pagination) = paginate(&response, 25, &request);
        assert_eq!(rows.len(), 5);
        assert!(!pagination.has_more);
    }
}
