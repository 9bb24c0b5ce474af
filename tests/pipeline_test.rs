//! End-to-end pipeline tests: a full `Orchestrator` wired up against
//! in-memory stores and a stub execution backend, exercising the stage
//! wiring the per-module unit tests don't (real `run()` call, real
//! `SchemaProvider` introspection, real cache accounting).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use querymind::config::Driver;
use querymind::connection::{Connection, ConnectionRegistry, SchemaProvider};
use querymind::executor::backend::ExecutorBackend;
use querymind::executor::{ConnectionPool, Executor, ExecutorConfig, ResultCache};
use querymind::intent::{FixedCompleter, IntentExtractor};
use querymind::orchestrator::{OrchestrationRequest, Orchestrator, OrchestratorLimits};
use querymind::rls::{ActorContext, RlsFilter, RlsOperator, RlsStore};
use querymind::semantic::{Aggregation, FieldWrite, Format, SemanticStore};
use querymind::vector::{HashEmbedder, VectorStore};
use querymind::worker::protocol::{
    ColumnInfo, ExecuteQueryResponse, ForeignKeyInfo, QueryResultColumn, SchemaInfo,
    TableDetailInfo, TableInfo,
};
use querymind::worker::WorkerError;

fn column(name: &str, data_type: &str) -> ColumnInfo {
    ColumnInfo {
        name: name.into(),
        position: 1,
        data_type: data_type.into(),
        is_nullable: false,
        max_length: None,
        numeric_precision: None,
        numeric_scale: None,
        default_value: None,
        is_identity: false,
        is_computed: false,
    }
}

/// A fixed two-table schema (`sales` referencing `agents`) served without
/// touching a real driver process, the way the unit tests' `CountingProvider`
/// does but reachable from outside `#[cfg(test)]`.
struct FixedSchemaProvider {
    tables: HashMap<(String, String), TableDetailInfo>,
}

impl FixedSchemaProvider {
    fn sales_and_agents() -> Self {
        let sales = TableDetailInfo {
            schema: "public".into(),
            name: "sales".into(),
            table_type: "TABLE".into(),
            columns: vec![
                column("id", "integer"),
                column("agent_id", "integer"),
                column("amount", "numeric"),
                column("sale_date", "date"),
            ],
            primary_key: None,
            foreign_keys: vec![ForeignKeyInfo {
                name: "sales_agent_id_fkey".into(),
                columns: vec!["agent_id".into()],
                referenced_schema: "public".into(),
                referenced_table: "agents".into(),
                referenced_columns: vec!["id".into()],
                on_delete: None,
                on_update: None,
            }],
            unique_constraints: vec![],
        };
        let agents = TableDetailInfo {
            schema: "public".into(),
            name: "agents".into(),
            table_type: "TABLE".into(),
            columns: vec![column("id", "integer"), column("name", "text")],
            primary_key: None,
            foreign_keys: vec![],
            unique_constraints: vec![],
        };
        let mut tables = HashMap::new();
        tables.insert(("public".into(), "sales".into()), sales);
        tables.insert(("public".into(), "agents".into()), agents);
        Self { tables }
    }

    /// A single `companies` table, for the row-level-security scenario.
    fn companies() -> Self {
        let companies = TableDetailInfo {
            schema: "public".into(),
            name: "companies".into(),
            table_type: "TABLE".into(),
            columns: vec![column("id", "integer"), column("name", "text"), column("region", "text")],
            primary_key: None,
            foreign_keys: vec![],
            unique_constraints: vec![],
        };
        let mut tables = HashMap::new();
        tables.insert(("public".into(), "companies".into()), companies);
        Self { tables }
    }
}

#[async_trait]
impl SchemaProvider for FixedSchemaProvider {
    async fn list_schemas(&self) -> querymind::worker::WorkerResult<Vec<SchemaInfo>> {
        Ok(vec![SchemaInfo { name: "public".into(), is_default: true }])
    }

    async fn list_tables(&self, schema: &str) -> querymind::worker::WorkerResult<Vec<TableInfo>> {
        Ok(self
            .tables
            .values()
            .filter(|t| t.schema == schema)
            .map(|t| TableInfo { schema: t.schema.clone(), name: t.name.clone(), table_type: t.table_type.clone() })
            .collect())
    }

    async fn get_table(&self, schema: &str, table: &str) -> querymind::worker::WorkerResult<TableDetailInfo> {
        self.tables
            .get(&(schema.to_string(), table.to_string()))
            .cloned()
            .ok_or_else(|| WorkerError::remote("NOT_FOUND", format!("no such table {}.{}", schema, table)))
    }
}

/// Returns canned `ExecuteQueryResponse`s keyed by exact SQL text, counting
/// how many times each key was actually executed against the backend (not
/// served from cache).
struct FixedBackend {
    responses: HashMap<String, ExecuteQueryResponse>,
    calls: AtomicUsize,
}

impl FixedBackend {
    fn new(responses: HashMap<String, ExecuteQueryResponse>) -> Self {
        Self { responses, calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl ExecutorBackend for FixedBackend {
    async fn execute(
        &self,
        _driver: Driver,
        _connection_string: &str,
        sql: &str,
        _args: Vec<serde_json::Value>,
    ) -> querymind::executor::ExecutorResult<ExecuteQueryResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .iter()
            .find(|(key, _)| sql.contains(key.as_str()))
            .map(|(_, resp)| resp.clone())
            .ok_or_else(|| {
                querymind::executor::ExecutorError::from_worker_error(WorkerError::remote(
                    "NOT_STUBBED",
                    format!("no canned response matching: {sql}"),
                ))
            })
    }
}

fn sample_rows() -> ExecuteQueryResponse {
    ExecuteQueryResponse {
        columns: vec![
            QueryResultColumn { name: "agent".into(), data_type: "text".into() },
            QueryResultColumn { name: "revenue".into(), data_type: "numeric".into() },
        ],
        rows: vec![
            vec![serde_json::json!("Dana"), serde_json::json!(9000)],
            vec![serde_json::json!("Priya"), serde_json::json!(8200)],
        ],
        row_count: 2,
        rows_affected: None,
    }
}

async fn build_sales_orchestrator(
    responses: HashMap<String, ExecuteQueryResponse>,
) -> Orchestrator<FixedCompleter> {
    let semantic = Arc::new(SemanticStore::open_in_memory().unwrap());
    semantic
        .create_field(FieldWrite {
            connection_id: "conn1".into(),
            name: "revenue".into(),
            display_name: "Revenue".into(),
            description: None,
            data_type: "numeric".into(),
            table: Some("sales".into()),
            column: Some("amount".into()),
            formula: None,
            aggregation: Aggregation::Sum,
            format: Some(Format::Currency),
            synonyms: vec![],
            default_filters: vec![],
        })
        .unwrap();
    semantic
        .create_field(FieldWrite {
            connection_id: "conn1".into(),
            name: "agent".into(),
            display_name: "Agent".into(),
            description: None,
            data_type: "text".into(),
            table: Some("agents".into()),
            column: Some("name".into()),
            formula: None,
            aggregation: Aggregation::None,
            format: None,
            synonyms: vec![],
            default_filters: vec![],
        })
        .unwrap();
    semantic
        .create_field(FieldWrite {
            connection_id: "conn1".into(),
            name: "sale_date".into(),
            display_name: "Sale date".into(),
            description: None,
            data_type: "date".into(),
            table: Some("sales".into()),
            column: Some("sale_date".into()),
            formula: None,
            aggregation: Aggregation::None,
            format: Some(Format::Date),
            synonyms: vec![],
            default_filters: vec![],
        })
        .unwrap();

    let registry = Arc::new(ConnectionRegistry::open_in_memory(Duration::from_secs(300)).unwrap());
    registry.register("conn1", Driver::Postgres, "postgres://localhost/sales").unwrap();

    let rls = Arc::new(RlsStore::open_in_memory().unwrap());
    let actor = ActorContext { who: "admin1".into(), ip: None, agent: None };
    rls.set_roles(&actor, "alice", "conn1", vec!["analyst".into()], true).unwrap();

    let vector = Arc::new(VectorStore::open_in_memory(Box::new(HashEmbedder::new(64))).unwrap());

    let plan_json = serde_json::json!({
        "metric": "revenue",
        "dimensions": ["agent"],
        "time_range": "last_90_days",
        "order_by": [{"field": "revenue", "dir": "desc"}],
        "intent": "rank agents by revenue",
    })
    .to_string();
    let intent = Arc::new(IntentExtractor::new(FixedCompleter::ok(plan_json), Duration::from_secs(60)));

    let backend: Arc<dyn ExecutorBackend> = Arc::new(FixedBackend::new(responses));
    let executor = Arc::new(Executor::new(
        backend,
        ConnectionPool::new(4, Duration::from_secs(5)),
        ResultCache::new(Duration::from_secs(60)),
        ExecutorConfig::default(),
    ));

    let factory: Arc<querymind::orchestrator::SchemaProviderFactory> =
        Arc::new(|_conn: &Connection| Arc::new(FixedSchemaProvider::sales_and_agents()) as Arc<dyn SchemaProvider>);

    Orchestrator::new(semantic, registry, rls, vector, intent, executor, factory, OrchestratorLimits::default())
}

#[tokio::test]
async fn word_ordinal_question_resolves_to_limit_one_offset_one() {
    let mut responses = HashMap::new();
    responses.insert("sales".to_string(), sample_rows());
    let orchestrator = build_sales_orchestrator(responses).await;

    let request = OrchestrationRequest {
        question: "Second highest revenue agent".into(),
        connection_id: "conn1".into(),
        user_id: "alice".into(),
        pagination: None,
        enable_analytics: false,
        enable_caching: false,
        enable_rls: true,
        conversation: vec![],
        validation_level: querymind::sqlvalidate::ValidationLevel::Moderate,
    };

    let response = orchestrator.run("req-1".into(), request).await;

    assert!(response.success, "pipeline failed: {:?}", response.error);
    let plan = response.query_plan.expect("query plan present on success");
    assert_eq!(plan.limit, Some(1));
    assert_eq!(plan.offset, Some(1));

    let sql = response.sql.expect("rendered SQL present");
    assert!(sql.to_uppercase().contains("ORDER BY"));
    assert!(sql.to_uppercase().contains("DESC"));
    assert!(sql.to_uppercase().contains("LIMIT 1"));
    assert!(sql.to_uppercase().contains("OFFSET 1"));
}

#[tokio::test]
async fn rls_filter_bounds_region_without_leaking_literal_into_sql() {
    let semantic = Arc::new(SemanticStore::open_in_memory().unwrap());
    semantic
        .create_field(FieldWrite {
            connection_id: "conn1".into(),
            name: "company_count".into(),
            display_name: "Company count".into(),
            description: None,
            data_type: "integer".into(),
            table: Some("companies".into()),
            column: Some("id".into()),
            formula: None,
            aggregation: Aggregation::Count,
            format: Some(Format::Number),
            synonyms: vec![],
            default_filters: vec![],
        })
        .unwrap();

    let registry = Arc::new(ConnectionRegistry::open_in_memory(Duration::from_secs(300)).unwrap());
    registry.register("conn1", Driver::Postgres, "postgres://localhost/crm").unwrap();

    let rls = Arc::new(RlsStore::open_in_memory().unwrap());
    let actor = ActorContext { who: "admin1".into(), ip: None, agent: None };
    rls.set_roles(&actor, "bhanu", "conn1", vec!["sales_rep".into()], false).unwrap();
    rls.set_filter(
        &actor,
        "bhanu",
        "conn1",
        RlsFilter { table: "companies".into(), column: "region".into(), operator: RlsOperator::Eq, value: serde_json::json!("Region 1") },
    )
    .unwrap();

    let vector = Arc::new(VectorStore::open_in_memory(Box::new(HashEmbedder::new(64))).unwrap());

    let plan_json = serde_json::json!({
        "metric": "company_count",
        "dimensions": [],
        "intent": "count companies",
    })
    .to_string();
    let intent = Arc::new(IntentExtractor::new(FixedCompleter::ok(plan_json), Duration::from_secs(60)));

    let mut responses = HashMap::new();
    let mut count_response = sample_rows();
    count_response.columns = vec![QueryResultColumn { name: "company_count".into(), data_type: "integer".into() }];
    count_response.rows = vec![vec![serde_json::json!(3)]];
    count_response.row_count = 1;
    responses.insert("companies".to_string(), count_response);

    let backend: Arc<dyn ExecutorBackend> = Arc::new(FixedBackend::new(responses));
    let executor = Arc::new(Executor::new(
        backend,
        ConnectionPool::new(4, Duration::from_secs(5)),
        ResultCache::new(Duration::from_secs(60)),
        ExecutorConfig::default(),
    ));

    let factory: Arc<querymind::orchestrator::SchemaProviderFactory> =
        Arc::new(|_conn: &Connection| Arc::new(FixedSchemaProvider::companies()) as Arc<dyn SchemaProvider>);

    let orchestrator =
        Orchestrator::new(semantic, registry, rls, vector, intent, executor, factory, OrchestratorLimits::default());

    let request = OrchestrationRequest {
        question: "How many companies do we have".into(),
        connection_id: "conn1".into(),
        user_id: "bhanu".into(),
        pagination: None,
        enable_analytics: false,
        enable_caching: false,
        enable_rls: true,
        conversation: vec![],
        validation_level: querymind::sqlvalidate::ValidationLevel::Moderate,
    };

    let response = orchestrator.run("req-2".into(), request).await;

    assert!(response.success, "pipeline failed: {:?}", response.error);
    let sql = response.sql.expect("rendered SQL present");
    assert!(sql.contains('$'), "RLS predicate should bind through a placeholder: {sql}");
    assert!(!sql.contains("Region 1"), "RLS filter value leaked into rendered SQL: {sql}");
}

#[tokio::test]
async fn repeated_identical_request_is_served_from_cache() {
    let mut responses = HashMap::new();
    responses.insert("sales".to_string(), sample_rows());
    let orchestrator = build_sales_orchestrator(responses).await;

    let request = OrchestrationRequest {
        question: "Second highest revenue agent".into(),
        connection_id: "conn1".into(),
        user_id: "alice".into(),
        pagination: None,
        enable_analytics: false,
        enable_caching: true,
        enable_rls: true,
        conversation: vec![],
        validation_level: querymind::sqlvalidate::ValidationLevel::Moderate,
    };

    let first = orchestrator.run("req-3".into(), request.clone()).await;
    assert!(first.success, "first run failed: {:?}", first.error);
    assert!(!first.performance.plan_cached);
    assert!(!first.performance.result_cached);

    let second = orchestrator.run("req-4".into(), request).await;
    assert!(second.success, "second run failed: {:?}", second.error);
    assert!(second.performance.plan_cached);
    assert!(second.performance.result_cached);
}
