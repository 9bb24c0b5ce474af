//! Query execution over a pooled, cached backend connection (C10).
//!
//! - `backend`: `ExecutorBackend` trait + `ProcessBackend`, generalizing
//!   `worker::WorkerClient`'s NDJSON-over-stdio design to one process per
//!   dialect driver.
//! - `pool`: per-`connection_id` semaphore bounding concurrent statements.
//! - `cache`: TTL result cache keyed by `(dialect, sql, params,
//!   user_context_digest, semantic_version)`.
//!
//! `Executor::run` enforces a statement timeout and a hard row cap,
//! truncating (never erroring) when a result exceeds the cap.

pub mod backend;
pub mod cache;
pub mod error;
pub mod pool;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::Driver;
use crate::worker::protocol::ExecuteQueryResponse;

pub use backend::{ExecutorBackend, ProcessBackend};
pub use cache::{result_cache_key, ResultCache};
pub use error::{ExecutorError, ExecutorResult};
pub use pool::ConnectionPool;

/// Default statement timeout, matching `worker::client::DEFAULT_TIMEOUT_SECS`.
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 30;

/// Hard ceiling on rows returned from a single execution. Results beyond
/// this are truncated, not rejected. `ExecutionOutcome::truncated` tells
/// the caller so pagination/analytics can account for it.
pub const DEFAULT_MAX_ROWS: usize = 10_000;

/// Everything about one run that the orchestrator's execution stage needs:
/// the (possibly truncated) rows, whether the result came from cache, and
/// whether truncation happened.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub response: ExecuteQueryResponse,
    pub from_cache: bool,
    pub truncated: bool,
    pub total_row_count_before_truncation: i32,
}

pub struct ExecutorConfig {
    pub statement_timeout: Duration,
    pub max_rows: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            statement_timeout: Duration::from_secs(DEFAULT_STATEMENT_TIMEOUT_SECS),
            max_rows: DEFAULT_MAX_ROWS,
        }
    }
}

pub struct Executor {
    backend: Arc<dyn ExecutorBackend>,
    pool: ConnectionPool,
    cache: ResultCache,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(backend: Arc<dyn ExecutorBackend>, pool: ConnectionPool, cache: ResultCache, config: ExecutorConfig) -> Self {
        Self { backend, pool, cache, config }
    }

    /// Run `sql` with bound `params` against `connection_id`, serving from
    /// the result cache when `user_context_digest`/`semantic_version` line
    /// up with a prior, still-fresh execution of the identical SQL.
    /// `use_cache = false` (the request's `enable_caching: false`) skips
    /// both the lookup and the post-run insert.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        connection_id: &str,
        driver: Driver,
        connection_string: &str,
        sql: &str,
        params: Vec<Value>,
        user_context_digest: &str,
        semantic_version: u64,
        use_cache: bool,
    ) -> ExecutorResult<ExecutionOutcome> {
        let key = result_cache_key(driver.as_str(), sql, &params, user_context_digest, semantic_version)
            .map_err(|e| ExecutorError::Unavailable(format!("failed to hash cache key: {e}")))?;

        if use_cache {
            if let Some(response) = self.cache.get(&key) {
                return Ok(self.finish(response, true));
            }
        }

        let _permit = self.pool.acquire(connection_id).await?;

        let response = tokio::time::timeout(
            self.config.statement_timeout,
            self.backend.execute(driver, connection_string, sql, params),
        )
        .await
        .map_err(|_| ExecutorError::Timeout(self.config.statement_timeout.as_secs()))??;

        if use_cache {
            self.cache.insert(key, response.clone());
        }
        Ok(self.finish(response, false))
    }

    fn finish(&self, mut response: ExecuteQueryResponse, from_cache: bool) -> ExecutionOutcome {
        let total_row_count_before_truncation = response.row_count;
        let truncated = response.rows.len() > self.config.max_rows;
        if truncated {
            response.rows.truncate(self.config.max_rows);
            response.row_count = self.config.max_rows as i32;
        }
        ExecutionOutcome {
            response,
            from_cache,
            truncated,
            total_row_count_before_truncation,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::backend::StubBackend;
    use super::*;
    use crate::worker::protocol::QueryResultColumn;

    fn executor_with(responses: HashMap<String, ExecuteQueryResponse>) -> Executor {
        Executor::new(
            Arc::new(StubBackend { responses }),
            ConnectionPool::default(),
            ResultCache::new(Duration::from_secs(60)),
            ExecutorConfig::default(),
        )
    }

    fn response(rows: Vec<Vec<Value>>) -> ExecuteQueryResponse {
        let row_count = rows.len() as i32;
        ExecuteQueryResponse {
            columns: vec![QueryResultColumn { name: "id".to_string(), data_type: "int".to_string() }],
            rows,
            row_count,
            rows_affected: None,
        }
    }

    #[tokio::test]
    async fn test_run_executes_and_caches() {
        let mut responses = HashMap::new();
        responses.insert("SELECT 1".to_string(), response(vec![vec![Value::from(1)]]));
        let executor = executor_with(responses);

        let first = executor
            .run("conn-1", Driver::Postgres, "postgres://x", "SELECT 1", vec![], "digest", 1, true)
            .await
            .unwrap();
        assert!(!first.from_cache);

        let second = executor
            .run("conn-1", Driver::Postgres, "postgres://x", "SELECT 1", vec![], "digest", 1, true)
            .await
            .unwrap();
        assert!(second.from_cache);
    }

    #[tokio::test]
    async fn test_different_user_context_digest_bypasses_cache() {
        let mut responses = HashMap::new();
        responses.insert("SELECT 1".to_string(), response(vec![vec![Value::from(1)]]));
        let executor = executor_with(responses);

        executor
            .run("conn-1", Driver::Postgres, "postgres://x", "SELECT 1", vec![], "digest-a", 1, true)
            .await
            .unwrap();
        let outcome = executor
            .run("conn-1", Driver::Postgres, "postgres://x", "SELECT 1", vec![], "digest-b", 1, true)
            .await
            .unwrap();
        assert!(!outcome.from_cache);
    }

    #[tokio::test]
    async fn test_unstubbed_sql_is_unavailable() {
        let executor = executor_with(HashMap::new());
        let result = executor
            .run("conn-1", Driver::Postgres, "postgres://x", "SELECT 2", vec![], "digest", 1, true)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_result_beyond_max_rows_is_truncated() {
        let mut responses = HashMap::new();
        let rows: Vec<Vec<Value>> = (0..5).map(|i| vec![Value::from(i)]).collect();
        responses.insert("SELECT * FROM t".to_string(), response(rows));

        let executor = Executor::new(
            Arc::new(StubBackend { responses }),
            ConnectionPool::default(),
            ResultCache::new(Duration::from_secs(60)),
            ExecutorConfig { statement_timeout: Duration::from_secs(5), max_rows: 2 },
        );

        let outcome = executor
            .run("conn-1", Driver::Postgres, "postgres://x", "SELECT * FROM t", vec![], "digest", 1, true)
            .await
            .unwrap();
        assert!(outcome.truncated);
        assert_eq!(outcome.response.rows.len(), 2);
        assert_eq!(outcome.total_row_count_before_truncation, 5);
    }
}
