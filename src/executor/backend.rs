//! Execution backend: one dialect driver process per `Driver`, speaking the
//! same NDJSON-over-stdio protocol as `worker::WorkerClient`.
//!
//! The teacher's `WorkerClient` talks to a single embedded worker binary.
//! Here a query can target any of six dialects, so dispatch generalizes to
//! a small trait (`ExecutorBackend`) with one process-based implementation
//! per driver. The request/response plumbing (IDs, oneshot correlation,
//! background reader task) carries over unchanged inside `WorkerClient`
//! itself; this layer only adds driver selection and process lifecycle.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::Driver;
use crate::worker::protocol::ExecuteQueryResponse;
use crate::worker::{WorkerClient, WorkerError};

use super::error::{ExecutorError, ExecutorResult};

/// Executes a single bound SQL statement against one connection string. A
/// backend owns nothing about caching, pooling, or timeouts (those are the
/// callers' concerns: `pool`, `cache`, and the orchestrator's stage budget
/// respectively).
#[async_trait]
pub trait ExecutorBackend: Send + Sync {
    async fn execute(
        &self,
        driver: Driver,
        connection_string: &str,
        sql: &str,
        args: Vec<Value>,
    ) -> ExecutorResult<ExecuteQueryResponse>;
}

/// Maps each `Driver` to the path of its driver process binary. Processes
/// are spawned lazily on first use per driver and kept alive for reuse;
/// `WorkerClient` multiplexes concurrent requests over one process via
/// request-ID correlation, so one process per driver (not per connection)
/// is enough.
pub struct ProcessBackend {
    driver_paths: HashMap<Driver, PathBuf>,
    clients: RwLock<HashMap<Driver, WorkerClient>>,
}

impl ProcessBackend {
    pub fn new(driver_paths: HashMap<Driver, PathBuf>) -> Self {
        Self {
            driver_paths,
            clients: RwLock::new(HashMap::new()),
        }
    }

    async fn client_for(&self, driver: Driver) -> ExecutorResult<()> {
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(&driver) {
                if client.is_alive() {
                    return Ok(());
                }
            }
        }

        let path = self.driver_paths.get(&driver).ok_or_else(|| {
            ExecutorError::Unavailable(format!(
                "no driver process configured for {}",
                driver.as_str()
            ))
        })?;

        let client = WorkerClient::spawn(path)
            .await
            .map_err(ExecutorError::from_worker_error)?;

        let mut clients = self.clients.write().await;
        clients.insert(driver, client);
        Ok(())
    }
}

#[async_trait]
impl ExecutorBackend for ProcessBackend {
    async fn execute(
        &self,
        driver: Driver,
        connection_string: &str,
        sql: &str,
        args: Vec<Value>,
    ) -> ExecutorResult<ExecuteQueryResponse> {
        self.client_for(driver).await?;

        let clients = self.clients.read().await;
        let client = clients
            .get(&driver)
            .ok_or_else(|| ExecutorError::Unavailable("driver process disappeared".to_string()))?;

        client
            .execute_query(driver.as_str(), connection_string, sql, args)
            .await
            .map_err(ExecutorError::from_worker_error)
    }
}

/// In-process test double: canned responses or errors keyed by exact SQL
/// text, used by `pool`/`cache`/orchestrator tests that don't want to spawn
/// a real driver process.
#[cfg(test)]
pub struct StubBackend {
    pub responses: HashMap<String, ExecuteQueryResponse>,
}

#[cfg(test)]
#[async_trait]
impl ExecutorBackend for StubBackend {
    async fn execute(
        &self,
        _driver: Driver,
        _connection_string: &str,
        sql: &str,
        _args: Vec<Value>,
    ) -> ExecutorResult<ExecuteQueryResponse> {
        self.responses
            .get(sql)
            .map(|r| ExecuteQueryResponse {
                columns: r.columns.clone(),
                rows: r.rows.clone(),
                row_count: r.row_count,
                rows_affected: r.rows_affected,
            })
            .ok_or_else(|| {
                ExecutorError::from_worker_error(WorkerError::remote(
                    "NOT_STUBBED",
                    format!("no stubbed response for: {sql}"),
                ))
            })
    }
}
