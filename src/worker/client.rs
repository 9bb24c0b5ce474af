//! Async client for communicating with a dialect driver process over NDJSON.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};

use super::error::{WorkerError, WorkerResult};
use super::protocol::{RequestEnvelope, ResponseEnvelope};

/// Default timeout for requests (30 seconds).
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Async client for a dialect driver child process.
///
/// The client spawns the driver as a child process and communicates via
/// NDJSON (newline-delimited JSON) over stdin/stdout. Each request has a
/// unique ID for correlation with responses, enabling concurrent requests
/// over the same process.
///
/// # Example
///
/// ```ignore
/// use querymind::worker::{WorkerClient, protocol::*};
///
/// let client = WorkerClient::spawn("./drivers/postgres-driver").await?;
///
/// let response: ListSchemasResponse = client.request(
///     "metadata.list_schemas",
///     ListSchemasParams { ... }
/// ).await?;
/// ```
pub struct WorkerClient {
    /// Writer for sending requests to the driver's stdin.
    stdin: Arc<Mutex<BufWriter<ChildStdin>>>,

    /// Map of pending request IDs to response channels.
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<ResponseEnvelope>>>>,

    /// Handle to the driver child process.
    _child: Child,

    /// Handle to the background reader task.
    _reader_task: tokio::task::JoinHandle<()>,

    /// Request timeout duration.
    timeout: Duration,
}

impl WorkerClient {
    /// Spawn a new driver process with the default request timeout.
    pub async fn spawn<P: AsRef<Path>>(driver_path: P) -> WorkerResult<Self> {
        Self::spawn_with_timeout(driver_path, Duration::from_secs(DEFAULT_TIMEOUT_SECS)).await
    }

    /// Spawn a driver process with command-line arguments.
    pub async fn spawn_with_args<P: AsRef<Path>>(
        driver_path: P,
        args: &[String],
    ) -> WorkerResult<Self> {
        Self::spawn_with_args_and_timeout(
            driver_path,
            args,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
        .await
    }

    /// Spawn a driver process with arguments and a custom timeout.
    pub async fn spawn_with_args_and_timeout<P: AsRef<Path>>(
        driver_path: P,
        args: &[String],
        timeout: Duration,
    ) -> WorkerResult<Self> {
        let mut child = Command::new(driver_path.as_ref())
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::SpawnFailed)?;

        let stdin = child.stdin.take().expect("stdin not captured");
        let stdout = child.stdout.take().expect("stdout not captured");

        let stdin = Arc::new(Mutex::new(BufWriter::new(stdin)));
        let pending: Arc<Mutex<HashMap<String, oneshot::Sender<ResponseEnvelope>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let reader_task = Self::spawn_reader_task(stdout, pending.clone());

        Ok(Self {
            stdin,
            pending,
            _child: child,
            _reader_task: reader_task,
            timeout,
        })
    }

    /// Spawn a new driver process with a custom timeout.
    pub async fn spawn_with_timeout<P: AsRef<Path>>(
        driver_path: P,
        timeout: Duration,
    ) -> WorkerResult<Self> {
        Self::spawn_with_args_and_timeout(driver_path, &[], timeout).await
    }

    /// Spawn the background task that reads responses from the driver.
    fn spawn_reader_task(
        stdout: ChildStdout,
        pending: Arc<Mutex<HashMap<String, oneshot::Sender<ResponseEnvelope>>>>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => match serde_json::from_str::<ResponseEnvelope>(&line) {
                        Ok(resp) => {
                            let mut pending = pending.lock().await;
                            if let Some(tx) = pending.remove(&resp.id) {
                                let _ = tx.send(resp);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "driver: failed to parse response");
                        }
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "driver: read error");
                        break;
                    }
                }
            }

            let mut pending = pending.lock().await;
            for (id, tx) in pending.drain() {
                let error_response = ResponseEnvelope {
                    id,
                    success: false,
                    result: None,
                    error: Some(super::protocol::ErrorInfo {
                        code: "WORKER_EXITED".to_string(),
                        message: "driver process exited unexpectedly".to_string(),
                    }),
                };
                let _ = tx.send(error_response);
            }
        })
    }

    /// Send a request to the driver and wait for a response.
    pub async fn request<P, R>(&self, method: &str, params: P) -> WorkerResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = uuid::Uuid::new_v4().to_string();

        let request = RequestEnvelope {
            id: id.clone(),
            method: method.to_string(),
            params: serde_json::to_value(params).map_err(WorkerError::SerializeFailed)?,
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id.clone(), tx);
        }

        {
            let mut stdin = self.stdin.lock().await;
            let line =
                serde_json::to_string(&request).map_err(WorkerError::SerializeFailed)? + "\n";
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(WorkerError::WriteFailed)?;
            stdin.flush().await.map_err(WorkerError::WriteFailed)?;
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => return Err(WorkerError::ChannelClosed),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                return Err(WorkerError::Timeout(self.timeout.as_secs()));
            }
        };

        if response.success {
            let result = response.result.unwrap_or(serde_json::Value::Null);
            serde_json::from_value(result).map_err(WorkerError::DeserializeFailed)
        } else {
            let error = response.error.unwrap_or_else(|| super::protocol::ErrorInfo {
                code: "UNKNOWN".to_string(),
                message: "Unknown error".to_string(),
            });
            Err(Self::classify_error(&error.code, &error.message))
        }
    }

    fn classify_error(code: &str, message: &str) -> WorkerError {
        match code {
            "DRIVER_NOT_FOUND" => WorkerError::DriverNotFound(message.to_string()),
            "CONNECTION_FAILED" => WorkerError::ConnectionFailed(message.to_string()),
            "INVALID_REQUEST" => WorkerError::InvalidRequest(message.to_string()),
            "METHOD_NOT_FOUND" => WorkerError::MethodNotFound(message.to_string()),
            "TIMEOUT" => WorkerError::Timeout(0),
            _ => WorkerError::remote(code, message),
        }
    }

    /// Check if the driver process is still running.
    pub fn is_alive(&self) -> bool {
        !self._reader_task.is_finished()
    }

    /// Get the current request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Set the request timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

// Convenience methods for metadata introspection and query execution.
impl WorkerClient {
    pub async fn list_schemas(
        &self,
        driver: &str,
        connection_string: &str,
    ) -> WorkerResult<super::protocol::ListSchemasResponse> {
        use super::protocol::{methods, ConnectionParams, ListSchemasParams};

        self.request(
            methods::LIST_SCHEMAS,
            ListSchemasParams {
                connection: ConnectionParams {
                    driver: driver.to_string(),
                    connection_string: connection_string.to_string(),
                },
            },
        )
        .await
    }

    pub async fn list_tables(
        &self,
        driver: &str,
        connection_string: &str,
        schema: Option<&str>,
    ) -> WorkerResult<super::protocol::ListTablesResponse> {
        use super::protocol::{methods, ConnectionParams, ListTablesParams};

        self.request(
            methods::LIST_TABLES,
            ListTablesParams {
                connection: ConnectionParams {
                    driver: driver.to_string(),
                    connection_string: connection_string.to_string(),
                },
                schema: schema.map(|s| s.to_string()),
            },
        )
        .await
    }

    pub async fn get_table(
        &self,
        driver: &str,
        connection_string: &str,
        schema: &str,
        table: &str,
    ) -> WorkerResult<super::protocol::GetTableResponse> {
        use super::protocol::{methods, ConnectionParams, GetTableParams};

        self.request(
            methods::GET_TABLE,
            GetTableParams {
                connection: ConnectionParams {
                    driver: driver.to_string(),
                    connection_string: connection_string.to_string(),
                },
                schema: schema.to_string(),
                table: table.to_string(),
            },
        )
        .await
    }

    pub async fn get_foreign_keys(
        &self,
        driver: &str,
        connection_string: &str,
        schema: &str,
        table: &str,
    ) -> WorkerResult<super::protocol::GetForeignKeysResponse> {
        use super::protocol::{methods, ConnectionParams, GetForeignKeysParams};

        self.request(
            methods::GET_FOREIGN_KEYS,
            GetForeignKeysParams {
                connection: ConnectionParams {
                    driver: driver.to_string(),
                    connection_string: connection_string.to_string(),
                },
                schema: schema.to_string(),
                table: table.to_string(),
            },
        )
        .await
    }

    /// Execute a SQL query with typed, bound parameters.
    pub async fn execute_query(
        &self,
        driver: &str,
        connection_string: &str,
        sql: &str,
        args: Vec<serde_json::Value>,
    ) -> WorkerResult<super::protocol::ExecuteQueryResponse> {
        use super::protocol::{methods, ConnectionParams, ExecuteQueryParams};

        self.request(
            methods::EXECUTE_QUERY,
            ExecuteQueryParams {
                connection: ConnectionParams {
                    driver: driver.to_string(),
                    connection_string: connection_string.to_string(),
                },
                sql: sql.to_string(),
                args: if args.is_empty() { None } else { Some(args) },
            },
        )
        .await
    }
}
