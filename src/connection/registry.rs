//! Connection catalog and schema introspection cache.
//!
//! Persists `Connection` records in `rusqlite` the way
//! `crate::cache::MetadataCache` persists its metadata cache, and keeps a
//! TTL-bounded in-memory snapshot cache (`dashmap`) in front of it so
//! `introspect` doesn't round-trip to the driver process on every call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::{params, Connection as Sqlite, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::credential::ReadOnlyCredential;
use super::error::{ConnectionError, ConnectionResult};
use super::provider::SchemaProvider;
use crate::config::Driver;
use crate::worker::protocol::{SchemaInfo, TableDetailInfo};

const SCHEMA_VERSION: i32 = 1;

/// A registered connection. Credentials are read-only by construction; see
/// `ReadOnlyCredential`.
#[derive(Debug, Clone)]
pub struct Connection {
    pub connection_id: String,
    pub driver: Driver,
    pub credential: ReadOnlyCredential,
    pub snapshot_at: Option<DateTime<Utc>>,
}

/// Full-schema snapshot for a connection: every schema and every table's
/// columns (with nullability/PK), and declared foreign keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub schemas: Vec<SchemaInfo>,
    /// Keyed by `"{schema}.{table}"`.
    pub tables: std::collections::HashMap<String, TableDetailInfo>,
}

impl SchemaSnapshot {
    pub fn get_table(&self, schema: &str, table: &str) -> Option<&TableDetailInfo> {
        self.tables.get(&format!("{}.{}", schema, table))
    }
}

struct CachedSnapshot {
    snapshot: SchemaSnapshot,
    fetched_at: Instant,
}

/// Connection catalog backed by sqlite, with a TTL'd in-memory schema
/// snapshot cache in front of driver-process introspection.
pub struct ConnectionRegistry {
    conn: Sqlite,
    snapshot_cache: DashMap<String, CachedSnapshot>,
    snapshot_ttl: Duration,
}

impl ConnectionRegistry {
    pub fn open_in_memory(snapshot_ttl: Duration) -> ConnectionResult<Self> {
        let conn = Sqlite::open_in_memory()?;
        let registry = Self {
            conn,
            snapshot_cache: DashMap::new(),
            snapshot_ttl,
        };
        registry.init()?;
        Ok(registry)
    }

    pub fn open(path: &std::path::Path, snapshot_ttl: Duration) -> ConnectionResult<Self> {
        let conn = Sqlite::open(path)?;
        let registry = Self {
            conn,
            snapshot_cache: DashMap::new(),
            snapshot_ttl,
        };
        registry.init()?;
        Ok(registry)
    }

    fn init(&self) -> ConnectionResult<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS connections (
                connection_id TEXT PRIMARY KEY,
                driver TEXT NOT NULL,
                connection_string TEXT NOT NULL,
                snapshot_at TEXT
            );
            ",
        )?;

        let stored: Option<i32> = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| {
                let s: String = row.get(0)?;
                Ok(s.parse().unwrap_or(0))
            })
            .optional()?;

        match stored {
            Some(v) if v == SCHEMA_VERSION => {}
            _ => {
                self.conn.execute_batch("DELETE FROM connections;")?;
                self.conn.execute(
                    "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?)",
                    params![SCHEMA_VERSION.to_string()],
                )?;
            }
        }
        Ok(())
    }

    /// Register a connection. Errors if `connection_id` is already taken.
    pub fn register(
        &self,
        connection_id: &str,
        driver: Driver,
        connection_string: impl Into<String>,
    ) -> ConnectionResult<Connection> {
        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM connections WHERE connection_id = ?",
                params![connection_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(ConnectionError::AlreadyRegistered(connection_id.to_string()));
        }

        let connection_string = connection_string.into();
        self.conn.execute(
            "INSERT INTO connections (connection_id, driver, connection_string, snapshot_at) VALUES (?, ?, ?, NULL)",
            params![connection_id, driver.as_str(), connection_string],
        )?;

        Ok(Connection {
            connection_id: connection_id.to_string(),
            driver,
            credential: ReadOnlyCredential::new(connection_string),
            snapshot_at: None,
        })
    }

    pub fn get(&self, connection_id: &str) -> ConnectionResult<Connection> {
        let row = self
            .conn
            .query_row(
                "SELECT driver, connection_string, snapshot_at FROM connections WHERE connection_id = ?",
                params![connection_id],
                |row| {
                    let driver: String = row.get(0)?;
                    let connection_string: String = row.get(1)?;
                    let snapshot_at: Option<String> = row.get(2)?;
                    Ok((driver, connection_string, snapshot_at))
                },
            )
            .optional()?
            .ok_or_else(|| ConnectionError::NotFound(connection_id.to_string()))?;

        let (driver_str, connection_string, snapshot_at) = row;
        let driver = Driver::from_str(&driver_str)
            .map_err(|e| ConnectionError::InvalidDriver(e.to_string()))?;
        let snapshot_at = snapshot_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc));

        Ok(Connection {
            connection_id: connection_id.to_string(),
            driver,
            credential: ReadOnlyCredential::new(connection_string),
            snapshot_at,
        })
    }

    fn mark_snapshotted(&self, connection_id: &str, at: DateTime<Utc>) -> ConnectionResult<()> {
        self.conn.execute(
            "UPDATE connections SET snapshot_at = ? WHERE connection_id = ?",
            params![at.to_rfc3339(), connection_id],
        )?;
        Ok(())
    }

    /// Return the cached schema snapshot if fresh, otherwise fetch a new one
    /// via `provider` and repopulate the cache.
    pub async fn introspect(
        &self,
        connection_id: &str,
        provider: &Arc<dyn SchemaProvider>,
    ) -> ConnectionResult<SchemaSnapshot> {
        if let Some(cached) = self.snapshot_cache.get(connection_id) {
            if cached.fetched_at.elapsed() < self.snapshot_ttl {
                return Ok(cached.snapshot.clone());
            }
        }

        let (schemas, tables) = provider.introspect_all().await.map_err(|source| {
            ConnectionError::IntrospectionFailed {
                connection_id: connection_id.to_string(),
                source,
            }
        })?;

        let snapshot = SchemaSnapshot {
            schemas,
            tables: tables
                .into_iter()
                .map(|t| (format!("{}.{}", t.schema, t.name), t))
                .collect(),
        };

        self.snapshot_cache.insert(
            connection_id.to_string(),
            CachedSnapshot {
                snapshot: snapshot.clone(),
                fetched_at: Instant::now(),
            },
        );
        self.mark_snapshotted(connection_id, Utc::now())?;

        Ok(snapshot)
    }

    /// Manual cache invalidation hook: forces the next `introspect` call to
    /// re-fetch regardless of TTL.
    pub fn invalidate(&self, connection_id: &str) {
        self.snapshot_cache.remove(connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::worker::WorkerResult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SchemaProvider for CountingProvider {
        async fn list_schemas(&self) -> WorkerResult<Vec<SchemaInfo>> {
            Ok(vec![SchemaInfo { name: "public".into(), is_default: true }])
        }
        async fn list_tables(&self, _schema: &str) -> WorkerResult<Vec<crate::worker::protocol::TableInfo>> {
            Ok(vec![])
        }
        async fn get_table(&self, _schema: &str, _table: &str) -> WorkerResult<TableDetailInfo> {
            unreachable!("no tables listed")
        }
        async fn introspect_all(&self) -> WorkerResult<(Vec<SchemaInfo>, Vec<TableDetailInfo>)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((vec![SchemaInfo { name: "public".into(), is_default: true }], vec![]))
        }
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = ConnectionRegistry::open_in_memory(Duration::from_secs(60)).unwrap();
        registry.register("conn1", Driver::Postgres, "postgres://localhost/db").unwrap();
        let conn = registry.get("conn1").unwrap();
        assert_eq!(conn.connection_id, "conn1");
        assert_eq!(conn.driver, Driver::Postgres);
    }

    #[tokio::test]
    async fn test_duplicate_register_errors() {
        let registry = ConnectionRegistry::open_in_memory(Duration::from_secs(60)).unwrap();
        registry.register("conn1", Driver::Postgres, "postgres://localhost/db").unwrap();
        let err = registry.register("conn1", Driver::Postgres, "postgres://localhost/db2");
        assert!(matches!(err, Err(ConnectionError::AlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn test_introspect_caches_within_ttl() {
        let registry = ConnectionRegistry::open_in_memory(Duration::from_secs(60)).unwrap();
        registry.register("conn1", Driver::Postgres, "postgres://localhost/db").unwrap();
        let counting = Arc::new(CountingProvider { calls: AtomicUsize::new(0) });
        let provider: Arc<dyn SchemaProvider> = counting.clone();

        registry.introspect("conn1", &provider).await.unwrap();
        registry.introspect("conn1", &provider).await.unwrap();

        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let registry = ConnectionRegistry::open_in_memory(Duration::from_secs(60)).unwrap();
        registry.register("conn1", Driver::Postgres, "postgres://localhost/db").unwrap();
        let counting = Arc::new(CountingProvider { calls: AtomicUsize::new(0) });
        let provider: Arc<dyn SchemaProvider> = counting.clone();

        registry.introspect("conn1", &provider).await.unwrap();
        registry.invalidate("conn1");
        registry.introspect("conn1", &provider).await.unwrap();

        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_unknown_connection_errors() {
        let registry = ConnectionRegistry::open_in_memory(Duration::from_secs(60)).unwrap();
        let err = registry.get("nope");
        assert!(matches!(err, Err(ConnectionError::NotFound(_))));
    }
}
