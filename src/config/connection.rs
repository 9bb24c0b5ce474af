//! Database connection configuration.
//!
//! Supports configuration via environment variables:
//! - `QUERYMIND_DB_DRIVER`: Database dialect (postgres, mysql, sqlserver, oracle, snowflake, bigquery)
//! - `QUERYMIND_DB_HOST`: Database server hostname
//! - `QUERYMIND_DB_NAME`: Database name
//! - `QUERYMIND_DB_PORT`: Port (optional, uses driver default)

use std::env;

use serde::{Deserialize, Serialize};

/// Error type for connection configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Unsupported driver: {0}. Supported: postgres, mysql, sqlserver, oracle, snowflake, bigquery")]
    UnsupportedDriver(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// The six SQL dialects the executor and synthesizer know how to target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Driver {
    Postgres,
    MySql,
    SqlServer,
    Oracle,
    Snowflake,
    BigQuery,
}

impl Driver {
    /// Parse driver from string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ConnectionError> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Driver::Postgres),
            "mysql" => Ok(Driver::MySql),
            "sqlserver" | "mssql" | "sql_server" | "tsql" => Ok(Driver::SqlServer),
            "oracle" => Ok(Driver::Oracle),
            "snowflake" => Ok(Driver::Snowflake),
            "bigquery" | "bq" => Ok(Driver::BigQuery),
            other => Err(ConnectionError::UnsupportedDriver(other.to_string())),
        }
    }

    /// Get the driver name used to select the executor backend/dialect.
    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::Postgres => "postgres",
            Driver::MySql => "mysql",
            Driver::SqlServer => "sqlserver",
            Driver::Oracle => "oracle",
            Driver::Snowflake => "snowflake",
            Driver::BigQuery => "bigquery",
        }
    }

    /// Get the default port for this driver, where TCP-based connection applies.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Driver::Postgres => Some(5432),
            Driver::MySql => Some(3306),
            Driver::SqlServer => Some(1433),
            Driver::Oracle => Some(1521),
            Driver::Snowflake => None,
            Driver::BigQuery => None,
        }
    }

    /// The SQL AST dialect this driver's queries are synthesized/validated in.
    pub fn sql_dialect(&self) -> crate::sql::Dialect {
        match self {
            Driver::Postgres => crate::sql::Dialect::Postgres,
            Driver::MySql => crate::sql::Dialect::MySql,
            Driver::SqlServer => crate::sql::Dialect::TSql,
            Driver::Oracle => crate::sql::Dialect::Oracle,
            Driver::Snowflake => crate::sql::Dialect::Snowflake,
            Driver::BigQuery => crate::sql::Dialect::BigQuery,
        }
    }
}

/// Database connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Database driver.
    pub driver: Driver,
    /// Server hostname.
    pub host: String,
    /// Database name.
    pub database: String,
    /// Port (optional).
    pub port: Option<u16>,
    /// Username.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
}

impl ConnectionConfig {
    /// Create a new connection config for a TCP-based dialect.
    pub fn new(
        driver: Driver,
        host: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            driver,
            host: host.into(),
            database: database.into(),
            port: None,
            username: None,
            password: None,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConnectionError> {
        let driver_str = env::var("QUERYMIND_DB_DRIVER")
            .map_err(|_| ConnectionError::MissingEnvVar("QUERYMIND_DB_DRIVER".to_string()))?;

        let driver = Driver::from_str(&driver_str)?;

        let host = env::var("QUERYMIND_DB_HOST")
            .map_err(|_| ConnectionError::MissingEnvVar("QUERYMIND_DB_HOST".to_string()))?;

        let database = env::var("QUERYMIND_DB_NAME")
            .map_err(|_| ConnectionError::MissingEnvVar("QUERYMIND_DB_NAME".to_string()))?;

        let port = env::var("QUERYMIND_DB_PORT")
            .ok()
            .and_then(|p| p.parse().ok());

        let username = env::var("QUERYMIND_DB_USER").ok();
        let password = env::var("QUERYMIND_DB_PASSWORD").ok();

        Ok(Self {
            driver,
            host,
            database,
            port,
            username,
            password,
        })
    }

    /// Build a connection string for the executor backend.
    ///
    /// Read-only: the caller (executor::backend) is responsible for ensuring
    /// no code path ever derives a write-capable connection from this config.
    pub fn to_connection_string(&self) -> String {
        let port = self.port.or_else(|| self.driver.default_port());
        let host_part = match port {
            Some(p) => format!("{}:{}", self.host, p),
            None => self.host.clone(),
        };

        let scheme = match self.driver {
            Driver::Postgres => "postgres",
            Driver::MySql => "mysql",
            Driver::SqlServer => "sqlserver",
            Driver::Oracle => "oracle",
            Driver::Snowflake => "snowflake",
            Driver::BigQuery => "bigquery",
        };

        let mut params = vec![format!("database={}", self.database)];
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            params.push(format!("user={}", user));
            params.push(format!("password={}", pass));
        }

        format!("{}://{}?{}", scheme, host_part, params.join("&"))
    }

    /// Get the driver name for the executor backend dispatch.
    pub fn driver_name(&self) -> &'static str {
        self.driver.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_connection_string() {
        let config = ConnectionConfig::new(Driver::Postgres, "localhost", "mydb");
        let conn_str = config.to_connection_string();

        assert!(conn_str.contains("postgres://localhost:5432"));
        assert!(conn_str.contains("database=mydb"));
    }

    #[test]
    fn test_connection_string_with_custom_port() {
        let mut config = ConnectionConfig::new(Driver::SqlServer, "db.internal", "analytics");
        config.port = Some(14333);

        let conn_str = config.to_connection_string();
        assert!(conn_str.contains("sqlserver://db.internal:14333"));
    }

    #[test]
    fn test_driver_parsing() {
        assert_eq!(Driver::from_str("postgres").unwrap(), Driver::Postgres);
        assert_eq!(Driver::from_str("sqlserver").unwrap(), Driver::SqlServer);
        assert_eq!(Driver::from_str("mssql").unwrap(), Driver::SqlServer);
        assert_eq!(Driver::from_str("bq").unwrap(), Driver::BigQuery);
        assert!(Driver::from_str("duckdb").is_err());
    }

    #[test]
    fn test_driver_sql_dialect_mapping() {
        assert_eq!(Driver::Oracle.sql_dialect(), crate::sql::Dialect::Oracle);
        assert_eq!(Driver::BigQuery.sql_dialect(), crate::sql::Dialect::BigQuery);
    }
}
