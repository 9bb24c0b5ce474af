//! TOML-based configuration for querymind.
//!
//! Supports a config file (querymind.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [connections.production]
//! driver = "postgres"
//! connection_string = "${PROD_DB_CONNECTION_STRING}"
//!
//! [connections.dev]
//! driver = "postgres"
//! connection_string = "postgres://localhost?database=dev"
//!
//! [limits]
//! max_row_limit = 10000
//! statement_timeout_secs = 30
//! llm_timeout_secs = 20
//!
//! [validation]
//! level = "strict"
//!
//! [rls]
//! enabled = true
//!
//! [cache]
//! plan_cache_ttl_seconds = 3600
//! result_cache_ttl_seconds = 300
//! vector_cache_ttl_seconds = 86400
//!
//! [metadata]
//! cache_enabled = true
//! cache_ttl_seconds = 3600
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use super::connection::Driver;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Unsupported driver: {0}")]
    UnsupportedDriver(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Named database connections.
    #[serde(default)]
    pub connections: HashMap<String, ConnectionSettings>,

    /// Row caps, statement/LLM timeouts.
    #[serde(default)]
    pub limits: LimitSettings,

    /// SQL validator strictness.
    #[serde(default)]
    pub validation: ValidationSettings,

    /// Row-level security default posture.
    #[serde(default)]
    pub rls: RlsSettings,

    /// Plan/result/vector cache TTLs.
    #[serde(default)]
    pub cache: CacheSettings,

    /// Connection metadata introspection settings.
    #[serde(default)]
    pub metadata: MetadataSettings,
}

/// Connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionSettings {
    /// Database driver (postgres, mysql, sqlserver, oracle, snowflake, bigquery).
    pub driver: String,

    /// Connection string (supports ${ENV_VAR} expansion).
    pub connection_string: String,

    /// Default schema for this connection.
    #[serde(default)]
    pub default_schema: Option<String>,
}

impl ConnectionSettings {
    /// Get the driver type.
    pub fn driver_type(&self) -> Result<Driver, SettingsError> {
        Driver::from_str(&self.driver)
            .map_err(|_| SettingsError::UnsupportedDriver(self.driver.clone()))
    }

    /// Get the connection string with environment variables expanded.
    pub fn resolved_connection_string(&self) -> Result<String, SettingsError> {
        expand_env_vars(&self.connection_string)
    }
}

/// Row caps and timeouts enforced by the planner and executor.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitSettings {
    /// Hard row cap enforced regardless of what the plan requests.
    pub max_row_limit: u64,

    /// Executor statement timeout, in seconds.
    pub statement_timeout_secs: u64,

    /// Timeout for the intent extractor's LLM call, in seconds.
    pub llm_timeout_secs: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_row_limit: 10_000,
            statement_timeout_secs: 30,
            llm_timeout_secs: 20,
        }
    }
}

/// SQL validator strictness level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    /// Reject anything not explicitly allow-listed.
    Strict,
    /// Allow common safe constructs outside the allow-list, reject the rest.
    Moderate,
    /// Only reject constructs known to be unsafe.
    Permissive,
}

impl Default for ValidationLevel {
    fn default() -> Self {
        ValidationLevel::Strict
    }
}

/// Validator configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ValidationSettings {
    pub level: ValidationLevel,
}

/// Row-level security configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RlsSettings {
    /// Whether RLS is applied by default for connections that don't override it.
    pub enabled: bool,
}

impl Default for RlsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Plan/result/vector cache TTLs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Plan cache (intent extractor) TTL, in seconds.
    pub plan_cache_ttl_seconds: u64,

    /// Result cache (executor) TTL, in seconds.
    pub result_cache_ttl_seconds: u64,

    /// Vector store embedding cache TTL, in seconds.
    pub vector_cache_ttl_seconds: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            plan_cache_ttl_seconds: 3600,
            result_cache_ttl_seconds: 300,
            vector_cache_ttl_seconds: 86_400,
        }
    }
}

/// Connection metadata introspection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetadataSettings {
    /// Enable schema snapshot caching.
    pub cache_enabled: bool,

    /// Cache TTL in seconds.
    pub cache_ttl_seconds: u64,

    /// Default settings.
    pub defaults: MetadataDefaults,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl_seconds: 3600,
            defaults: MetadataDefaults::default(),
        }
    }
}

/// Default metadata settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetadataDefaults {
    /// Default schema name.
    pub default_schema: String,
}

impl Default for MetadataDefaults {
    fn default() -> Self {
        Self {
            default_schema: "public".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. `./querymind.toml`
    /// 2. `~/.config/querymind/config.toml`
    /// 3. Environment variable `QUERYMIND_CONFIG`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("QUERYMIND_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("querymind.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("querymind").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Get a connection by name.
    pub fn get_connection(&self, name: &str) -> Result<&ConnectionSettings, SettingsError> {
        self.connections
            .get(name)
            .ok_or_else(|| SettingsError::ConnectionNotFound(name.to_string()))
    }

    /// Get the default connection (first one defined, or "default" if it exists).
    pub fn default_connection(&self) -> Option<(&str, &ConnectionSettings)> {
        if let Some(conn) = self.connections.get("default") {
            return Some(("default", conn));
        }
        self.connections.iter().next().map(|(k, v)| (k.as_str(), v))
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' {
            if chars.peek() == Some(&'{') {
                chars.next(); // consume '{'
                let mut var_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '}' {
                        chars.next(); // consume '}'
                        break;
                    }
                    var_name.push(chars.next().unwrap());
                }
                let value = env::var(&var_name)
                    .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                result.push_str(&value);
            } else {
                let mut var_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        var_name.push(chars.next().unwrap());
                    } else {
                        break;
                    }
                }
                if var_name.is_empty() {
                    result.push('$');
                } else {
                    let value = env::var(&var_name)
                        .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                    result.push_str(&value);
                }
            }
        } else {
            result.push(c);
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars_braces() {
        env::set_var("TEST_VAR", "hello");
        assert_eq!(expand_env_vars("${TEST_VAR}").unwrap(), "hello");
        assert_eq!(
            expand_env_vars("prefix_${TEST_VAR}_suffix").unwrap(),
            "prefix_hello_suffix"
        );
        env::remove_var("TEST_VAR");
    }

    #[test]
    fn test_expand_env_vars_no_braces() {
        env::set_var("TEST_VAR2", "world");
        assert_eq!(expand_env_vars("$TEST_VAR2").unwrap(), "world");
        assert_eq!(expand_env_vars("$TEST_VAR2!").unwrap(), "world!");
        env::remove_var("TEST_VAR2");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("${NONEXISTENT_VAR_12345}");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[connections.production]
driver = "postgres"
connection_string = "postgres://localhost?database=mydb"

[connections.dev]
driver = "oracle"
connection_string = "oracle://localhost?database=dev"

[limits]
max_row_limit = 5000
statement_timeout_secs = 15

[validation]
level = "moderate"

[rls]
enabled = false

[cache]
plan_cache_ttl_seconds = 1800

[metadata]
cache_enabled = true
cache_ttl_seconds = 7200
"#;

        let settings: Settings = toml::from_str(toml).unwrap();

        assert_eq!(settings.connections.len(), 2);
        assert!(settings.connections.contains_key("production"));
        assert!(settings.connections.contains_key("dev"));

        let prod = &settings.connections["production"];
        assert_eq!(prod.driver, "postgres");

        assert_eq!(settings.limits.max_row_limit, 5000);
        assert_eq!(settings.limits.statement_timeout_secs, 15);
        assert_eq!(settings.validation.level, ValidationLevel::Moderate);
        assert!(!settings.rls.enabled);
        assert_eq!(settings.cache.plan_cache_ttl_seconds, 1800);
        assert_eq!(settings.metadata.cache_ttl_seconds, 7200);
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();

        assert_eq!(settings.limits.max_row_limit, 10_000);
        assert_eq!(settings.limits.statement_timeout_secs, 30);
        assert_eq!(settings.validation.level, ValidationLevel::Strict);
        assert!(settings.rls.enabled);
        assert!(settings.metadata.cache_enabled);
    }
}
