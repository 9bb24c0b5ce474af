//! Configuration module for querymind.
//!
//! Handles connection configuration, environment variables, and settings.

mod connection;
mod settings;

pub use connection::{ConnectionConfig, ConnectionError, Driver};
pub use settings::{
    expand_env_vars, CacheSettings, ConnectionSettings, LimitSettings, MetadataDefaults,
    MetadataSettings, RlsSettings, Settings, SettingsError, ValidationLevel, ValidationSettings,
};
