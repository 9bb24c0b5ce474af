//! Typed errors for the connection registry.

use thiserror::Error;

pub type ConnectionResult<T> = Result<T, ConnectionError>;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("connection not found: {0}")]
    NotFound(String),

    #[error("connection already registered: {0}")]
    AlreadyRegistered(String),

    #[error("schema introspection failed for {connection_id}: {source}")]
    IntrospectionFailed {
        connection_id: String,
        #[source]
        source: crate::worker::WorkerError,
    },

    #[error("stored driver name is invalid: {0}")]
    InvalidDriver(String),

    #[error("registry storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("registry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
