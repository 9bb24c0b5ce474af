//! Bounded read-only connection pool, keyed by connection id.
//!
//! The teacher's worker talks to one process over stdio with no notion of
//! "how many queries may run against this connection at once". That limit
//! lives here, one `tokio::sync::Semaphore` per `connection_id`, so a single
//! noisy connection can't starve the shared driver process pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};

use super::error::{ExecutorError, ExecutorResult};

/// Default number of concurrent statements allowed per connection.
pub const DEFAULT_PER_CONNECTION_CAPACITY: usize = 4;

/// Default wait for a free pool slot before giving up.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

struct ConnectionSlot {
    semaphore: Arc<Semaphore>,
}

/// Hands out a permit per `(connection_id)` before a statement is allowed to
/// run. Permits are released on drop, same as any `tokio::sync::Semaphore`
/// guard, so a panicking or cancelled request never leaks capacity.
pub struct ConnectionPool {
    capacity: usize,
    acquire_timeout: Duration,
    slots: Mutex<HashMap<String, ConnectionSlot>>,
}

impl ConnectionPool {
    pub fn new(capacity: usize, acquire_timeout: Duration) -> Self {
        Self {
            capacity,
            acquire_timeout,
            slots: Mutex::new(HashMap::new()),
        }
    }

    async fn semaphore_for(&self, connection_id: &str) -> Arc<Semaphore> {
        let mut slots = self.slots.lock().await;
        slots
            .entry(connection_id.to_string())
            .or_insert_with(|| ConnectionSlot {
                semaphore: Arc::new(Semaphore::new(self.capacity)),
            })
            .semaphore
            .clone()
    }

    /// Acquire a slot for `connection_id`, waiting up to `acquire_timeout`
    /// before failing with `ExecutorError::Unavailable`.
    pub async fn acquire(&self, connection_id: &str) -> ExecutorResult<tokio::sync::OwnedSemaphorePermit> {
        let semaphore = self.semaphore_for(connection_id).await;
        match tokio::time::timeout(self.acquire_timeout, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(ExecutorError::Unavailable(
                "connection pool semaphore closed".to_string(),
            )),
            Err(_) => Err(ExecutorError::Unavailable(format!(
                "timed out waiting for a free connection slot for {connection_id}"
            ))),
        }
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(
            DEFAULT_PER_CONNECTION_CAPACITY,
            Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_within_capacity_succeeds() {
        let pool = ConnectionPool::new(2, Duration::from_secs(1));
        let _a = pool.acquire("conn-1").await.unwrap();
        let _b = pool.acquire("conn-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_acquire_beyond_capacity_times_out() {
        let pool = ConnectionPool::new(1, Duration::from_millis(50));
        let _held = pool.acquire("conn-1").await.unwrap();
        let result = pool.acquire("conn-1").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_different_connections_do_not_share_capacity() {
        let pool = ConnectionPool::new(1, Duration::from_millis(50));
        let _a = pool.acquire("conn-1").await.unwrap();
        let _b = pool.acquire("conn-2").await.unwrap();
    }

    #[tokio::test]
    async fn test_permit_release_frees_slot() {
        let pool = ConnectionPool::new(1, Duration::from_millis(200));
        {
            let _held = pool.acquire("conn-1").await.unwrap();
        }
        let result = pool.acquire("conn-1").await;
        assert!(result.is_ok());
    }
}
