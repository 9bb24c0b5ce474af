//! Result cache keyed by a digest of everything that determines a query's
//! output: dialect, SQL text, bound parameters, the requesting user's RLS
//! context, and the semantic layer's version. Structurally this is
//! `intent::extractor::PlanCache` again (`DashMap` for sharded-lock
//! concurrency, TTL-only eviction, `hits`/`misses` counters), reused here
//! for executed rows instead of extracted plans.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

use crate::cache::compute_hash;
use crate::worker::protocol::ExecuteQueryResponse;

/// Default time-to-live for a cached result set.
pub const DEFAULT_RESULT_TTL_SECS: u64 = 60;

#[derive(Serialize)]
struct ResultCacheKeyInput<'a> {
    dialect: &'a str,
    sql: &'a str,
    params: &'a [Value],
    user_context_digest: &'a str,
    semantic_version: u64,
}

/// `hash(dialect, sql, params, user_context_digest, semantic_version)`.
///
/// `user_context_digest` must already fold in every RLS-relevant fact about
/// the caller (role scope, row-filter predicates). This function only
/// combines it with the query shape, it does not inspect it.
pub fn result_cache_key(
    dialect: &str,
    sql: &str,
    params: &[Value],
    user_context_digest: &str,
    semantic_version: u64,
) -> Result<String, serde_json::Error> {
    compute_hash(&ResultCacheKeyInput {
        dialect,
        sql,
        params,
        user_context_digest,
        semantic_version,
    })
}

struct CachedResult {
    response: ExecuteQueryResponse,
    inserted_at: Instant,
}

/// Process-wide executed-query result cache. Eviction is TTL-only, same
/// tradeoff as `PlanCache`: an unbounded cache is out of scope here, and
/// capacity-bounding would need an access-order structure `DashMap` doesn't
/// give for free.
pub struct ResultCache {
    entries: DashMap<String, CachedResult>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<ExecuteQueryResponse> {
        let hit = self.entries.get(key).and_then(|entry| {
            if entry.inserted_at.elapsed() <= self.ttl {
                Some(entry.response.clone())
            } else {
                None
            }
        });
        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    pub fn insert(&self, key: String, response: ExecuteQueryResponse) {
        self.entries.insert(
            key,
            CachedResult {
                response,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_RESULT_TTL_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response() -> ExecuteQueryResponse {
        ExecuteQueryResponse {
            columns: vec![],
            rows: vec![],
            row_count: 0,
            rows_affected: None,
        }
    }

    #[test]
    fn test_key_is_stable_for_identical_inputs() {
        let a = result_cache_key("postgres", "SELECT 1", &[], "digest-a", 3).unwrap();
        let b = result_cache_key("postgres", "SELECT 1", &[], "digest-a", 3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_differs_on_user_context_digest() {
        let a = result_cache_key("postgres", "SELECT 1", &[], "digest-a", 3).unwrap();
        let b = result_cache_key("postgres", "SELECT 1", &[], "digest-b", 3).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_differs_on_semantic_version() {
        let a = result_cache_key("postgres", "SELECT 1", &[], "digest-a", 3).unwrap();
        let b = result_cache_key("postgres", "SELECT 1", &[], "digest-a", 4).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_miss_then_hit() {
        let cache = ResultCache::new(Duration::from_secs(60));
        assert!(cache.get("k").is_none());
        cache.insert("k".to_string(), sample_response());
        assert!(cache.get("k").is_some());
        assert_eq!(cache.hit_count(), 1);
        assert_eq!(cache.miss_count(), 1);
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = ResultCache::new(Duration::from_millis(1));
        cache.insert("k".to_string(), sample_response());
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("k").is_none());
    }
}
