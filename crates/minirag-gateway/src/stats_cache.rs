use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::ApiResult;

/// TTL for cached analytics reads.
const STATS_TTL: Duration = Duration::from_secs(30);
/// Bound on distinct cache keys; the map is cleared wholesale at the cap.
const MAX_ENTRIES: usize = 1024;

/// Process-local cache for read-heavy stats queries, keyed by
/// `(metric, tenant_id, params)`. Entries older than the TTL re-run the
/// underlying query; invalidation beyond that is by process restart only.
pub struct StatsCache {
    entries: DashMap<String, (serde_json::Value, Instant)>,
    ttl: Duration,
}

impl Default for StatsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            ttl: STATS_TTL,
        }
    }

    #[cfg(test)]
    fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn key(metric: &str, tenant_id: &str, params: &str) -> String {
        format!("{}:{}:{}", metric, tenant_id, params)
    }

    /// Serve from cache when fresh, otherwise run `compute` and store its
    /// result. Errors are never cached.
    pub fn get_or(
        &self,
        key: String,
        compute: impl FnOnce() -> ApiResult<serde_json::Value>,
    ) -> ApiResult<serde_json::Value> {
        if let Some(entry) = self.entries.get(&key) {
            let (value, inserted_at) = entry.value();
            if inserted_at.elapsed() < self.ttl {
                return Ok(value.clone());
            }
        }

        let value = compute()?;
        if self.entries.len() >= MAX_ENTRIES {
            self.entries.clear();
        }
        self.entries.insert(key, (value.clone(), Instant::now()));
        Ok(value)
    }
}
