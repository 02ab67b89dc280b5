use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::SentinelError;

/// Cache backend trait for pluggable shared-cache stores.
///
/// Every backend failure surfaces as [`SentinelError::Unavailable`].
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a raw value from the cache.
    async fn get(&self, key: &str) -> Result<Option<String>, SentinelError>;

    /// Set a raw value in the cache with optional TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>)
    -> Result<(), SentinelError>;

    /// Delete a key from the cache. Deleting a missing key is not an error.
    async fn del(&self, key: &str) -> Result<bool, SentinelError>;

    /// Check if a key exists.
    async fn exists(&self, key: &str) -> Result<bool, SentinelError>;

    /// Delete every key starting with `prefix`, returning how many went.
    ///
    /// Not transactional: a key written under the prefix while the sweep
    /// runs may survive it.
    async fn del_prefix(&self, prefix: &str) -> Result<u64, SentinelError>;

    /// Atomically increment the counter at `key`, creating it with expiry
    /// `ttl` when absent. The TTL of an existing counter is left alone.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, SentinelError>;

    /// Flush all keys (use with caution).
    async fn flush(&self) -> Result<(), SentinelError>;
}

/// The cache service shared by the session store and the rate limiter.
///
/// ```rust,ignore
/// let cache = CacheService::in_memory();
/// cache.set_json("session:u1:abc", &session, Some(Duration::from_secs(900))).await?;
/// let back: Option<Session> = cache.get_json("session:u1:abc").await?;
/// ```
#[derive(Clone)]
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
}

impl CacheService {
    /// Create a new cache service with the given backend.
    pub fn new(backend: impl CacheBackend + 'static) -> Self {
        CacheService {
            backend: Arc::new(backend),
        }
    }

    /// Create an in-memory cache (good for development and testing).
    pub fn in_memory() -> Self {
        CacheService::new(InMemoryCache::new())
    }

    /// Get a JSON-deserialized value from the cache.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, SentinelError> {
        match self.backend.get(key).await? {
            Some(raw) => {
                let value: T = serde_json::from_str(&raw).map_err(|e| {
                    SentinelError::Internal(format!("Cache deserialize error: {}", e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Set a JSON-serialized value in the cache.
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), SentinelError> {
        let raw = serde_json::to_string(value)
            .map_err(|e| SentinelError::Internal(format!("Cache serialize error: {}", e)))?;
        self.backend.set(key, &raw, ttl).await
    }

    /// Get a raw string from the cache.
    pub async fn get(&self, key: &str) -> Result<Option<String>, SentinelError> {
        self.backend.get(key).await
    }

    /// Set a raw string in the cache.
    pub async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), SentinelError> {
        self.backend.set(key, value, ttl).await
    }

    /// Delete a key from the cache.
    pub async fn del(&self, key: &str) -> Result<bool, SentinelError> {
        self.backend.del(key).await
    }

    /// Check if a key exists in the cache.
    pub async fn exists(&self, key: &str) -> Result<bool, SentinelError> {
        self.backend.exists(key).await
    }

    /// Delete all keys matching a prefix.
    pub async fn del_prefix(&self, prefix: &str) -> Result<u64, SentinelError> {
        self.backend.del_prefix(prefix).await
    }

    /// Atomic increment; the first increment sets the expiry.
    pub async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, SentinelError> {
        self.backend.incr_with_expiry(key, ttl).await
    }

    /// Flush the entire cache.
    pub async fn flush(&self) -> Result<(), SentinelError> {
        self.backend.flush().await
    }
}

// ── In-Memory Cache Backend ──

/// How often a write also sweeps expired entries out of the map.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// In-memory cache using a HashMap behind a tokio `RwLock`.
/// Good for development and testing; for shared state across processes,
/// use `RedisCache`.
///
/// Expiry uses `tokio::time::Instant`, so tests can drive windows with a
/// paused clock. Expired entries are dropped on read and swept on write at
/// most once per [`SWEEP_INTERVAL`].
#[derive(Clone, Default)]
pub struct InMemoryCache {
    store: Arc<RwLock<Entries>>,
}

#[derive(Default)]
struct Entries {
    map: HashMap<String, CacheEntry>,
    next_sweep: Option<Instant>,
}

impl Entries {
    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.map.len();
        self.map.retain(|_, entry| !entry.is_expired(now));
        self.next_sweep = Some(now + SWEEP_INTERVAL);
        before - self.map.len()
    }

    fn maybe_sweep(&mut self, now: Instant) {
        if self.next_sweep.is_none_or(|at| now >= at) {
            let purged = self.purge_expired(now);
            if purged > 0 {
                tracing::debug!(purged, "expired cache entries swept");
            }
        }
    }
}

#[derive(Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.store
            .read()
            .await
            .map
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of entries held, expired or not.
    pub async fn stored_len(&self) -> usize {
        self.store.read().await.map.len()
    }

    /// Drop every expired entry now; returns how many went.
    pub async fn purge_expired(&self) -> usize {
        self.store.write().await.purge_expired(Instant::now())
    }
}

#[async_trait::async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, SentinelError> {
        let store = self.store.read().await;
        match store.map.get(key) {
            Some(entry) => {
                if entry.is_expired(Instant::now()) {
                    drop(store);
                    self.store.write().await.map.remove(key);
                    return Ok(None);
                }
                Ok(Some(entry.value.clone()))
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), SentinelError> {
        let now = Instant::now();
        let mut store = self.store.write().await;
        store.maybe_sweep(now);
        store.map.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: ttl.map(|d| now + d),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, SentinelError> {
        Ok(self.store.write().await.map.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, SentinelError> {
        let store = self.store.read().await;
        Ok(store
            .map
            .get(key)
            .is_some_and(|entry| !entry.is_expired(Instant::now())))
    }

    async fn del_prefix(&self, prefix: &str) -> Result<u64, SentinelError> {
        let mut store = self.store.write().await;
        let before = store.map.len();
        store.map.retain(|key, _| !key.starts_with(prefix));
        Ok((before - store.map.len()) as u64)
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, SentinelError> {
        // Single write lock: read, bump and expiry-set cannot interleave.
        let mut store = self.store.write().await;
        let now = Instant::now();
        store.maybe_sweep(now);

        let current = match store.map.get(key) {
            Some(entry) if !entry.is_expired(now) => Some((
                entry.value.parse::<u64>().map_err(|_| {
                    SentinelError::Internal(format!("Cache key '{}' is not a counter", key))
                })?,
                entry.expires_at,
            )),
            _ => None,
        };

        let (count, expires_at) = match current {
            Some((count, expires_at)) => (count + 1, expires_at),
            None => (1, Some(now + ttl)),
        };

        store.map.insert(
            key.to_string(),
            CacheEntry {
                value: count.to_string(),
                expires_at,
            },
        );
        Ok(count)
    }

    async fn flush(&self) -> Result<(), SentinelError> {
        self.store.write().await.map.clear();
        Ok(())
    }
}

// ── Redis Cache Backend ──

#[cfg(feature = "redis")]
const INCR_WITH_EXPIRY_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Redis-backed cache for production use.
///
/// Requires a Redis connection URL (e.g., `redis://127.0.0.1:6379`).
///
/// ```rust,ignore
/// let cache = RedisCache::new("redis://127.0.0.1:6379").await?;
/// let service = CacheService::new(cache);
/// ```
#[cfg(feature = "redis")]
#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
    incr_script: Arc<redis::Script>,
}

#[cfg(feature = "redis")]
impl RedisCache {
    /// Create a new Redis cache from a connection URL.
    pub async fn new(url: &str) -> Result<Self, SentinelError> {
        let client = redis::Client::open(url)
            .map_err(|e| SentinelError::Unavailable(format!("Redis connection error: {}", e)))?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| SentinelError::Unavailable(format!("Redis connection error: {}", e)))?;
        Ok(RedisCache {
            conn,
            incr_script: Arc::new(redis::Script::new(INCR_WITH_EXPIRY_SCRIPT)),
        })
    }
}

#[cfg(feature = "redis")]
fn redis_err(op: &str, e: redis::RedisError) -> SentinelError {
    SentinelError::Unavailable(format!("Redis {} error: {}", op, e))
}

#[cfg(feature = "redis")]
#[async_trait::async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, SentinelError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| redis_err("GET", e))
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), SentinelError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => {
                let millis = ttl.as_millis().max(1) as u64;
                let _: () = redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("PX")
                    .arg(millis)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| redis_err("SET PX", e))?;
            }
            None => {
                let _: () = conn
                    .set(key, value)
                    .await
                    .map_err(|e| redis_err("SET", e))?;
            }
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, SentinelError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let count: i64 = conn.del(key).await.map_err(|e| redis_err("DEL", e))?;
        Ok(count > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, SentinelError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.exists(key).await.map_err(|e| redis_err("EXISTS", e))
    }

    async fn del_prefix(&self, prefix: &str) -> Result<u64, SentinelError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_err("SCAN", e))?;
            if !keys.is_empty() {
                let count: u64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| redis_err("DEL", e))?;
                removed += count;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(removed)
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, SentinelError> {
        let mut conn = self.conn.clone();
        let millis = ttl.as_millis().max(1) as u64;
        self.incr_script
            .key(key)
            .arg(millis)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| redis_err("INCR script", e))
    }

    async fn flush(&self) -> Result<(), SentinelError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_err("FLUSHDB", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn counter_keeps_first_expiry() {
        let cache = InMemoryCache::new();
        let ttl = Duration::from_secs(10);

        assert_eq!(cache.incr_with_expiry("c", ttl).await.unwrap(), 1);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.incr_with_expiry("c", ttl).await.unwrap(), 2);

        // 10s after the first increment the window is over, even though the
        // second increment happened only 4s ago.
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.incr_with_expiry("c", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn counter_rejects_non_numeric_value() {
        let cache = InMemoryCache::new();
        cache.set("c", "not-a-number", None).await.unwrap();
        assert!(matches!(
            cache.incr_with_expiry("c", Duration::from_secs(1)).await,
            Err(SentinelError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn del_prefix_only_touches_matching_keys() {
        let cache = InMemoryCache::new();
        cache.set("session:u1:a", "1", None).await.unwrap();
        cache.set("session:u1:b", "1", None).await.unwrap();
        cache.set("session:u10:a", "1", None).await.unwrap();

        assert_eq!(cache.del_prefix("session:u1:").await.unwrap(), 2);
        assert!(cache.exists("session:u10:a").await.unwrap());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_first_increments_all_count() {
        let cache = InMemoryCache::new();
        let mut handles = Vec::new();
        for _ in 0..20 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .incr_with_expiry("burst", Duration::from_secs(60))
                    .await
                    .unwrap()
            }));
        }
        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=20).collect::<Vec<u64>>());

        let store = cache.store.read().await;
        assert!(store.map.get("burst").unwrap().expires_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn writes_sweep_expired_entries() {
        let cache = InMemoryCache::new();
        let window = Duration::from_secs(60);
        for i in 0..1000 {
            cache
                .incr_with_expiry(&format!("rate_limit:10.0.{}.{}", i / 256, i % 256), window)
                .await
                .unwrap();
        }
        cache
            .set("session:u1:a", "{}", Some(Duration::from_secs(7200)))
            .await
            .unwrap();
        assert_eq!(cache.stored_len().await, 1001);

        tokio::time::advance(Duration::from_secs(3600)).await;
        cache
            .incr_with_expiry("rate_limit:203.0.113.1", window)
            .await
            .unwrap();

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.stored_len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_keeps_live_and_unbounded_keys() {
        let cache = InMemoryCache::new();
        cache.set("short", "1", Some(Duration::from_secs(1))).await.unwrap();
        cache.set("long", "1", Some(Duration::from_secs(600))).await.unwrap();
        cache.set("forever", "1", None).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.stored_len().await, 2);
        assert!(cache.exists("long").await.unwrap());
        assert!(cache.exists("forever").await.unwrap());
    }
}
