//! Short-lived respondent session state, re-entrancy locks and rate-limit
//! windows. Production uses Redis; preview/demo flows and tests use the
//! in-memory implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::metrics::track_cache_operation;

#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;

    /// NX lock; returns false when the key is already held.
    async fn try_lock(&self, key: &str, ttl_seconds: u64) -> Result<bool>;
    async fn unlock(&self, key: &str) -> Result<()>;

    /// Sliding-window counter; returns whether the request is allowed.
    async fn incr_window(&self, key: &str, limit: u32, window_seconds: u64) -> Result<bool>;
}

// -- Redis ------------------------------------------------------------------

pub struct RedisSessionCache {
    redis: ConnectionManager,
}

impl RedisSessionCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Establish a managed connection, verifying it with a PING before the
    /// server starts accepting traffic.
    pub async fn connect(client: redis::Client) -> Result<Self> {
        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(
            Duration::from_secs(30),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        let mut conn = redis.clone();
        tokio::time::timeout(
            Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");
        Ok(Self { redis })
    }
}

#[async_trait]
impl SessionCache for RedisSessionCache {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .context("Redis PING failed")?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.redis.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .context("Failed to read key from Redis")?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.redis.clone();
        track_cache_operation("setex", async {
            redis::cmd("SETEX")
                .arg(key)
                .arg(ttl_seconds)
                .arg(value)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to write key to Redis")
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        track_cache_operation("del", async {
            redis::cmd("DEL")
                .arg(key)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to delete key from Redis")
        })
        .await
    }

    async fn try_lock(&self, key: &str, ttl_seconds: u64) -> Result<bool> {
        let mut conn = self.redis.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .context("Failed to acquire lock in Redis")?;
        Ok(acquired.is_some())
    }

    async fn unlock(&self, key: &str) -> Result<()> {
        self.delete(key).await
    }

    async fn incr_window(&self, key: &str, limit: u32, window_seconds: u64) -> Result<bool> {
        let mut conn = self.redis.clone();

        // Lua script for atomic increment with sliding window
        let lua_script = r#"
            local key = KEYS[1]
            local limit = tonumber(ARGV[1])
            local window = tonumber(ARGV[2])

            local current = redis.call('GET', key)

            if current == false then
                redis.call('SET', key, 1, 'EX', window)
                return 1
            end

            current = tonumber(current)

            if current >= limit then
                return 0
            end

            redis.call('INCR', key)
            return 1
        "#;

        let allowed: u32 = redis::Script::new(lua_script)
            .key(key)
            .arg(limit)
            .arg(window_seconds)
            .invoke_async(&mut conn)
            .await
            .context("Rate limit window check failed")?;

        Ok(allowed == 1)
    }
}

// -- in-memory --------------------------------------------------------------

#[derive(Default)]
pub struct MemorySessionCache {
    entries: Mutex<HashMap<String, Entry>>,
    windows: Mutex<HashMap<String, Window>>,
}

struct Entry {
    value: String,
    expires_at: Instant,
}

struct Window {
    count: u32,
    resets_at: Instant,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().expect("session cache poisoned");
        let expired = matches!(entries.get(key), Some(e) if e.expires_at <= Instant::now());
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut entries = self.entries.lock().expect("session cache poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries
            .lock()
            .expect("session cache poisoned")
            .remove(key);
        Ok(())
    }

    async fn try_lock(&self, key: &str, ttl_seconds: u64) -> Result<bool> {
        let mut entries = self.entries.lock().expect("session cache poisoned");
        let held = matches!(entries.get(key), Some(e) if e.expires_at > Instant::now());
        if held {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: "1".to_string(),
                expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
            },
        );
        Ok(true)
    }

    async fn unlock(&self, key: &str) -> Result<()> {
        self.delete(key).await
    }

    async fn incr_window(&self, key: &str, limit: u32, window_seconds: u64) -> Result<bool> {
        let mut windows = self.windows.lock().expect("session cache poisoned");
        let now = Instant::now();
        let window = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            resets_at: now + Duration::from_secs(window_seconds),
        });
        if window.resets_at <= now {
            window.count = 0;
            window.resets_at = now + Duration::from_secs(window_seconds);
        }
        if window.count >= limit {
            return Ok(false);
        }
        window.count += 1;
        Ok(true)
    }
}
