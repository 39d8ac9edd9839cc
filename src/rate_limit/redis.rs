//! Redis-backed counter store for distributed deployments.
//!
//! Increments run as a Lua script so the counter and its expiry are set
//! atomically; Redis expires the key when the window ends.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::Script;

use super::backend::{window_span, CounterError, CounterResult, CounterStore, WindowCount};

/// Returns `{count, remaining_ttl_ms}`.
const INCREMENT_SCRIPT: &str = r#"
    local count = redis.call('INCR', KEYS[1])
    local ttl = redis.call('PTTL', KEYS[1])
    if count == 1 or ttl < 0 then
        redis.call('PEXPIRE', KEYS[1], ARGV[1])
        ttl = tonumber(ARGV[1])
    end
    return {count, ttl}
"#;

/// Redis-backed counter store.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    script: Script,
}

impl RedisCounterStore {
    /// Connect to Redis.
    ///
    /// Accepts a full `redis://` URL or a bare `host:port`.
    pub async fn connect(addr: &str) -> CounterResult<Self> {
        let url = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("redis://{}", addr)
        };

        let client = redis::Client::open(url.as_str())
            .map_err(|e| CounterError::Unavailable(format!("Redis connection error: {}", e)))?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            CounterError::Unavailable(format!("Redis connection manager error: {}", e))
        })?;

        Ok(Self {
            conn,
            script: Script::new(INCREMENT_SCRIPT),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment_with_expiry(
        &self,
        key: &str,
        window: Duration,
    ) -> CounterResult<WindowCount> {
        let mut conn = self.conn.clone();
        let window_ms = window.as_millis().max(1) as i64;

        let (count, ttl_ms): (i64, i64) = self
            .script
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CounterError::Database(e.to_string()))?;

        let ttl = Duration::from_millis(ttl_ms.max(0) as u64);
        Ok(WindowCount {
            count: count.max(0) as u64,
            expires_at: Utc::now() + window_span(ttl),
        })
    }

    async fn ping(&self) -> CounterResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| CounterError::Unavailable(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
