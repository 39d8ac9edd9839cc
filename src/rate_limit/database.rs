//! Diesel-backed counter store (SQLite/PostgreSQL).
//!
//! Every instance pointed at the same database shares counters. Each
//! increment is a single upsert statement, so the database serializes
//! concurrent callers. Ended windows are deleted at most once per sweep
//! interval, piggybacked on increments.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::sql_types::{BigInt, Text};
use diesel_async::RunQueryDsl;

use super::backend::{window_span, CounterError, CounterResult, CounterStore, WindowCount};
use crate::repository::pool::DbPool;
use crate::time::{Clock, SystemClock};
use crate::with_conn_split;

const SQLITE_UPSERT: &str = r#"
    INSERT INTO rate_limit_counters (key, count, expires_at) VALUES (?, 1, ?)
    ON CONFLICT (key) DO UPDATE SET
        count = CASE WHEN rate_limit_counters.expires_at <= ?
            THEN 1 ELSE rate_limit_counters.count + 1 END,
        expires_at = CASE WHEN rate_limit_counters.expires_at <= ?
            THEN excluded.expires_at ELSE rate_limit_counters.expires_at END
    RETURNING count, expires_at
"#;

#[cfg_attr(not(feature = "postgres"), allow(dead_code))]
const POSTGRES_UPSERT: &str = r#"
    INSERT INTO rate_limit_counters (key, count, expires_at) VALUES ($1, 1, $2)
    ON CONFLICT (key) DO UPDATE SET
        count = CASE WHEN rate_limit_counters.expires_at <= $3
            THEN 1 ELSE rate_limit_counters.count + 1 END,
        expires_at = CASE WHEN rate_limit_counters.expires_at <= $3
            THEN excluded.expires_at ELSE rate_limit_counters.expires_at END
    RETURNING count, expires_at
"#;

const SQLITE_DELETE_EXPIRED: &str = "DELETE FROM rate_limit_counters WHERE expires_at <= ?";

#[cfg_attr(not(feature = "postgres"), allow(dead_code))]
const POSTGRES_DELETE_EXPIRED: &str = "DELETE FROM rate_limit_counters WHERE expires_at <= $1";

/// Default minimum time between expired-row sweeps.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(diesel::QueryableByName)]
struct CounterRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
    #[diesel(sql_type = BigInt)]
    expires_at: i64,
}

#[derive(diesel::QueryableByName)]
struct RowCount {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[derive(diesel::QueryableByName)]
struct PingRow {
    #[diesel(sql_type = BigInt)]
    #[allow(dead_code)]
    ok: i64,
}

/// Counter store backed by the `rate_limit_counters` table.
#[derive(Clone)]
pub struct DieselCounterStore {
    pool: DbPool,
    clock: Arc<dyn Clock>,
    sweep_interval_ms: i64,
    /// Unix millis of the last sweep.
    last_sweep_ms: Arc<AtomicI64>,
}

impl DieselCounterStore {
    pub fn new(pool: DbPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: DbPool, clock: Arc<dyn Clock>) -> Self {
        let now_ms = clock.now().timestamp_millis();
        Self {
            pool,
            clock,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL.as_millis() as i64,
            last_sweep_ms: Arc::new(AtomicI64::new(now_ms)),
        }
    }

    /// Set the minimum time between expired-row sweeps.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = interval.as_millis().min(i64::MAX as u128) as i64;
        self
    }

    /// Number of counter rows, live or expired.
    pub async fn stored_keys(&self) -> Result<i64, diesel::result::Error> {
        let query = "SELECT COUNT(*) AS count FROM rate_limit_counters";
        with_conn_split!(self.pool,
            sqlite: conn => {
                diesel::sql_query(query)
                    .get_result::<RowCount>(&mut conn)
                    .await
                    .map(|r| r.count)
            },
            postgres: conn => {
                diesel::sql_query(query)
                    .get_result::<RowCount>(&mut conn)
                    .await
                    .map(|r| r.count)
            }
        )
    }

    async fn delete_expired(&self, now_ms: i64) -> Result<usize, diesel::result::Error> {
        with_conn_split!(self.pool,
            sqlite: conn => {
                diesel::sql_query(SQLITE_DELETE_EXPIRED)
                    .bind::<BigInt, _>(now_ms)
                    .execute(&mut conn)
                    .await
            },
            postgres: conn => {
                diesel::sql_query(POSTGRES_DELETE_EXPIRED)
                    .bind::<BigInt, _>(now_ms)
                    .execute(&mut conn)
                    .await
            }
        )
    }

    /// Run a sweep if the interval has elapsed and no other caller claimed it.
    async fn maybe_sweep(&self, now_ms: i64) {
        let last = AtomicI64::load(&self.last_sweep_ms, Ordering::Relaxed);
        if now_ms.saturating_sub(last) < self.sweep_interval_ms {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        match self.delete_expired(now_ms).await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!("Removed {} expired rate limit counters", removed),
            Err(e) => tracing::warn!("Failed to remove expired rate limit counters: {}", e),
        }
    }

    async fn upsert(
        &self,
        key: &str,
        now_ms: i64,
        fresh_expiry_ms: i64,
    ) -> Result<CounterRow, diesel::result::Error> {
        with_conn_split!(self.pool,
            sqlite: conn => {
                diesel::sql_query(SQLITE_UPSERT)
                    .bind::<Text, _>(key)
                    .bind::<BigInt, _>(fresh_expiry_ms)
                    .bind::<BigInt, _>(now_ms)
                    .bind::<BigInt, _>(now_ms)
                    .get_result::<CounterRow>(&mut conn)
                    .await
            },
            postgres: conn => {
                diesel::sql_query(POSTGRES_UPSERT)
                    .bind::<Text, _>(key)
                    .bind::<BigInt, _>(fresh_expiry_ms)
                    .bind::<BigInt, _>(now_ms)
                    .get_result::<CounterRow>(&mut conn)
                    .await
            }
        )
    }

    async fn select_one(&self) -> Result<(), diesel::result::Error> {
        with_conn_split!(self.pool,
            sqlite: conn => {
                diesel::sql_query("SELECT 1 AS ok")
                    .get_result::<PingRow>(&mut conn)
                    .await
                    .map(|_| ())
            },
            postgres: conn => {
                diesel::sql_query("SELECT 1::BIGINT AS ok")
                    .get_result::<PingRow>(&mut conn)
                    .await
                    .map(|_| ())
            }
        )
    }
}

#[async_trait]
impl CounterStore for DieselCounterStore {
    async fn increment_with_expiry(
        &self,
        key: &str,
        window: Duration,
    ) -> CounterResult<WindowCount> {
        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let fresh_expiry_ms = (now + window_span(window)).timestamp_millis();

        let row = self.upsert(key, now_ms, fresh_expiry_ms).await?;
        self.maybe_sweep(now_ms).await;

        let expires_at = DateTime::<Utc>::from_timestamp_millis(row.expires_at).ok_or_else(|| {
            CounterError::Database(format!("invalid expiry {} for {}", row.expires_at, key))
        })?;

        Ok(WindowCount {
            count: row.count.max(0) as u64,
            expires_at,
        })
    }

    async fn ping(&self) -> CounterResult<()> {
        self.select_one().await.map_err(|e| CounterError::Unavailable(e.to_string()))
    }

    async fn cleanup_expired(&self) -> CounterResult<u64> {
        let now_ms = self.clock.now().timestamp_millis();
        let removed = self.delete_expired(now_ms).await?;
        self.last_sweep_ms.store(now_ms, Ordering::Relaxed);
        Ok(removed as u64)
    }

    fn name(&self) -> &'static str {
        if self.pool.is_sqlite() {
            "sqlite"
        } else {
            "postgres"
        }
    }
}
