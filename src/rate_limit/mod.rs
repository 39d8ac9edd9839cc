//! Cluster-wide request admission.
//!
//! A [`RateLimiter`] counts requests per client identity in a fixed window.
//! Counters live in a pluggable [`CounterStore`]:
//! - In-memory (single process, tests and development)
//! - SQLite/PostgreSQL (shared by every instance on the same database)
//! - Redis (distributed, feature `redis-backend`)

mod backend;
mod database;
mod limiter;
mod memory;
mod quota;

#[cfg(feature = "redis-backend")]
mod redis;

pub use backend::{CounterError, CounterResult, CounterStore, WindowCount};
pub use database::DieselCounterStore;
pub use limiter::{BoxedCounterStore, LimiterError, RateLimiter, DEFAULT_STORE_TIMEOUT, KEY_PREFIX};
pub use memory::InMemoryCounterStore;
pub use quota::{QuotaSpec, QuotaSpecError, QuotaState};

#[cfg(feature = "redis-backend")]
pub use self::redis::RedisCounterStore;
