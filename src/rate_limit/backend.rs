//! Pluggable counter storage for the admission limiter.
//!
//! Every serving instance talks to the same store, so the atomicity of
//! [`CounterStore::increment_with_expiry`] is what makes quotas cluster-wide.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Result type for counter store operations.
pub type CounterResult<T> = Result<T, CounterError>;

/// Errors from counter store operations.
#[derive(Debug, thiserror::Error)]
pub enum CounterError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl From<diesel::result::Error> for CounterError {
    fn from(e: diesel::result::Error) -> Self {
        CounterError::Database(e.to_string())
    }
}

/// Counter value after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Number of increments in the active window, including this one.
    pub count: u64,
    /// When the active window ends.
    pub expires_at: DateTime<Utc>,
}

/// Shared key/value store with atomic increment-with-expiry.
///
/// Implementations must be safe under concurrent callers across processes.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`.
    ///
    /// The first increment of an absent or expired key starts a new window
    /// lasting `window`; later increments inside that window keep its expiry.
    async fn increment_with_expiry(&self, key: &str, window: Duration)
        -> CounterResult<WindowCount>;

    /// Check the store is reachable.
    async fn ping(&self) -> CounterResult<()>;

    /// Delete counters whose window has ended (housekeeping).
    ///
    /// Returns the number of counters removed. Stores with native key
    /// expiry keep the default.
    async fn cleanup_expired(&self) -> CounterResult<u64> {
        Ok(0)
    }

    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;
}

/// Length of a window as a chrono duration.
pub(crate) fn window_span(window: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(window.as_millis().min(i64::MAX as u128) as i64)
}
