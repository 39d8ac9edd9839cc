//! In-memory counter store for single-process operation.
//!
//! State is not shared between processes and is lost on restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::backend::{window_span, CounterResult, CounterStore, WindowCount};
use crate::time::{Clock, SystemClock};

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    expires_at: DateTime<Utc>,
}

/// In-memory counter store.
#[derive(Clone)]
pub struct InMemoryCounterStore {
    counters: Arc<RwLock<HashMap<String, CounterEntry>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCounterStore {
    /// Create a store reading the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store reading an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Number of keys with a live window.
    pub async fn active_keys(&self) -> usize {
        let now = self.clock.now();
        let counters = self.counters.read().await;
        counters.values().filter(|e| e.expires_at > now).count()
    }
}

/// Remove ended windows, returning how many were dropped.
fn prune(counters: &mut HashMap<String, CounterEntry>, now: DateTime<Utc>) -> usize {
    let before = counters.len();
    counters.retain(|_, e| e.expires_at > now);
    before - counters.len()
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment_with_expiry(
        &self,
        key: &str,
        window: Duration,
    ) -> CounterResult<WindowCount> {
        let now = self.clock.now();
        let mut counters = self.counters.write().await;

        // Drop stale windows so abandoned identities don't accumulate
        prune(&mut counters, now);

        let entry = counters.entry(key.to_string()).or_insert(CounterEntry {
            count: 0,
            expires_at: now + window_span(window),
        });
        entry.count += 1;

        Ok(WindowCount {
            count: entry.count,
            expires_at: entry.expires_at,
        })
    }

    async fn ping(&self) -> CounterResult<()> {
        Ok(())
    }

    async fn cleanup_expired(&self) -> CounterResult<u64> {
        let now = self.clock.now();
        let mut counters = self.counters.write().await;
        Ok(prune(&mut counters, now) as u64)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;

    #[tokio::test]
    async fn test_counts_within_window() {
        let clock = ManualClock::default();
        let store = InMemoryCounterStore::with_clock(Arc::new(clock.clone()));
        let window = Duration::from_secs(60);

        let first = store.increment_with_expiry("a", window).await.unwrap();
        clock.advance(Duration::from_secs(10));
        let second = store.increment_with_expiry("a", window).await.unwrap();

        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
        assert_eq!(first.expires_at, second.expires_at);
    }

    #[tokio::test]
    async fn test_expired_window_restarts() {
        let clock = ManualClock::default();
        let store = InMemoryCounterStore::with_clock(Arc::new(clock.clone()));
        let window = Duration::from_secs(60);

        let first = store.increment_with_expiry("a", window).await.unwrap();
        store.increment_with_expiry("a", window).await.unwrap();
        clock.advance(Duration::from_secs(60));
        let fresh = store.increment_with_expiry("a", window).await.unwrap();

        assert_eq!(fresh.count, 1);
        assert!(fresh.expires_at > first.expires_at);
        assert_eq!(store.active_keys().await, 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = InMemoryCounterStore::new();
        let window = Duration::from_secs(60);

        store.increment_with_expiry("a", window).await.unwrap();
        store.increment_with_expiry("a", window).await.unwrap();
        let b = store.increment_with_expiry("b", window).await.unwrap();

        assert_eq!(b.count, 1);
    }

    #[tokio::test]
    async fn test_cleanup_expired_drops_ended_windows() {
        let clock = ManualClock::default();
        let store = InMemoryCounterStore::with_clock(Arc::new(clock.clone()));

        store.increment_with_expiry("short", Duration::from_secs(1)).await.unwrap();
        store.increment_with_expiry("long", Duration::from_secs(600)).await.unwrap();
        clock.advance(Duration::from_secs(5));

        assert_eq!(store.cleanup_expired().await.unwrap(), 1);
        assert_eq!(store.cleanup_expired().await.unwrap(), 0);
        assert_eq!(store.active_keys().await, 1);
    }
}
