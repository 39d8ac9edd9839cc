//! Admission control on top of a shared counter store.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use super::backend::{CounterError, CounterStore};
use super::quota::{QuotaSpec, QuotaState};
use crate::cancel::Cancellation;
use crate::identity::ClientIdentity;

/// Key prefix for counters in the shared store.
pub const KEY_PREFIX: &str = "charsync:ratelimit:";

/// Default bound on a single store round-trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Boxed counter store for dynamic dispatch.
pub type BoxedCounterStore = Arc<dyn CounterStore>;

/// Errors from an admission check.
///
/// A denial is not an error; it is reported through [`QuotaState::admitted`].
#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    #[error("rate limit store unavailable: {0}")]
    Unavailable(#[from] CounterError),
    #[error("rate limit store did not answer within {0:?}")]
    Timeout(Duration),
    #[error("admission check cancelled")]
    Cancelled,
}

/// Fixed-window rate limiter shared by every instance using the same store.
#[derive(Clone)]
pub struct RateLimiter {
    store: BoxedCounterStore,
    quota: QuotaSpec,
    store_timeout: Duration,
}

impl RateLimiter {
    pub fn new(store: BoxedCounterStore, quota: QuotaSpec) -> Self {
        Self {
            store,
            quota,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn quota(&self) -> QuotaSpec {
        self.quota
    }

    pub fn store(&self) -> &BoxedCounterStore {
        &self.store
    }

    fn key(identity: &ClientIdentity) -> String {
        format!("{}{}", KEY_PREFIX, identity)
    }

    /// Count one request for `identity` and decide whether it may proceed.
    ///
    /// Every call consumes a unit, admitted or not. Store failures and
    /// timeouts are returned as errors rather than guessed at.
    pub async fn admit(
        &self,
        identity: &ClientIdentity,
        cancel: &Cancellation,
    ) -> Result<QuotaState, LimiterError> {
        let key = Self::key(identity);
        let increment = tokio::time::timeout(
            self.store_timeout,
            self.store.increment_with_expiry(&key, self.quota.window),
        );

        let counted = match cancel.run(increment).await {
            Err(_) => return Err(LimiterError::Cancelled),
            Ok(Err(_)) => {
                error!(
                    "Rate limit store ({}) timed out after {:?}",
                    self.store.name(),
                    self.store_timeout
                );
                return Err(LimiterError::Timeout(self.store_timeout));
            }
            Ok(Ok(Err(e))) => {
                error!("Rate limit store ({}) failed: {}", self.store.name(), e);
                return Err(LimiterError::Unavailable(e));
            }
            Ok(Ok(Ok(counted))) => counted,
        };

        let state = QuotaState::from_count(self.quota.limit, counted.count, counted.expires_at);
        if state.admitted {
            debug!(
                "Admitted {} ({}/{} used)",
                identity, counted.count, self.quota.limit
            );
        } else {
            info!(
                "Denied {}: quota of {} exhausted until {}",
                identity, self.quota.limit, state.reset_at
            );
        }

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::backend::{CounterResult, WindowCount};
    use crate::rate_limit::memory::InMemoryCounterStore;
    use crate::time::{Clock, ManualClock};
    use async_trait::async_trait;

    fn limiter(limit: u64, clock: &ManualClock) -> RateLimiter {
        let store = InMemoryCounterStore::with_clock(Arc::new(clock.clone()));
        RateLimiter::new(Arc::new(store), QuotaSpec::per_minute(limit))
    }

    #[tokio::test]
    async fn test_limit_then_deny() {
        let clock = ManualClock::default();
        let limiter = limiter(3, &clock);
        let id = ClientIdentity::from_origin("10.0.0.1");
        let cancel = Cancellation::none();

        for expected in [2, 1, 0] {
            let state = limiter.admit(&id, &cancel).await.unwrap();
            assert!(state.admitted);
            assert_eq!(state.remaining, expected);
            assert_eq!(state.limit, 3);
        }

        let denied = limiter.admit(&id, &cancel).await.unwrap();
        assert!(!denied.admitted);
        assert_eq!(denied.remaining, 0);

        // Denials keep counting but never go negative
        let again = limiter.admit(&id, &cancel).await.unwrap();
        assert!(!again.admitted);
        assert_eq!(again.remaining, 0);
    }

    #[tokio::test]
    async fn test_window_reset() {
        let clock = ManualClock::default();
        let limiter = limiter(2, &clock);
        let id = ClientIdentity::from_origin("10.0.0.1");
        let cancel = Cancellation::none();

        let first = limiter.admit(&id, &cancel).await.unwrap();
        limiter.admit(&id, &cancel).await.unwrap();
        assert!(!limiter.admit(&id, &cancel).await.unwrap().admitted);

        clock.advance(Duration::from_secs(61));
        assert!(clock.now() > first.reset_at);

        let fresh = limiter.admit(&id, &cancel).await.unwrap();
        assert!(fresh.admitted);
        assert_eq!(fresh.remaining, 1);
        assert!(fresh.reset_at > first.reset_at);
    }

    #[tokio::test]
    async fn test_remaining_never_increases_within_window() {
        let clock = ManualClock::default();
        let limiter = limiter(5, &clock);
        let id = ClientIdentity::from_origin("10.0.0.1");
        let cancel = Cancellation::none();

        let mut last = u64::MAX;
        for _ in 0..8 {
            let state = limiter.admit(&id, &cancel).await.unwrap();
            assert!(state.remaining <= last);
            last = state.remaining;
            clock.advance(Duration::from_secs(1));
        }
    }

    #[tokio::test]
    async fn test_concurrent_admits_respect_limit() {
        let limiter = RateLimiter::new(
            Arc::new(InMemoryCounterStore::new()),
            QuotaSpec::per_minute(10),
        );
        let id = ClientIdentity::from_api_key("k1").unwrap();

        let mut handles = Vec::new();
        for _ in 0..25 {
            let limiter = limiter.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                limiter.admit(&id, &Cancellation::none()).await.unwrap()
            }));
        }

        let mut admitted = 0;
        let mut denied = 0;
        for handle in handles {
            if handle.await.unwrap().admitted {
                admitted += 1;
            } else {
                denied += 1;
            }
        }

        assert_eq!(admitted, 10);
        assert_eq!(denied, 15);
    }

    #[tokio::test]
    async fn test_identities_have_separate_quotas() {
        let clock = ManualClock::default();
        let limiter = limiter(1, &clock);
        let cancel = Cancellation::none();

        let a = ClientIdentity::from_api_key("a").unwrap();
        let b = ClientIdentity::from_api_key("b").unwrap();

        assert!(limiter.admit(&a, &cancel).await.unwrap().admitted);
        assert!(limiter.admit(&b, &cancel).await.unwrap().admitted);
        assert!(!limiter.admit(&a, &cancel).await.unwrap().admitted);
    }

    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn increment_with_expiry(&self, _: &str, _: Duration) -> CounterResult<WindowCount> {
            Err(CounterError::Unavailable("connection refused".into()))
        }
        async fn ping(&self) -> CounterResult<()> {
            Err(CounterError::Unavailable("connection refused".into()))
        }
        fn name(&self) -> &'static str {
            "down"
        }
    }

    struct HangingStore;

    #[async_trait]
    impl CounterStore for HangingStore {
        async fn increment_with_expiry(&self, _: &str, _: Duration) -> CounterResult<WindowCount> {
            std::future::pending().await
        }
        async fn ping(&self) -> CounterResult<()> {
            Ok(())
        }
        fn name(&self) -> &'static str {
            "hanging"
        }
    }

    #[tokio::test]
    async fn test_unreachable_store_is_unavailable() {
        let limiter = RateLimiter::new(Arc::new(DownStore), QuotaSpec::per_minute(10));
        let id = ClientIdentity::from_origin("10.0.0.1");

        let err = limiter.admit(&id, &Cancellation::none()).await.unwrap_err();
        assert!(matches!(err, LimiterError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let limiter = RateLimiter::new(Arc::new(HangingStore), QuotaSpec::per_minute(10))
            .with_store_timeout(Duration::from_millis(20));
        let id = ClientIdentity::from_origin("10.0.0.1");

        let err = limiter.admit(&id, &Cancellation::none()).await.unwrap_err();
        assert!(matches!(err, LimiterError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_cancelled_admit() {
        let limiter = RateLimiter::new(Arc::new(HangingStore), QuotaSpec::per_minute(10));
        let id = ClientIdentity::from_origin("10.0.0.1");
        let (handle, cancel) = Cancellation::new();
        handle.cancel();

        let err = limiter.admit(&id, &cancel).await.unwrap_err();
        assert!(matches!(err, LimiterError::Cancelled));
    }
}
