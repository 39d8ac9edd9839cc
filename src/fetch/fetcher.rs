//! Resilient upstream fetch driven by [`RetryPolicy`].

use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;

use super::policy::{FetchState, RetryCause, RetryPolicy};
use super::transport::Transport;
use crate::cancel::Cancellation;
use crate::models::{CharacterFilter, FetchPage};
use crate::time::{Sleeper, TokioSleeper};

/// Errors from a logical fetch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("upstream still failing after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: RetryCause },
    #[error("upstream rejected the request with status {status}")]
    Rejected { status: u16 },
    #[error("upstream returned a malformed body: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("fetch cancelled")]
    Cancelled,
}

/// Endpoint plus the filter forwarded as query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub endpoint: Url,
    pub filter: CharacterFilter,
}

impl FetchTarget {
    pub fn new(endpoint: Url, filter: CharacterFilter) -> Self {
        Self { endpoint, filter }
    }

    /// The request URL. Unset or blank filter values are left out.
    pub fn url(&self) -> Url {
        let mut url = self.endpoint.clone();
        let pairs = self.filter.query_pairs();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        url
    }
}

/// Fetches one page from the upstream, retrying transient failures.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            policy: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Fetch and decode one page.
    pub async fn fetch(
        &self,
        target: &FetchTarget,
        cancel: &Cancellation,
    ) -> Result<FetchPage, FetchError> {
        let url = target.url();
        let mut state = FetchState::Attempting { attempt: 1 };

        loop {
            state = match state {
                FetchState::Attempting { attempt } => {
                    debug!("GET {} (attempt {}/{})", url, attempt, self.policy.max_attempts);
                    match cancel.run(self.transport.get(&url)).await {
                        Ok(result) => self.policy.after_attempt(attempt, result),
                        Err(_) => FetchState::Cancelled,
                    }
                }
                FetchState::Backoff {
                    attempt,
                    wait,
                    cause,
                } => {
                    warn!(
                        "Upstream attempt {} failed ({}), retrying in {:?}",
                        attempt, cause, wait
                    );
                    match cancel.run(self.sleeper.sleep(wait)).await {
                        Ok(()) => FetchState::Attempting {
                            attempt: attempt + 1,
                        },
                        Err(_) => FetchState::Cancelled,
                    }
                }
                FetchState::Succeeded(response) => {
                    let page =
                        FetchPage::from_slice(&response.body).map_err(FetchError::Malformed)?;
                    debug!(
                        "Fetched {} records ({} total upstream)",
                        page.records.len(),
                        page.info.count
                    );
                    return Ok(page);
                }
                FetchState::ExhaustedFailure { attempts, last } => {
                    warn!("Giving up on {} after {} attempts: {}", url, attempts, last);
                    return Err(FetchError::Exhausted { attempts, last });
                }
                FetchState::Rejected { status } => {
                    info!("Upstream rejected {} with status {}", url, status);
                    return Err(FetchError::Rejected { status });
                }
                FetchState::Cancelled => return Err(FetchError::Cancelled),
            };
        }
    }
}
