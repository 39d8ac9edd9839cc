//! Retry policy and the fetch state machine's transition function.

use std::time::Duration;

use super::transport::{TransportError, UpstreamResponse};

/// Why an attempt is worth repeating.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryCause {
    #[error("{0}")]
    Transport(TransportError),
    #[error("upstream rate limited the request (429)")]
    RateLimited,
    #[error("upstream server error ({0})")]
    ServerError(u16),
}

/// States of a single logical fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchState {
    /// About to make attempt number `attempt` (1-based).
    Attempting { attempt: u32 },
    /// Attempt `attempt` failed transiently; wait before the next one.
    Backoff {
        attempt: u32,
        wait: Duration,
        cause: RetryCause,
    },
    /// A 2xx response, not yet decoded.
    Succeeded(UpstreamResponse),
    /// The last allowed attempt failed transiently.
    ExhaustedFailure { attempts: u32, last: RetryCause },
    /// A definitive non-success status.
    Rejected { status: u16 },
    Cancelled,
}

impl FetchState {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            FetchState::Attempting { .. } | FetchState::Backoff { .. }
        )
    }
}

/// Bounded linear backoff with Retry-After support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Multiplied by the attempt number for transport and 5xx failures.
    pub base_delay: Duration,
    /// Wait after a 429 without a usable Retry-After.
    pub rate_limit_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            rate_limit_wait: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Linear backoff after attempt `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.max(1))
    }

    /// Decide what follows attempt `attempt` given its result.
    pub fn after_attempt(
        &self,
        attempt: u32,
        result: Result<UpstreamResponse, TransportError>,
    ) -> FetchState {
        let (cause, wait) = match result {
            Err(e) => (RetryCause::Transport(e), self.backoff(attempt)),
            Ok(response) if response.status == 429 => {
                let wait = parse_retry_after(response.header("retry-after"))
                    .unwrap_or(self.rate_limit_wait);
                (RetryCause::RateLimited, wait)
            }
            Ok(response) if (500..600).contains(&response.status) => (
                RetryCause::ServerError(response.status),
                self.backoff(attempt),
            ),
            Ok(response) if response.is_success() => return FetchState::Succeeded(response),
            Ok(response) => {
                return FetchState::Rejected {
                    status: response.status,
                }
            }
        };

        if attempt >= self.max_attempts {
            FetchState::ExhaustedFailure {
                attempts: attempt,
                last: cause,
            }
        } else {
            FetchState::Backoff {
                attempt,
                wait,
                cause,
            }
        }
    }
}

/// Parse a `Retry-After` value given in (possibly fractional) seconds.
///
/// Returns `None` when the header is missing, negative or not a number.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    let secs: f64 = header_value?.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("2")), Some(Duration::from_secs(2)));
        assert_eq!(
            parse_retry_after(Some(" 1.5 ")),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(parse_retry_after(Some("0")), Some(Duration::ZERO));
        assert_eq!(parse_retry_after(Some("soon")), None);
        assert_eq!(parse_retry_after(Some("-3")), None);
        assert_eq!(parse_retry_after(Some("NaN")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn test_success_is_terminal() {
        let state = policy().after_attempt(1, Ok(UpstreamResponse::new(200, "{}")));
        assert!(matches!(state, FetchState::Succeeded(_)));
        assert!(state.is_terminal());
    }

    #[test]
    fn test_client_error_is_rejected() {
        for status in [400, 401, 403, 404, 301, 304] {
            let state = policy().after_attempt(1, Ok(UpstreamResponse::new(status, "")));
            assert_eq!(state, FetchState::Rejected { status });
        }
    }

    #[test]
    fn test_transport_error_backs_off_linearly() {
        let err = TransportError::Connect("refused".into());
        let state = policy().after_attempt(3, Err(err.clone()));
        assert_eq!(
            state,
            FetchState::Backoff {
                attempt: 3,
                wait: Duration::from_secs(3),
                cause: RetryCause::Transport(err),
            }
        );
    }

    #[test]
    fn test_server_error_backs_off_linearly() {
        let state = policy().after_attempt(2, Ok(UpstreamResponse::new(503, "")));
        assert_eq!(
            state,
            FetchState::Backoff {
                attempt: 2,
                wait: Duration::from_secs(2),
                cause: RetryCause::ServerError(503),
            }
        );
    }

    #[test]
    fn test_rate_limited_uses_retry_after() {
        let response = UpstreamResponse::new(429, "").with_header("Retry-After", "7");
        let state = policy().after_attempt(1, Ok(response));
        assert!(matches!(
            state,
            FetchState::Backoff {
                wait,
                cause: RetryCause::RateLimited,
                ..
            } if wait == Duration::from_secs(7)
        ));
    }

    #[test]
    fn test_rate_limited_falls_back_to_default_wait() {
        let response = UpstreamResponse::new(429, "").with_header("Retry-After", "tomorrow");
        let state = policy().after_attempt(1, Ok(response));
        assert!(matches!(
            state,
            FetchState::Backoff { wait, .. } if wait == Duration::from_secs(5)
        ));

        let state = policy().after_attempt(1, Ok(UpstreamResponse::new(429, "")));
        assert!(matches!(
            state,
            FetchState::Backoff { wait, .. } if wait == Duration::from_secs(5)
        ));
    }

    #[test]
    fn test_final_attempt_exhausts_without_backoff() {
        let state = policy().after_attempt(5, Ok(UpstreamResponse::new(500, "")));
        assert_eq!(
            state,
            FetchState::ExhaustedFailure {
                attempts: 5,
                last: RetryCause::ServerError(500),
            }
        );
        assert!(state.is_terminal());
    }
}
