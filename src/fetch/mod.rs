//! Resilient upstream fetching.
//!
//! Each attempt is judged by [`RetryPolicy::after_attempt`]; [`Fetcher`]
//! drives the resulting state machine, sleeping through an injected
//! [`Sleeper`](crate::time::Sleeper) and racing every suspension point
//! against the request's cancellation.

mod fetcher;
mod policy;
mod transport;

pub use fetcher::{FetchError, FetchTarget, Fetcher};
pub use policy::{parse_retry_after, FetchState, RetryCause, RetryPolicy};
pub use transport::{
    HttpTransport, Transport, TransportError, UpstreamResponse, DEFAULT_UPSTREAM_TIMEOUT,
    USER_AGENT,
};
