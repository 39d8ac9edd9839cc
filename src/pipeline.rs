//! Request admission and ingestion pipeline.
//!
//! admit → fetch → reconcile, all under one [`Cancellation`].

use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::cancel::Cancellation;
use crate::fetch::{FetchError, FetchTarget, Fetcher};
use crate::identity::ClientIdentity;
use crate::models::{CharacterFilter, FetchPage};
use crate::rate_limit::{LimiterError, QuotaState, RateLimiter};
use crate::reconcile::{Reconciler, SyncError, SyncReport};

/// Stable classification of pipeline failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    LimiterUnavailable,
    AdmissionDenied,
    FetchTransient,
    FetchRejected,
    Cancelled,
    PersistenceFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::LimiterUnavailable => "limiter_unavailable",
            ErrorKind::AdmissionDenied => "admission_denied",
            ErrorKind::FetchTransient => "fetch_transient",
            ErrorKind::FetchRejected => "fetch_rejected",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::PersistenceFailed => "persistence_failed",
        }
    }
}

/// Errors from [`Pipeline::handle`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("rate limit exceeded for {identity}")]
    Denied { identity: String, quota: QuotaState },
    #[error(transparent)]
    Limiter(#[from] LimiterError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Denied { .. } => ErrorKind::AdmissionDenied,
            PipelineError::Limiter(LimiterError::Cancelled) => ErrorKind::Cancelled,
            PipelineError::Limiter(_) => ErrorKind::LimiterUnavailable,
            PipelineError::Fetch(FetchError::Cancelled) => ErrorKind::Cancelled,
            PipelineError::Fetch(FetchError::Exhausted { .. }) => ErrorKind::FetchTransient,
            PipelineError::Fetch(FetchError::Rejected { .. } | FetchError::Malformed(_)) => {
                ErrorKind::FetchRejected
            }
            PipelineError::Sync(SyncError::Cancelled) => ErrorKind::Cancelled,
            PipelineError::Sync(SyncError::Persistence { .. }) => ErrorKind::PersistenceFailed,
        }
    }

    /// Quota state to report with the error, when admission was decided.
    pub fn quota(&self) -> Option<&QuotaState> {
        match self {
            PipelineError::Denied { quota, .. } => Some(quota),
            _ => None,
        }
    }
}

/// Result of a successful request.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResponse {
    pub page: FetchPage,
    pub quota: QuotaState,
    pub sync: SyncReport,
}

/// The admission and ingestion pipeline.
#[derive(Clone)]
pub struct Pipeline {
    limiter: RateLimiter,
    fetcher: Fetcher,
    reconciler: Reconciler,
    endpoint: Url,
}

impl Pipeline {
    pub fn new(
        limiter: RateLimiter,
        fetcher: Fetcher,
        reconciler: Reconciler,
        endpoint: Url,
    ) -> Self {
        Self {
            limiter,
            fetcher,
            reconciler,
            endpoint,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Admit, fetch and reconcile one request.
    ///
    /// A denied request never reaches the fetcher or the store.
    pub async fn handle(
        &self,
        identity: &ClientIdentity,
        filter: &CharacterFilter,
        cancel: &Cancellation,
    ) -> Result<PipelineResponse, PipelineError> {
        let quota = self.limiter.admit(identity, cancel).await?;
        if !quota.admitted {
            return Err(PipelineError::Denied {
                identity: identity.to_string(),
                quota,
            });
        }

        let (page, sync) = self.fetch_and_sync(filter, cancel).await?;
        Ok(PipelineResponse { page, quota, sync })
    }

    /// Fetch and reconcile without admission.
    pub async fn fetch_and_sync(
        &self,
        filter: &CharacterFilter,
        cancel: &Cancellation,
    ) -> Result<(FetchPage, SyncReport), PipelineError> {
        let target = FetchTarget::new(self.endpoint.clone(), filter.clone());
        let page = self.fetcher.fetch(&target, cancel).await?;
        let sync = self.reconciler.sync(&page.records, cancel).await?;
        debug!(
            "Request complete: {} records, {} persisted",
            page.records.len(),
            sync.persisted
        );
        Ok((page, sync))
    }
}
