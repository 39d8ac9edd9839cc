//! Mapping of pipeline failures onto HTTP responses.

use axum::{
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::pipeline::{ErrorKind, PipelineError};
use crate::rate_limit::QuotaState;

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// `X-RateLimit-*` headers for a decided admission.
pub fn quota_headers(quota: &QuotaState) -> [(HeaderName, HeaderValue); 3] {
    [
        (RATE_LIMIT_LIMIT, HeaderValue::from(quota.limit)),
        (RATE_LIMIT_REMAINING, HeaderValue::from(quota.remaining)),
        (RATE_LIMIT_RESET, HeaderValue::from(quota.reset_unix())),
    ]
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::AdmissionDenied => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::LimiterUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Cancelled => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::FetchTransient | ErrorKind::FetchRejected | ErrorKind::PersistenceFailed => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            tracing::warn!("Request failed ({}): {}", kind.as_str(), error_chain(&self));
        }

        let body = Json(json!({
            "error": self.to_string(),
            "kind": kind,
        }));

        match self.quota() {
            Some(quota) => (status, quota_headers(quota), body).into_response(),
            None => (status, body).into_response(),
        }
    }
}

/// `error: cause: cause` rendering of an error and its sources.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::AdmissionDenied), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(ErrorKind::LimiterUnavailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorKind::Cancelled), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(ErrorKind::FetchTransient), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(ErrorKind::FetchRejected), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(ErrorKind::PersistenceFailed), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_chain_includes_sources() {
        use crate::reconcile::{StoreError, SyncError};

        let err = PipelineError::from(SyncError::Persistence {
            inserted_before_failure: 2,
            source: StoreError::Other("disk full".into()),
        });
        assert!(error_chain(&err).ends_with("disk full"));
    }
}
