//! API key check for protected routes.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::AppState;
use crate::identity::API_KEY_HEADER;

/// Reject requests without the configured `X-API-Key`.
///
/// Passes everything through when no key is configured.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = state.api_key.as_deref() {
        let provided = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());

        if provided != Some(expected) {
            tracing::debug!(
                "Rejecting request to {}: {} API key",
                request.uri().path(),
                if provided.is_some() { "invalid" } else { "missing" }
            );
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": "missing or invalid API key",
                    "kind": "unauthorized",
                })),
            )
                .into_response();
        }
    }

    next.run(request).await
}
