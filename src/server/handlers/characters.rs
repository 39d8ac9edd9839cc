//! Character listing through the admission and ingestion pipeline.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use super::super::error::quota_headers;
use super::super::AppState;
use crate::cancel::Cancellation;
use crate::identity::{ClientIdentity, API_KEY_HEADER, FORWARDED_FOR_HEADER, REAL_IP_HEADER};
use crate::models::CharacterFilter;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Identity for rate limiting: API key, then proxy headers, then peer address.
///
/// `X-API-Key` only counts when the auth layer has checked it against the
/// configured key.
fn client_identity(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    key_verified: bool,
) -> ClientIdentity {
    let peer = peer.map(|addr| addr.ip().to_string());
    let api_key = if key_verified {
        header(headers, API_KEY_HEADER)
    } else {
        None
    };
    ClientIdentity::derive(
        api_key,
        header(headers, REAL_IP_HEADER),
        header(headers, FORWARDED_FOR_HEADER),
        peer.as_deref(),
    )
}

/// `GET /characters?species=&status=&origin=`
pub async fn list_characters(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(filter): Query<CharacterFilter>,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let identity = client_identity(&headers, peer, state.api_key.is_some());
    let cancel = Cancellation::after(state.request_timeout);
    let started = Instant::now();
    state.metrics.record_request();

    match state.pipeline.handle(&identity, &filter, &cancel).await {
        Ok(response) => {
            state
                .metrics
                .record_success(response.page.records.len(), started.elapsed());
            tracing::debug!(
                "Served {} characters to {} ({} new)",
                response.page.records.len(),
                identity,
                response.sync.persisted
            );
            (
                StatusCode::OK,
                quota_headers(&response.quota),
                Json(response.page),
            )
                .into_response()
        }
        Err(e) => {
            state.metrics.record_error(e.kind(), started.elapsed());
            e.into_response()
        }
    }
}
