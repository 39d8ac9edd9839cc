//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};

/// Serve `router` on an ephemeral localhost port.
pub async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// A character listing page in the upstream envelope.
pub fn page(ids: &[i64]) -> Value {
    let results: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "name": format!("Character {}", id),
                "species": "Human",
                "status": "Alive",
                "origin": {"name": "Earth (C-137)"}
            })
        })
        .collect();

    json!({
        "info": {"count": ids.len(), "pages": 1, "next": null, "prev": null},
        "results": results,
    })
}

/// Fake character API that records hits and query strings.
#[derive(Clone, Default)]
pub struct FakeUpstream {
    pub hits: Arc<AtomicUsize>,
    pub queries: Arc<Mutex<Vec<String>>>,
    ids: Arc<Vec<i64>>,
}

impl FakeUpstream {
    pub fn new(ids: &[i64]) -> Self {
        Self {
            ids: Arc::new(ids.to_vec()),
            ..Self::default()
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    /// Start serving `/api/character`, returning the endpoint URL.
    pub async fn start(&self) -> url::Url {
        let router = Router::new()
            .route("/api/character", get(list_characters))
            .with_state(self.clone());
        let addr = spawn(router).await;
        url::Url::parse(&format!("http://{}/api/character", addr)).unwrap()
    }
}

async fn list_characters(
    State(upstream): State<FakeUpstream>,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    upstream.hits.fetch_add(1, Ordering::SeqCst);
    upstream
        .queries
        .lock()
        .unwrap()
        .push(query.unwrap_or_default());
    (StatusCode::OK, axum::Json(page(&upstream.ids)))
}
