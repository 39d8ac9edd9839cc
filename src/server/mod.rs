//! HTTP surface for the character pipeline.
//!
//! - `GET /characters` admits, fetches and reconciles one page
//! - `GET /healthcheck` reports database and counter store reachability
//! - `GET /metrics` exposes request counters for Prometheus

mod auth;
mod error;
mod handlers;
mod metrics;
mod routes;

pub use metrics::Metrics;
pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::pipeline::Pipeline;
use crate::rate_limit::BoxedCounterStore;
use crate::repository::DbContext;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub db: DbContext,
    pub metrics: Arc<Metrics>,
    /// Required `X-API-Key` value, if any.
    pub api_key: Option<Arc<str>>,
    /// Deadline for one `/characters` request.
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(
        pipeline: Pipeline,
        db: DbContext,
        metrics: Metrics,
        request_timeout: Duration,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            db,
            metrics: Arc::new(metrics),
            api_key: None,
            request_timeout,
        }
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.is_empty()).map(Arc::from);
        self
    }

    pub fn counters(&self) -> &BoxedCounterStore {
        self.pipeline.limiter().store()
    }
}

/// Start the web server and run until Ctrl+C or SIGTERM.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting server at http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
