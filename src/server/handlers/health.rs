//! Health check endpoint for container orchestration.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use super::super::AppState;

/// Upper bound on each dependency check.
const CHECK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub database: &'static str,
    pub rate_limiter: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub checks: HealthChecks,
}

/// `"ok"` or `"error"`; failure details go to the log only.
async fn run_check<F, E>(name: &str, check: F) -> &'static str
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    match tokio::time::timeout(CHECK_TIMEOUT, check).await {
        Ok(Ok(())) => "ok",
        Ok(Err(e)) => {
            tracing::warn!("Health check {} failed: {}", name, e);
            "error"
        }
        Err(_) => {
            tracing::warn!("Health check {} timed out after {:?}", name, CHECK_TIMEOUT);
            "error"
        }
    }
}

/// `GET /healthcheck`
pub async fn healthcheck(State(state): State<AppState>) -> impl IntoResponse {
    let counters = state.counters();
    let (database, rate_limiter) = tokio::join!(
        run_check("database", state.db.test_connection()),
        run_check(counters.name(), counters.ping()),
    );

    let healthy = database == "ok" && rate_limiter == "ok";
    let report = HealthReport {
        status: if healthy { "ok" } else { "error" },
        checks: HealthChecks {
            database,
            rate_limiter,
        },
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(report))
}
