//! Component wiring shared by CLI commands.

use std::sync::Arc;

use crate::config::{RateLimitBackend, Settings};
use crate::fetch::{Fetcher, HttpTransport};
use crate::pipeline::Pipeline;
use crate::rate_limit::{BoxedCounterStore, InMemoryCounterStore, RateLimiter};
use crate::reconcile::Reconciler;
use crate::repository::{redact_url_password, DbContext};

/// Open the configured database and make sure the schema exists.
pub async fn open_database(settings: &Settings) -> anyhow::Result<DbContext> {
    let ctx = DbContext::from_url(&settings.database_url).map_err(|e| {
        anyhow::anyhow!(
            "Failed to open database {}: {}",
            redact_url_password(&settings.database_url),
            e
        )
    })?;
    ctx.init_schema().await?;
    Ok(ctx)
}

/// Create the counter store selected by `rate_limit_backend`.
pub async fn create_counter_store(
    settings: &Settings,
    ctx: &DbContext,
) -> anyhow::Result<BoxedCounterStore> {
    match &settings.rate_limit_backend {
        RateLimitBackend::Memory => {
            tracing::warn!("In-memory rate limiting: quotas are not shared between instances");
            Ok(Arc::new(InMemoryCounterStore::new()))
        }
        RateLimitBackend::Database => Ok(Arc::new(ctx.counters())),
        #[cfg(feature = "redis-backend")]
        RateLimitBackend::Redis(url) => {
            let store = crate::rate_limit::RedisCounterStore::connect(url).await?;
            tracing::info!("Using Redis rate limiting at {}", redact_url_password(url));
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis-backend"))]
        RateLimitBackend::Redis(_) => Err(anyhow::anyhow!(
            "Redis rate limiting requires charsync built with the `redis-backend` feature"
        )),
    }
}

/// Build the admission and ingestion pipeline from settings.
pub async fn build_pipeline(settings: &Settings, ctx: &DbContext) -> anyhow::Result<Pipeline> {
    let store = create_counter_store(settings, ctx).await?;
    let limiter =
        RateLimiter::new(store, settings.quota).with_store_timeout(settings.store_timeout);

    let transport = match settings.user_agent.as_deref() {
        Some(ua) => HttpTransport::with_user_agent(settings.upstream_timeout, ua)?,
        None => HttpTransport::new(settings.upstream_timeout)?,
    };
    let fetcher = Fetcher::new(Arc::new(transport));
    let reconciler = Reconciler::new(Arc::new(ctx.characters()));

    Ok(Pipeline::new(
        limiter,
        fetcher,
        reconciler,
        settings.upstream_endpoint.clone(),
    ))
}
