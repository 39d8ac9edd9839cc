//! charsync - rate-limited character proxy.
//!
//! Serves upstream character listings behind a shared per-client quota and
//! mirrors every character it sees into a local database.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if charsync::cli::is_verbose() {
        "charsync=debug,tower_http=debug"
    } else {
        "charsync=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    charsync::cli::run().await
}
