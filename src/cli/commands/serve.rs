//! Web server command.

use std::net::SocketAddr;

use console::style;

use crate::config::Settings;
use crate::server::{serve, AppState, Metrics};

use super::super::helpers::{build_pipeline, open_database};

/// Initialize the schema, then start the web server.
pub async fn cmd_serve(settings: &Settings, bind: Option<&str>) -> anyhow::Result<()> {
    let addr = match bind {
        Some(bind) => parse_bind_address(bind, &settings.host, settings.port)?,
        None => settings.bind_addr()?,
    };

    println!("{} Preparing database...", style("→").cyan());
    let ctx = match open_database(settings).await {
        Ok(ctx) => {
            println!("  {} Database ready", style("✓").green());
            ctx
        }
        Err(e) => {
            eprintln!("  {} Database setup failed: {}", style("✗").red(), e);
            return Err(e);
        }
    };

    let pipeline = build_pipeline(settings, &ctx).await?;
    println!(
        "  {} Rate limit {} via {}",
        style("✓").green(),
        settings.quota,
        pipeline.limiter().store().name()
    );
    if settings.api_key.is_none() {
        println!(
            "  {} No API key configured; /characters is open",
            style("!").yellow()
        );
    }

    let state = AppState::new(pipeline, ctx, Metrics::new()?, settings.request_timeout)
        .with_api_key(settings.api_key.clone());

    println!(
        "{} Starting charsync server at http://{}",
        style("→").cyan(),
        addr
    );
    println!("  Press Ctrl+C to stop");

    serve(state, addr).await
}

/// Parse a bind address that can be:
/// - Just a port: "3030" -> default_host:3030
/// - Just a host: "0.0.0.0" -> 0.0.0.0:default_port
/// - Host and port: "0.0.0.0:3030"
fn parse_bind_address(
    bind: &str,
    default_host: &str,
    default_port: u16,
) -> anyhow::Result<SocketAddr> {
    let (host, port) = match bind.parse::<u16>() {
        Ok(port) => (default_host, port),
        Err(_) => bind
            .rsplit_once(':')
            .and_then(|(host, port)| port.parse::<u16>().ok().map(|port| (host, port)))
            .unwrap_or((bind, default_port)),
    };

    format!("{}:{}", host, port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {:?}: {}", bind, e))
}
