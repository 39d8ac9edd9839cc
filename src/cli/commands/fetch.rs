//! One-shot fetch and reconcile.

use console::style;

use crate::cancel::Cancellation;
use crate::config::Settings;
use crate::models::CharacterFilter;

use super::super::helpers::{build_pipeline, open_database};

/// Fetch one page with `filter` and store the characters not seen before.
pub async fn cmd_fetch(
    settings: &Settings,
    filter: &CharacterFilter,
    json: bool,
) -> anyhow::Result<()> {
    let ctx = open_database(settings).await?;
    let pipeline = build_pipeline(settings, &ctx).await?;

    println!(
        "{} Fetching {}",
        style("→").cyan(),
        style(&settings.upstream_endpoint).dim()
    );

    let cancel = Cancellation::after(settings.request_timeout);
    let (page, report) = pipeline.fetch_and_sync(filter, &cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&page)?);
    }

    println!(
        "{} {} characters fetched (page count {}, total {})",
        style("✓").green(),
        page.records.len(),
        page.info.pages,
        page.info.count
    );
    println!("  {:<16} {}", "Persisted:", style(report.persisted).green());
    println!("  {:<16} {}", "Already stored:", report.already_present);
    if report.duplicates > 0 {
        println!("  {:<16} {}", "Raced:", style(report.duplicates).yellow());
    }

    Ok(())
}
