//! Initialize command.

use console::style;

use crate::config::Settings;
use crate::repository::redact_url_password;

use super::super::helpers::open_database;

/// Create the database schema.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    let ctx = open_database(settings).await?;
    let stored = ctx.characters().count().await?;

    println!(
        "{} Initialized database at {} ({} characters stored)",
        style("✓").green(),
        redact_url_password(&settings.database_url),
        stored
    );

    Ok(())
}
