//! HTTP request handlers for the web server.

mod characters;
mod health;
mod metrics;

pub use characters::list_characters;
pub use health::healthcheck;
pub use metrics::metrics;
