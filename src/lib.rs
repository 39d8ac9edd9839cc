//! charsync - rate-limited character proxy.
//!
//! Each request is admitted against a quota held in a shared counter store,
//! served from the upstream character API through a retrying fetcher, and
//! reconciled so that characters not seen before are persisted exactly once.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod fetch;
pub mod identity;
pub mod models;
pub mod pipeline;
pub mod rate_limit;
pub mod reconcile;
pub mod repository;
pub mod schema;
pub mod server;
pub mod time;
