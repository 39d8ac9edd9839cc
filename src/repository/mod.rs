//! Repository layer for database persistence.
//!
//! All database access uses Diesel. SQLite is always available; PostgreSQL
//! is enabled with the `postgres` feature.

pub mod character;
pub mod context;
pub mod models;
pub mod pool;
pub mod util;

pub use character::CharacterRepository;
pub use context::DbContext;
pub use models::{CharacterRecord, NewCharacter};
pub use pool::{DbError, DbPool};
pub use util::redact_url_password;
