//! Database context for managing connections and repository access.

use std::path::Path;

use diesel_async::SimpleAsyncConnection;

use super::character::CharacterRepository;
use super::pool::{DbError, DbPool};
use crate::rate_limit::DieselCounterStore;

/// Holds the connection pool and hands out repositories.
///
/// ```ignore
/// let ctx = DbContext::from_url("postgres://localhost/charsync")?;
/// ctx.init_schema().await?;
/// let stored = ctx.characters().count().await?;
/// ```
#[derive(Clone)]
pub struct DbContext {
    pool: DbPool,
}

impl DbContext {
    /// Create a context from a database file path (SQLite only).
    pub fn new(db_path: &Path) -> Self {
        Self {
            pool: DbPool::sqlite_from_path(db_path),
        }
    }

    /// Create a context from a database URL.
    ///
    /// Supports:
    /// - SQLite: file paths or `sqlite:` URLs
    /// - PostgreSQL: `postgres://` or `postgresql://` URLs
    pub fn from_url(url: &str) -> Result<Self, DbError> {
        Ok(Self {
            pool: DbPool::from_url(url)?,
        })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Get the character repository.
    pub fn characters(&self) -> CharacterRepository {
        CharacterRepository::new(self.pool.clone())
    }

    /// Get a rate limit counter store sharing this database.
    pub fn counters(&self) -> DieselCounterStore {
        DieselCounterStore::new(self.pool.clone())
    }

    /// Create tables if they don't exist.
    pub async fn init_schema(&self) -> Result<(), DbError> {
        crate::with_conn_split!(self.pool,
            sqlite: conn => {
                init_sqlite_schema(&mut conn).await
            },
            postgres: conn => {
                init_postgres_schema(&mut conn).await
            }
        )
    }

    /// Run a trivial query to check the database is reachable.
    pub async fn test_connection(&self) -> Result<(), DbError> {
        self.characters().ping().await
    }
}

async fn init_sqlite_schema(conn: &mut super::pool::SqliteConn) -> Result<(), DbError> {
    conn.batch_execute(include_str!("schema_sqlite.sql")).await
}

#[cfg(feature = "postgres")]
async fn init_postgres_schema(conn: &mut diesel_async::AsyncPgConnection) -> Result<(), DbError> {
    use diesel_async::RunQueryDsl;

    // PostgreSQL needs statements executed separately
    for stmt in include_str!("schema_postgres.sql").split(';') {
        let stmt = stmt.trim();
        if !stmt.is_empty() {
            diesel::sql_query(stmt).execute(conn).await?;
        }
    }
    Ok(())
}
