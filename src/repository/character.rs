//! Diesel-backed character repository.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::{CharacterRecord, NewCharacter};
use super::pool::{DbError, DbPool};
use super::util::is_unique_violation;
use crate::models::UpstreamRecord;
use crate::reconcile::{InsertOutcome, RecordStore, StoreError};
use crate::schema::characters;
use crate::with_conn;

/// Insert-only store of fetched characters.
#[derive(Clone)]
pub struct CharacterRepository {
    pool: DbPool,
}

impl CharacterRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get a character by id.
    pub async fn get(&self, id: i64) -> Result<Option<CharacterRecord>, DbError> {
        with_conn!(self.pool, conn => {
            characters::table
                .find(id)
                .select(CharacterRecord::as_select())
                .first(&mut conn)
                .await
                .optional()
        })
    }

    /// Ids from `ids` that are already stored.
    pub async fn existing_ids(&self, ids: &BTreeSet<i64>) -> Result<BTreeSet<i64>, DbError> {
        if ids.is_empty() {
            return Ok(BTreeSet::new());
        }
        let candidates: Vec<i64> = ids.iter().copied().collect();

        let found: Vec<i64> = with_conn!(self.pool, conn => {
            characters::table
                .filter(characters::id.eq_any(&candidates))
                .select(characters::id)
                .load(&mut conn)
                .await?
        });

        Ok(found.into_iter().collect())
    }

    /// Insert one character, reporting whether it was new.
    pub async fn insert_record(&self, record: &UpstreamRecord) -> Result<InsertOutcome, DbError> {
        let payload = record.to_json();
        let fetched_at = Utc::now().to_rfc3339();
        let row = NewCharacter {
            id: record.id(),
            name: record.name(),
            payload: &payload,
            fetched_at: &fetched_at,
        };

        let result = with_conn!(self.pool, conn => {
            diesel::insert_into(characters::table)
                .values(&row)
                .execute(&mut conn)
                .await
        });

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) if is_unique_violation(&e) => Ok(InsertOutcome::Duplicate),
            Err(e) => Err(e),
        }
    }

    /// Number of stored characters.
    pub async fn count(&self) -> Result<u64, DbError> {
        let count: i64 = with_conn!(self.pool, conn => {
            characters::table.count().get_result(&mut conn).await?
        });
        Ok(count.max(0) as u64)
    }

    /// Check the database answers a trivial query.
    pub async fn ping(&self) -> Result<(), DbError> {
        self.count().await.map(|_| ())
    }
}

#[async_trait]
impl RecordStore for CharacterRepository {
    async fn find_missing(&self, ids: &BTreeSet<i64>) -> Result<BTreeSet<i64>, StoreError> {
        let existing = self.existing_ids(ids).await?;
        Ok(ids.difference(&existing).copied().collect())
    }

    async fn insert(&self, record: &UpstreamRecord) -> Result<InsertOutcome, StoreError> {
        Ok(self.insert_record(record).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::DbContext;
    use serde_json::json;
    use tempfile::tempdir;

    async fn setup() -> (tempfile::TempDir, CharacterRepository) {
        let dir = tempdir().unwrap();
        let ctx = DbContext::new(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        (dir, ctx.characters())
    }

    fn record(id: i64, name: &str) -> UpstreamRecord {
        UpstreamRecord::from_value(json!({
            "id": id,
            "name": name,
            "species": "Human",
            "origin": {"name": "Earth (C-137)"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let (_dir, repo) = setup().await;

        let outcome = repo.insert_record(&record(1, "Rick Sanchez")).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);

        let stored = repo.get(1).await.unwrap().unwrap();
        assert_eq!(stored.name.as_deref(), Some("Rick Sanchez"));

        let upstream = stored.to_upstream().unwrap();
        assert_eq!(upstream.attributes()["origin"]["name"], "Earth (C-137)");
        assert!(repo.get(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_absorbed() {
        let (_dir, repo) = setup().await;

        repo.insert_record(&record(1, "Rick Sanchez")).await.unwrap();
        let outcome = repo.insert_record(&record(1, "Another Rick")).await.unwrap();

        assert_eq!(outcome, InsertOutcome::Duplicate);
        assert_eq!(repo.count().await.unwrap(), 1);
        // First write wins
        let stored = repo.get(1).await.unwrap().unwrap();
        assert_eq!(stored.name.as_deref(), Some("Rick Sanchez"));
    }

    #[tokio::test]
    async fn test_find_missing() {
        let (_dir, repo) = setup().await;
        repo.insert_record(&record(2, "Morty Smith")).await.unwrap();

        let missing = repo
            .find_missing(&BTreeSet::from([1, 2, 3]))
            .await
            .unwrap();
        assert_eq!(missing, BTreeSet::from([1, 3]));

        let none = repo.find_missing(&BTreeSet::new()).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_missing_schema_is_an_error() {
        let dir = tempdir().unwrap();
        let repo = DbContext::new(&dir.path().join("empty.db")).characters();

        let err = repo.find_missing(&BTreeSet::from([1])).await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
    }
}
