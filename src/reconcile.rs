//! Persist the fetched records the store does not have yet.
//!
//! One set query finds the missing ids, then each missing record is inserted
//! on its own. A unique violation during insert means another writer got
//! there first and counts as success.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::cancel::Cancellation;
use crate::models::UpstreamRecord;

/// Result of inserting one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same id already exists.
    Duplicate,
}

/// Errors from a record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("{0}")]
    Other(String),
}

/// Durable storage for fetched records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Ids from `ids` that are not stored yet.
    async fn find_missing(&self, ids: &BTreeSet<i64>) -> Result<BTreeSet<i64>, StoreError>;

    /// Insert one record; an existing id yields [`InsertOutcome::Duplicate`].
    async fn insert(&self, record: &UpstreamRecord) -> Result<InsertOutcome, StoreError>;
}

/// What a sync did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Rows written by this call.
    pub persisted: usize,
    /// Inserts that lost a race to another writer.
    pub duplicates: usize,
    /// Ids the diff found already stored.
    pub already_present: usize,
}

/// Errors from a sync.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("persistence failed after {inserted_before_failure} inserts: {source}")]
    Persistence {
        inserted_before_failure: usize,
        #[source]
        source: StoreError,
    },
    #[error("sync cancelled")]
    Cancelled,
}

/// Diffs fetched records against a [`RecordStore`] and persists the rest.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn RecordStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Make the store contain every record in `records`.
    ///
    /// Records committed before a failure stay committed.
    pub async fn sync(
        &self,
        records: &[UpstreamRecord],
        cancel: &Cancellation,
    ) -> Result<SyncReport, SyncError> {
        if records.is_empty() {
            return Ok(SyncReport::default());
        }

        let ids: BTreeSet<i64> = records.iter().map(UpstreamRecord::id).collect();
        let missing = cancel
            .run(self.store.find_missing(&ids))
            .await
            .map_err(|_| SyncError::Cancelled)?
            .map_err(|source| {
                error!("Failed to diff {} ids against the store: {}", ids.len(), source);
                SyncError::Persistence {
                    inserted_before_failure: 0,
                    source,
                }
            })?;

        let mut report = SyncReport {
            already_present: ids.len() - ids.intersection(&missing).count(),
            ..Default::default()
        };

        // First occurrence of each id wins
        let mut seen = HashSet::new();
        let pending = records
            .iter()
            .filter(|r| missing.contains(&r.id()) && seen.insert(r.id()));

        for record in pending {
            let outcome = cancel
                .run(self.store.insert(record))
                .await
                .map_err(|_| SyncError::Cancelled)?;

            match outcome {
                Ok(InsertOutcome::Inserted) => report.persisted += 1,
                Ok(InsertOutcome::Duplicate) => {
                    debug!("Record {} was stored concurrently", record.id());
                    report.duplicates += 1;
                }
                Err(source) => {
                    error!("Failed to store record {}: {}", record.id(), source);
                    return Err(SyncError::Persistence {
                        inserted_before_failure: report.persisted,
                        source,
                    });
                }
            }
        }

        info!(
            "Synced {} records: {} new, {} raced, {} already stored",
            ids.len(),
            report.persisted,
            report.duplicates,
            report.already_present
        );
        Ok(report)
    }
}

/// Process-local record store.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    records: Arc<RwLock<HashMap<i64, UpstreamRecord>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn ids(&self) -> BTreeSet<i64> {
        self.records.read().await.keys().copied().collect()
    }

    pub async fn get(&self, id: i64) -> Option<UpstreamRecord> {
        self.records.read().await.get(&id).cloned()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find_missing(&self, ids: &BTreeSet<i64>) -> Result<BTreeSet<i64>, StoreError> {
        let records = self.records.read().await;
        Ok(ids
            .iter()
            .filter(|id| !records.contains_key(id))
            .copied()
            .collect())
    }

    async fn insert(&self, record: &UpstreamRecord) -> Result<InsertOutcome, StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id()) {
            return Ok(InsertOutcome::Duplicate);
        }
        records.insert(record.id(), record.clone());
        Ok(InsertOutcome::Inserted)
    }
}
