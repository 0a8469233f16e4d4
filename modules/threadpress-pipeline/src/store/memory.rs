use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::warn;
use uuid::Uuid;

use threadpress_common::{
    Destination, Item, ItemStatus, ProcessedItem, PublicationClaim, UpsertOutcome,
};

use super::{StoreError, STALE_LOCK_MINUTES};
use crate::traits::RunStore;

#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub item: Item,
    pub status: ItemStatus,
    pub summary: Option<String>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, StoredRecord>,
    url_index: HashMap<String, String>,
    sequences: HashMap<Destination, u64>,
    claims: Vec<PublicationClaim>,
    lock: Option<(String, DateTime<Utc>)>,
}

impl Inner {
    fn write_outcomes(&mut self, processed: &[ProcessedItem], failed: &[Item]) {
        for p in processed {
            if let Some(record) = self.records.get_mut(&p.item.id) {
                if !record.status.is_terminal() {
                    record.status = p.status;
                    record.summary = Some(p.summary.clone());
                }
            }
        }
        for item in failed {
            if let Some(record) = self.records.get_mut(&item.id) {
                record.status = record.status.merge(ItemStatus::Failed);
            }
        }
    }
}

/// In-memory [`RunStore`] with the same contract as the Postgres store.
#[derive(Default)]
pub struct MemoryRunStore {
    inner: Mutex<Inner>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an item with a status, bypassing upsert rules.
    pub fn with_item(self, item: Item, status: ItemStatus) -> Self {
        {
            let mut inner = self.lock_inner();
            inner.url_index.insert(item.url.clone(), item.id.clone());
            inner.records.insert(
                item.id.clone(),
                StoredRecord {
                    item,
                    status,
                    summary: None,
                },
            );
        }
        self
    }

    /// Seed a destination counter.
    pub fn with_sequence(self, destination: Destination, last_value: u64) -> Self {
        self.lock_inner().sequences.insert(destination, last_value);
        self
    }

    pub fn record(&self, id: &str) -> Option<StoredRecord> {
        self.lock_inner().records.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_inner().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids_with_status(&self, status: ItemStatus) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock_inner()
            .records
            .values()
            .filter(|r| r.status == status)
            .map(|r| r.item.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn lock_holder(&self) -> Option<String> {
        self.lock_inner().lock.as_ref().map(|(holder, _)| holder.clone())
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn has(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.lock_inner().records.contains_key(id))
    }

    async fn status(&self, id: &str) -> Result<Option<ItemStatus>, StoreError> {
        Ok(self.lock_inner().records.get(id).map(|r| r.status))
    }

    async fn terminal_ids(&self, ids: &[String]) -> Result<HashSet<String>, StoreError> {
        let inner = self.lock_inner();
        Ok(ids
            .iter()
            .filter(|id| {
                inner
                    .records
                    .get(id.as_str())
                    .is_some_and(|r| r.status.is_terminal())
            })
            .cloned()
            .collect())
    }

    async fn upsert(&self, item: &Item, status: ItemStatus) -> Result<UpsertOutcome, StoreError> {
        let mut inner = self.lock_inner();

        if let Some(record) = inner.records.get_mut(&item.id) {
            let merged = record.status.merge(status);
            if merged == record.status {
                return Ok(UpsertOutcome::Unchanged);
            }
            record.status = merged;
            return Ok(UpsertOutcome::Updated);
        }

        if let Some(owner) = inner.url_index.get(&item.url) {
            warn!(id = %item.id, owner = %owner, url = %item.url, "Duplicate url under a different id, skipping");
            return Ok(UpsertOutcome::Duplicate);
        }

        inner.url_index.insert(item.url.clone(), item.id.clone());
        inner.records.insert(
            item.id.clone(),
            StoredRecord {
                item: item.clone(),
                status,
                summary: None,
            },
        );
        Ok(UpsertOutcome::Inserted)
    }

    async fn record_outcomes(
        &self,
        processed: &[ProcessedItem],
        failed: &[Item],
    ) -> Result<(), StoreError> {
        self.lock_inner().write_outcomes(processed, failed);
        Ok(())
    }

    async fn claim_publication(&self, claim: &PublicationClaim) -> Result<(), StoreError> {
        let mut inner = self.lock_inner();
        if !inner.claims.iter().any(|c| c.id == claim.id) {
            inner.claims.push(claim.clone());
        }
        Ok(())
    }

    async fn release_publication(&self, claim_id: Uuid) -> Result<(), StoreError> {
        self.lock_inner().claims.retain(|c| c.id != claim_id);
        Ok(())
    }

    async fn settle_publication(&self, claim: &PublicationClaim) -> Result<(), StoreError> {
        let mut inner = self.lock_inner();
        inner.write_outcomes(&claim.sections, &claim.failed);
        inner.claims.retain(|c| c.id != claim.id);
        Ok(())
    }

    async fn open_publications(&self) -> Result<Vec<PublicationClaim>, StoreError> {
        Ok(self.lock_inner().claims.clone())
    }

    async fn allocate_sequence_after(
        &self,
        destination: &Destination,
        floor: u64,
    ) -> Result<u64, StoreError> {
        let mut inner = self.lock_inner();
        let counter = inner.sequences.entry(destination.clone()).or_insert(0);
        *counter = (*counter).max(floor) + 1;
        Ok(*counter)
    }

    async fn try_acquire_run_lock(&self, holder: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock_inner();
        let now = Utc::now();
        if let Some((_, acquired_at)) = &inner.lock {
            if now - *acquired_at < Duration::minutes(STALE_LOCK_MINUTES) {
                return Ok(false);
            }
            warn!("Clearing stale run lock");
        }
        inner.lock = Some((holder.to_string(), now));
        Ok(true)
    }

    async fn release_run_lock(&self, holder: &str) -> Result<(), StoreError> {
        let mut inner = self.lock_inner();
        if inner.lock.as_ref().is_some_and(|(h, _)| h == holder) {
            inner.lock = None;
        }
        Ok(())
    }
}
