// Trait boundaries for the pipeline.
//
// Five seams, each with a production adapter and a mock in `testing`:
// - ContentSource: batch of candidate items (Apify tweet search)
// - SummaryGenerator: item → Markdown section (Gemini)
// - PublishTarget: document → numbered file in a repository (GitHub), then
//   a best-effort follow-up such as an index page
// - NotificationSink: run outcome → webhook (Discord, Slack, noop)
// - RunStore: dedup ledger, per-destination sequences, run lock (Postgres, memory)

use std::collections::HashSet;

use async_trait::async_trait;
use uuid::Uuid;

use threadpress_common::{
    Destination, Item, ItemStatus, PipelineError, ProcessedItem, PublicationClaim, PublishResult,
    RunStats, UpsertOutcome,
};

use crate::store::StoreError;

/// Items returned by one fetch, with the destination they were discovered for.
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    pub items: Vec<Item>,
    pub destination: Option<Destination>,
}

impl SourceBatch {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            destination: None,
        }
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = Some(destination);
        self
    }
}

/// Fetches candidate items. May return fewer than requested.
///
/// Implementations skip items the store already marks `processed`; the
/// orchestrator re-checks regardless.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(&self, batch_size_hint: usize) -> Result<SourceBatch, PipelineError>;
}

/// Turns raw items into formatted sections.
///
/// Individual items may be dropped. `GenerationFailure` only when nothing in
/// the batch is usable.
#[async_trait]
pub trait SummaryGenerator: Send + Sync {
    async fn summarize(&self, items: &[Item]) -> Result<Vec<ProcessedItem>, PipelineError>;
}

/// Writes a document to a versioned store.
///
/// The sequence number is allocated inside `publish`, so a retried call never
/// reuses one.
#[async_trait]
pub trait PublishTarget: Send + Sync {
    async fn publish(
        &self,
        text: &str,
        destination: &Destination,
    ) -> Result<PublishResult, PipelineError>;

    /// Follow-up work once `published` is committed. Runs outside the publish
    /// stage budget; an error here never changes the run outcome.
    async fn finalize(
        &self,
        _published: &PublishResult,
        _destination: &Destination,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Delivers the outcome of a run. Failures are logged by the caller, never propagated.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, stats: &RunStats) -> anyhow::Result<()>;
}

/// Durable ledger of seen items and per-destination counters.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn has(&self, id: &str) -> Result<bool, StoreError>;

    async fn status(&self, id: &str) -> Result<Option<ItemStatus>, StoreError>;

    /// Ids among `ids` whose status is `processed` or `failed`.
    async fn terminal_ids(&self, ids: &[String]) -> Result<HashSet<String>, StoreError>;

    /// Idempotent write. Never creates a second record for an id, never
    /// downgrades a terminal status.
    async fn upsert(&self, item: &Item, status: ItemStatus) -> Result<UpsertOutcome, StoreError>;

    /// Writes each processed item's status and summary, and marks `failed`
    /// items, in one unit. Terminal records are left as they are.
    async fn record_outcomes(
        &self,
        processed: &[ProcessedItem],
        failed: &[Item],
    ) -> Result<(), StoreError>;

    /// Journals a batch about to be published.
    async fn claim_publication(&self, claim: &PublicationClaim) -> Result<(), StoreError>;

    /// Drops a claim whose document is known not to have been published.
    async fn release_publication(&self, claim_id: Uuid) -> Result<(), StoreError>;

    /// Records the claim's item outcomes and removes the claim in one unit.
    /// Settling a claim that is already gone still records the outcomes.
    async fn settle_publication(&self, claim: &PublicationClaim) -> Result<(), StoreError>;

    /// Claims neither settled nor released, oldest first.
    async fn open_publications(&self) -> Result<Vec<PublicationClaim>, StoreError>;

    /// Next unused positive integer for `destination`.
    async fn allocate_sequence(&self, destination: &Destination) -> Result<u64, StoreError> {
        self.allocate_sequence_after(destination, 0).await
    }

    /// Next unused integer strictly greater than both the stored counter and `floor`.
    async fn allocate_sequence_after(
        &self,
        destination: &Destination,
        floor: u64,
    ) -> Result<u64, StoreError>;

    /// Cross-process run exclusion. `false` when another holder owns the lock.
    async fn try_acquire_run_lock(&self, holder: &str) -> Result<bool, StoreError>;

    async fn release_run_lock(&self, holder: &str) -> Result<(), StoreError>;
}
