// Test mocks for the pipeline.
//
// Four mocks matching the trait boundaries (the store uses MemoryRunStore):
// - MockSource (ContentSource): scripted batches and failures
// - MockGenerator (SummaryGenerator): deterministic sections, droppable ids
// - MockPublisher (PublishTarget): records documents, per-destination counters
// - MockNotifier (NotificationSink): records every RunStats it receives
//
// FlakyStore wraps a MemoryRunStore and fails settling on demand.
//
// Plus helpers for items, stats, and fast retry settings.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use threadpress_common::{
    Destination, ErrorKind, ErrorRecord, Item, ItemStatus, PipelineError, ProcessedItem,
    PublicationClaim, PublishResult, RunOutcome, RunStats, StageTimeouts, UpsertOutcome,
};

use crate::orchestrator::{PipelineDeps, PipelineOrchestrator, PipelineSettings};
use crate::retry::RetryPolicy;
use crate::store::{MemoryRunStore, StoreError};
use crate::traits::{
    ContentSource, NotificationSink, PublishTarget, RunStore, SourceBatch, SummaryGenerator,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// An item with enough text to pass the thread filter.
pub fn item(id: &str) -> Item {
    let mut item = Item::stub(id);
    item.raw_text = format!("🧵 Thread {id}: a long list of tools and links worth keeping around.");
    item.links = vec![format!("https://example.com/{id}")];
    item
}

pub fn items(ids: &[&str]) -> Vec<Item> {
    ids.iter().map(|id| item(id)).collect()
}

/// A summarized item already marked `processed`.
pub fn processed(id: &str) -> ProcessedItem {
    let mut p = ProcessedItem::new(item(id), format!("### 📝 {id}"));
    p.mark(ItemStatus::Processed);
    p
}

pub fn error_record(attempt: u32, kind: ErrorKind, message: &str) -> ErrorRecord {
    ErrorRecord {
        attempt,
        kind,
        message: message.to_string(),
        at: Utc::now(),
    }
}

pub fn stats_with(outcome: RunOutcome) -> RunStats {
    let now = Utc::now();
    RunStats {
        run_id: Uuid::new_v4(),
        started_at: now,
        ended_at: now,
        items_found: 0,
        items_processed: 0,
        items_published: 0,
        errors: Vec::new(),
        retry_count: 0,
        max_attempts: 3,
        outcome,
        publish: None,
    }
}

/// Settings with millisecond backoff so retry tests stay fast.
pub fn fast_settings(batch_size: usize, min_batch_size: usize) -> PipelineSettings {
    PipelineSettings::builder()
        .batch_size(batch_size)
        .min_batch_size(min_batch_size)
        .retry(RetryPolicy::new(3, Duration::from_millis(1)))
        .timeouts(StageTimeouts::default())
        .build()
}

/// Handles to every mock behind an orchestrator.
pub struct Harness {
    pub source: Arc<MockSource>,
    pub generator: Arc<MockGenerator>,
    pub publisher: Arc<MockPublisher>,
    pub notifier: Arc<MockNotifier>,
    pub store: Arc<MemoryRunStore>,
}

impl Harness {
    pub fn new(source: MockSource) -> Self {
        Self {
            source: Arc::new(source),
            generator: Arc::new(MockGenerator::new()),
            publisher: Arc::new(MockPublisher::new()),
            notifier: Arc::new(MockNotifier::new()),
            store: Arc::new(MemoryRunStore::new()),
        }
    }

    pub fn with_generator(mut self, generator: MockGenerator) -> Self {
        self.generator = Arc::new(generator);
        self
    }

    pub fn with_publisher(mut self, publisher: MockPublisher) -> Self {
        self.publisher = Arc::new(publisher);
        self
    }

    pub fn with_notifier(mut self, notifier: MockNotifier) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    pub fn with_store(mut self, store: MemoryRunStore) -> Self {
        self.store = Arc::new(store);
        self
    }

    pub fn orchestrator(&self, settings: PipelineSettings) -> PipelineOrchestrator {
        self.orchestrator_with_store(settings, self.store.clone())
    }

    /// Same mocks, with `store` in front of the orchestrator (e.g. a [`FlakyStore`]
    /// wrapping `self.store`).
    pub fn orchestrator_with_store(
        &self,
        settings: PipelineSettings,
        store: Arc<dyn RunStore>,
    ) -> PipelineOrchestrator {
        let deps = PipelineDeps::builder()
            .source(self.source.clone())
            .generator(self.generator.clone())
            .publisher(self.publisher.clone())
            .notifier(self.notifier.clone())
            .store(store)
            .build();
        PipelineOrchestrator::new(deps, settings)
    }
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

/// Replays scripted fetch results in order; an exhausted script yields empty batches.
pub struct MockSource {
    script: Mutex<VecDeque<(Option<Duration>, Result<SourceBatch, PipelineError>)>>,
    fallback: Option<PipelineError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn then_return(self, items: Vec<Item>) -> Self {
        self.then_return_batch(SourceBatch::new(items))
    }

    pub fn then_return_batch(self, batch: SourceBatch) -> Self {
        self.script.lock().unwrap().push_back((None, Ok(batch)));
        self
    }

    /// Answers with `items` only after `delay`.
    pub fn then_return_after(self, delay: Duration, items: Vec<Item>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back((Some(delay), Ok(SourceBatch::new(items))));
        self
    }

    pub fn then_fail(self, err: PipelineError) -> Self {
        self.script.lock().unwrap().push_back((None, Err(err)));
        self
    }

    /// Every call past the script fails with `err`.
    pub fn always_fail(mut self, err: PipelineError) -> Self {
        self.fallback = Some(err);
        self
    }

    /// Sleeps before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentSource for MockSource {
    async fn fetch(&self, _batch_size_hint: usize) -> Result<SourceBatch, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some((delay, result)) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                result
            }
            None => match &self.fallback {
                Some(err) => Err(err.clone()),
                None => Ok(SourceBatch::default()),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// MockGenerator
// ---------------------------------------------------------------------------

/// Produces `### 📝 {id}` sections. Ids in `drop` are silently left out,
/// ids in `blank` get an empty summary.
pub struct MockGenerator {
    drop: HashSet<String>,
    blank: HashSet<String>,
    failures: Mutex<VecDeque<PipelineError>>,
    reverse: bool,
    delay: Option<Duration>,
    batches: Mutex<Vec<Vec<String>>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            drop: HashSet::new(),
            blank: HashSet::new(),
            failures: Mutex::new(VecDeque::new()),
            reverse: false,
            delay: None,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn dropping(mut self, ids: &[&str]) -> Self {
        self.drop.extend(ids.iter().map(|s| s.to_string()));
        self
    }

    pub fn blanking(mut self, ids: &[&str]) -> Self {
        self.blank.extend(ids.iter().map(|s| s.to_string()));
        self
    }

    /// Sleeps before answering each batch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The next call fails with `err`. Queued failures are consumed in order.
    pub fn fail_next(self, err: PipelineError) -> Self {
        self.failures.lock().unwrap().push_back(err);
        self
    }

    /// Returns summaries in reverse input order.
    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Ids of every batch received, in call order.
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SummaryGenerator for MockGenerator {
    async fn summarize(&self, items: &[Item]) -> Result<Vec<ProcessedItem>, PipelineError> {
        self.batches
            .lock()
            .unwrap()
            .push(items.iter().map(|i| i.id.clone()).collect());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let mut out: Vec<ProcessedItem> = items
            .iter()
            .filter(|i| !self.drop.contains(&i.id))
            .map(|i| {
                let summary = if self.blank.contains(&i.id) {
                    String::new()
                } else {
                    format!("### 📝 {}\n\n{}", i.id, i.raw_text)
                };
                ProcessedItem::new(i.clone(), summary)
            })
            .collect();
        if self.reverse {
            out.reverse();
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// MockPublisher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedDoc {
    pub destination: Destination,
    pub text: String,
    pub sequence_number: u64,
}

/// Records documents and numbers them per destination, starting at 1.
pub struct MockPublisher {
    failures: Mutex<VecDeque<PipelineError>>,
    counters: Mutex<HashMap<Destination, u64>>,
    published: Mutex<Vec<PublishedDoc>>,
    calls: AtomicUsize,
    reply_delay: Option<Duration>,
    finalize_delay: Option<Duration>,
    finalized: AtomicUsize,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self {
            failures: Mutex::new(VecDeque::new()),
            counters: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            reply_delay: None,
            finalize_delay: None,
            finalized: AtomicUsize::new(0),
        }
    }

    pub fn fail_next(self, err: PipelineError) -> Self {
        self.failures.lock().unwrap().push_back(err);
        self
    }

    /// Records the document, then waits `delay` before replying.
    pub fn slow_reply(mut self, delay: Duration) -> Self {
        self.reply_delay = Some(delay);
        self
    }

    /// `finalize` waits `delay` before completing.
    pub fn slow_finalize(mut self, delay: Duration) -> Self {
        self.finalize_delay = Some(delay);
        self
    }

    /// Completed `finalize` calls.
    pub fn finalized(&self) -> usize {
        self.finalized.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<PublishedDoc> {
        self.published.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PublishTarget for MockPublisher {
    async fn publish(
        &self,
        text: &str,
        destination: &Destination,
    ) -> Result<PublishResult, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let sequence_number = {
            let mut counters = self.counters.lock().unwrap();
            let next = counters.entry(destination.clone()).or_insert(0);
            *next += 1;
            *next
        };
        self.published.lock().unwrap().push(PublishedDoc {
            destination: destination.clone(),
            text: text.to_string(),
            sequence_number,
        });
        if let Some(delay) = self.reply_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(PublishResult {
            url: format!("https://example.com/{destination}/resources-{sequence_number:03}.md"),
            revision_id: format!("rev-{sequence_number}"),
            sequence_number,
        })
    }

    async fn finalize(
        &self,
        _published: &PublishResult,
        _destination: &Destination,
    ) -> anyhow::Result<()> {
        if let Some(delay) = self.finalize_delay {
            tokio::time::sleep(delay).await;
        }
        self.finalized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockNotifier
// ---------------------------------------------------------------------------

pub struct MockNotifier {
    received: Mutex<Vec<RunStats>>,
    fail: bool,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self {
            received: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// Records the stats, then returns an error.
    pub fn failing() -> Self {
        Self {
            received: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn received(&self) -> Vec<RunStats> {
        self.received.lock().unwrap().clone()
    }
}

impl Default for MockNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for MockNotifier {
    async fn notify(&self, stats: &RunStats) -> anyhow::Result<()> {
        self.received.lock().unwrap().push(stats.clone());
        if self.fail {
            anyhow::bail!("MockNotifier: webhook unavailable");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FlakyStore
// ---------------------------------------------------------------------------

/// A [`MemoryRunStore`] whose `settle_publication` fails a set number of times.
pub struct FlakyStore {
    inner: Arc<MemoryRunStore>,
    settle_failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryRunStore>) -> Self {
        Self {
            inner,
            settle_failures: AtomicUsize::new(0),
        }
    }

    /// The next `count` settles fail. `usize::MAX` keeps failing.
    pub fn failing_settles(self, count: usize) -> Self {
        self.settle_failures.store(count, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl RunStore for FlakyStore {
    async fn has(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.has(id).await
    }

    async fn status(&self, id: &str) -> Result<Option<ItemStatus>, StoreError> {
        self.inner.status(id).await
    }

    async fn terminal_ids(&self, ids: &[String]) -> Result<HashSet<String>, StoreError> {
        self.inner.terminal_ids(ids).await
    }

    async fn upsert(&self, item: &Item, status: ItemStatus) -> Result<UpsertOutcome, StoreError> {
        self.inner.upsert(item, status).await
    }

    async fn record_outcomes(
        &self,
        processed: &[ProcessedItem],
        failed: &[Item],
    ) -> Result<(), StoreError> {
        self.inner.record_outcomes(processed, failed).await
    }

    async fn claim_publication(&self, claim: &PublicationClaim) -> Result<(), StoreError> {
        self.inner.claim_publication(claim).await
    }

    async fn release_publication(&self, claim_id: Uuid) -> Result<(), StoreError> {
        self.inner.release_publication(claim_id).await
    }

    async fn settle_publication(&self, claim: &PublicationClaim) -> Result<(), StoreError> {
        let failing = self
            .settle_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if failing {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.settle_publication(claim).await
    }

    async fn open_publications(&self) -> Result<Vec<PublicationClaim>, StoreError> {
        self.inner.open_publications().await
    }

    async fn allocate_sequence_after(
        &self,
        destination: &Destination,
        floor: u64,
    ) -> Result<u64, StoreError> {
        self.inner.allocate_sequence_after(destination, floor).await
    }

    async fn try_acquire_run_lock(&self, holder: &str) -> Result<bool, StoreError> {
        self.inner.try_acquire_run_lock(holder).await
    }

    async fn release_run_lock(&self, holder: &str) -> Result<(), StoreError> {
        self.inner.release_run_lock(holder).await
    }
}
