use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use threadpress_common::{
    Config, Destination, ErrorRecord, Item, ItemStatus, PipelineError, ProcessedItem,
    PublicationClaim, PublishResult, RunOutcome, RunStats, Stage, StageTimeouts, UpsertOutcome,
};

use crate::document::compose_document;
use crate::retry::{RetryPolicy, RetryState};
use crate::store::StoreError;
use crate::traits::{ContentSource, NotificationSink, PublishTarget, RunStore, SummaryGenerator};

/// Collaborators injected at startup.
#[derive(Clone, TypedBuilder)]
pub struct PipelineDeps {
    pub source: Arc<dyn ContentSource>,
    pub generator: Arc<dyn SummaryGenerator>,
    pub publisher: Arc<dyn PublishTarget>,
    pub notifier: Arc<dyn NotificationSink>,
    pub store: Arc<dyn RunStore>,
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct PipelineSettings {
    #[builder(default = 10)]
    pub batch_size: usize,
    /// Batches smaller than this end the run without publishing.
    #[builder(default = 5)]
    pub min_batch_size: usize,
    #[builder(default)]
    pub retry: RetryPolicy,
    #[builder(default)]
    pub timeouts: StageTimeouts,
    /// Used when the source does not name a destination.
    #[builder(default = Destination::new("general"))]
    pub default_destination: Destination,
    /// Generation calls the summarizer keeps in flight; sizes the generate stage budget.
    #[builder(default = 1)]
    pub generate_concurrency: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self::builder()
            .batch_size(config.batch_size)
            .min_batch_size(config.min_batch_size)
            .retry(RetryPolicy::new(config.max_retries, config.retry_base_delay))
            .timeouts(config.timeouts)
            .generate_concurrency(config.gemini_concurrency)
            .build()
    }
}

/// Counters of the attempt in flight; reset at the start of every attempt.
#[derive(Debug, Default)]
struct Progress {
    found: u32,
    processed: u32,
    published: u32,
    publish: Option<PublishResult>,
    /// Publication succeeded but settling its claim did not.
    ledger_error: Option<PipelineError>,
}

/// Runs fetch → summarize → claim → publish → settle → notify with bounded retries.
pub struct PipelineOrchestrator {
    deps: PipelineDeps,
    settings: PipelineSettings,
    active: Mutex<()>,
}

impl PipelineOrchestrator {
    pub fn new(deps: PipelineDeps, settings: PipelineSettings) -> Self {
        Self {
            deps,
            settings,
            active: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run the pipeline once. Rejected while another run holds the lock.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunStats, PipelineError> {
        let Ok(_active) = self.active.try_lock() else {
            warn!("Pipeline run already in progress, rejecting trigger");
            return Err(PipelineError::RunRejected);
        };

        let run_id = Uuid::new_v4();
        let holder = run_id.to_string();
        let acquired = self.deps.store.try_acquire_run_lock(&holder).await?;
        if !acquired {
            warn!("Another pipeline process holds the run lock, rejecting trigger");
            return Err(PipelineError::RunRejected);
        }

        let span = info_span!("pipeline_run", %run_id);
        let stats = self.run_inner(run_id, cancel).instrument(span.clone()).await;

        // Always release lock
        if let Err(e) = self.deps.store.release_run_lock(&holder).await {
            warn!(error = %e, "Failed to release pipeline run lock");
        }

        self.notify(&stats).instrument(span).await;
        Ok(stats)
    }

    async fn run_inner(&self, run_id: Uuid, cancel: &CancellationToken) -> RunStats {
        let started_at = Utc::now();
        let policy = &self.settings.retry;
        let mut retry = RetryState::default();
        let mut errors = Vec::new();
        let mut progress = Progress::default();

        let outcome = loop {
            if cancel.is_cancelled() {
                break RunOutcome::Cancelled;
            }
            let attempt = retry.begin();
            progress = Progress::default();
            info!(attempt, max_attempts = policy.max_attempts, "Starting pipeline attempt");

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = self.attempt(&mut progress) => Some(r),
            };
            let Some(result) = result else {
                warn!(attempt, "Run cancelled mid-attempt, abandoning in-flight calls");
                break RunOutcome::Cancelled;
            };

            let err = match result {
                Ok(outcome) => {
                    if let Some(err) = progress.ledger_error.take() {
                        errors.push(error_record(attempt, &err));
                    }
                    break outcome;
                }
                Err(err) => err,
            };

            errors.push(error_record(attempt, &err));

            if !policy.should_retry(&err, attempt) {
                if policy.is_retryable(&err) {
                    error!(attempt, error = %err, "Retries exhausted, run failed");
                } else {
                    error!(attempt, kind = %err.kind(), error = %err, "Non-retryable failure, aborting run");
                }
                retry.fail(err);
                break RunOutcome::Failed;
            }

            let delay = policy.delay_for(attempt, &err);
            warn!(
                attempt,
                kind = %err.kind(),
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Attempt failed, retrying"
            );
            retry.fail(err);

            let slept = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            };
            if !slept {
                warn!("Run cancelled during backoff");
                break RunOutcome::Cancelled;
            }
        };

        let stats = RunStats {
            run_id,
            started_at,
            ended_at: Utc::now(),
            items_found: progress.found,
            items_processed: progress.processed,
            items_published: progress.published,
            errors,
            retry_count: retry.retries(),
            max_attempts: policy.max_attempts,
            outcome,
            publish: progress.publish,
        };

        info!("Pipeline run complete. {stats}");
        stats
    }

    async fn attempt(&self, progress: &mut Progress) -> Result<RunOutcome, PipelineError> {
        let settings = &self.settings;

        // Stage 0: earlier claims must be settled before their items can be fetched again
        self.settle_open_claims().await?;

        // Stage 1: fetch and screen
        let batch = timed(
            Stage::Fetch,
            settings.timeouts.fetch,
            self.deps.source.fetch(settings.batch_size),
        )
        .await?;
        let destination = batch
            .destination
            .clone()
            .unwrap_or_else(|| settings.default_destination.clone());

        let screened = self.screen(batch.items).await?;
        if screened.is_empty() {
            info!("No new items to process");
            return Ok(RunOutcome::NothingToDo);
        }

        // Stage 2: record discoveries so later runs never re-process them
        let items = self.persist_pending(screened).await?;
        progress.found = items.len() as u32;
        if items.is_empty() {
            info!("All fetched items were duplicates");
            return Ok(RunOutcome::NothingToDo);
        }

        if items.len() < settings.min_batch_size {
            info!(
                found = items.len(),
                min_batch_size = settings.min_batch_size,
                "Batch below minimum size, skipping publish"
            );
            return Ok(RunOutcome::BelowThreshold);
        }

        // Stage 3: summarize
        let summaries = timed(
            Stage::Generate,
            generate_budget(
                settings.timeouts.generate,
                items.len(),
                settings.generate_concurrency,
            ),
            self.deps.generator.summarize(&items),
        )
        .await?;
        let processed = order_like_source(&items, summaries);
        if processed.is_empty() {
            return Err(PipelineError::GenerationFailure(format!(
                "no usable summaries for {} items",
                items.len()
            )));
        }
        progress.processed = processed.len() as u32;

        let kept: HashSet<&str> = processed.iter().map(|p| p.item.id.as_str()).collect();
        let failed: Vec<Item> = items
            .iter()
            .filter(|i| !kept.contains(i.id.as_str()))
            .cloned()
            .collect();
        if !failed.is_empty() {
            warn!(
                failed = failed.len(),
                summarized = processed.len(),
                "Some items were not summarized, publishing the rest"
            );
        }

        // Stage 4: journal the batch, then publish it
        let document = compose_document(&processed);
        let claim = PublicationClaim::new(destination.clone(), processed, failed);
        self.deps.store.claim_publication(&claim).await?;

        let publish = timed(
            Stage::Publish,
            settings.timeouts.publish,
            self.deps.publisher.publish(&document, &destination),
        )
        .await;
        let published = match publish {
            Ok(published) => published,
            Err(err @ PipelineError::Timeout { .. }) => {
                // The commit may have landed. The open claim keeps these items
                // out of every later document.
                warn!(claim_id = %claim.id, "Publish timed out with unknown result, keeping claim");
                return Err(err);
            }
            Err(err) => {
                self.release_claim(&claim).await;
                return Err(err);
            }
        };
        info!(
            url = %published.url,
            sequence = published.sequence_number,
            destination = %destination,
            "Published document"
        );
        progress.published = claim.sections.len() as u32;
        progress.publish = Some(published.clone());

        // Stage 5: settle. The document is already out, so a failure here must
        // not trigger a whole-pipeline retry; the claim stays for the next run.
        let store = &self.deps.store;
        let settling = &claim;
        if let Err(err) = self
            .with_store_retry("settle publication", move || store.settle_publication(settling))
            .await
        {
            error!(claim_id = %claim.id, error = %err, "Published but failed to record item outcomes");
            progress.ledger_error = Some(err);
        }

        // Stage 6: follow-up outside the publish budget
        self.finalize(&published, &destination).await;

        Ok(RunOutcome::Published)
    }

    /// Settles claims left open by an earlier attempt or process.
    async fn settle_open_claims(&self) -> Result<(), PipelineError> {
        for claim in self.deps.store.open_publications().await? {
            warn!(
                claim_id = %claim.id,
                destination = %claim.destination,
                sections = claim.sections.len(),
                "Settling publication left open by an earlier attempt"
            );
            self.deps.store.settle_publication(&claim).await?;
        }
        Ok(())
    }

    async fn release_claim(&self, claim: &PublicationClaim) {
        let store = &self.deps.store;
        let claim_id = claim.id;
        if let Err(err) = self
            .with_store_retry("release publication claim", move || {
                store.release_publication(claim_id)
            })
            .await
        {
            error!(claim_id = %claim.id, error = %err, "Failed to release publication claim");
        }
    }

    async fn finalize(&self, published: &PublishResult, destination: &Destination) {
        let limit = self.settings.timeouts.publish;
        match tokio::time::timeout(limit, self.deps.publisher.finalize(published, destination)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Post-publish step failed"),
            Err(_) => warn!(timeout_ms = limit.as_millis() as u64, "Post-publish step timed out"),
        }
    }

    /// Drops ids repeated within the batch and ids already finished in the store.
    async fn screen(&self, items: Vec<Item>) -> Result<Vec<Item>, PipelineError> {
        let mut seen = HashSet::new();
        let unique: Vec<Item> = items
            .into_iter()
            .filter(|item| {
                let fresh = seen.insert(item.id.clone());
                if !fresh {
                    warn!(id = %item.id, "Duplicate id within fetched batch, dropping");
                }
                fresh
            })
            .collect();

        let ids: Vec<String> = unique.iter().map(|i| i.id.clone()).collect();
        let finished = self.deps.store.terminal_ids(&ids).await?;

        Ok(unique
            .into_iter()
            .filter(|item| {
                let done = finished.contains(&item.id);
                if done {
                    debug!(id = %item.id, "Item already handled in a previous run, skipping");
                }
                !done
            })
            .take(self.settings.batch_size)
            .collect())
    }

    async fn persist_pending(&self, items: Vec<Item>) -> Result<Vec<Item>, PipelineError> {
        let mut kept = Vec::with_capacity(items.len());
        for item in items {
            match self.deps.store.upsert(&item, ItemStatus::Pending).await? {
                UpsertOutcome::Duplicate => continue,
                UpsertOutcome::Inserted | UpsertOutcome::Updated | UpsertOutcome::Unchanged => {
                    kept.push(item)
                }
            }
        }
        Ok(kept)
    }

    /// Store write with its own short retry loop, separate from the pipeline retry.
    async fn with_store_retry<F, Fut>(&self, what: &str, op: F) -> Result<(), PipelineError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), StoreError>>,
    {
        let policy = &self.settings.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let err = PipelineError::from(e);
                    if attempt >= policy.max_attempts {
                        return Err(err);
                    }
                    warn!(attempt, error = %err, "Store write failed ({what}), retrying");
                    tokio::time::sleep(policy.delay_for(attempt, &err)).await;
                }
            }
        }
    }

    async fn notify(&self, stats: &RunStats) {
        if stats.outcome == RunOutcome::Cancelled {
            info!("Run cancelled, skipping notification");
            return;
        }
        let limit = self.settings.timeouts.notify;
        match tokio::time::timeout(limit, self.deps.notifier.notify(stats)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to send run notification"),
            Err(_) => warn!(timeout_secs = limit.as_secs(), "Run notification timed out"),
        }
    }
}

fn error_record(attempt: u32, err: &PipelineError) -> ErrorRecord {
    ErrorRecord {
        attempt,
        kind: err.kind(),
        message: err.to_string(),
        at: Utc::now(),
    }
}

/// Keeps non-blank summaries of batch items only, once each, in batch order.
fn order_like_source(items: &[Item], summaries: Vec<ProcessedItem>) -> Vec<ProcessedItem> {
    let position: HashMap<&str, usize> = items
        .iter()
        .enumerate()
        .map(|(i, item)| (item.id.as_str(), i))
        .collect();
    let mut seen = HashSet::new();
    let mut ranked: Vec<(usize, ProcessedItem)> = summaries
        .into_iter()
        .filter(|p| !p.summary.trim().is_empty())
        .filter_map(|p| {
            let pos = *position.get(p.item.id.as_str())?;
            seen.insert(pos).then_some((pos, p))
        })
        .collect();
    ranked.sort_by_key(|(pos, _)| *pos);
    ranked.into_iter().map(|(_, p)| p).collect()
}

/// Generation runs `concurrency` calls at a time, each bounded by `per_call`.
fn generate_budget(per_call: Duration, items: usize, concurrency: usize) -> Duration {
    let rounds = items.div_ceil(concurrency.max(1)).max(1);
    per_call.saturating_mul(u32::try_from(rounds).unwrap_or(u32::MAX))
}

async fn timed<T, F>(stage: Stage, limit: Duration, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout { stage, after: limit }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summaries_are_reordered_and_filtered() {
        let items = vec![Item::stub("a"), Item::stub("b"), Item::stub("c")];
        let summaries = vec![
            ProcessedItem::new(Item::stub("c"), "c"),
            ProcessedItem::new(Item::stub("x"), "stray"),
            ProcessedItem::new(Item::stub("a"), "a"),
            ProcessedItem::new(Item::stub("a"), "a again"),
        ];
        let ordered = order_like_source(&items, summaries);
        let ids: Vec<&str> = ordered.iter().map(|p| p.item.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(ordered[0].summary, "a");
    }

    #[test]
    fn blank_summaries_count_as_dropped() {
        let items = vec![Item::stub("a"), Item::stub("b")];
        let summaries = vec![
            ProcessedItem::new(Item::stub("a"), " \n\t"),
            ProcessedItem::new(Item::stub("b"), "### 📝 b"),
        ];
        let ordered = order_like_source(&items, summaries);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].item.id, "b");
    }

    #[test]
    fn generate_budget_covers_every_round() {
        let per_call = Duration::from_secs(300);
        assert_eq!(generate_budget(per_call, 10, 2), Duration::from_secs(1500));
        assert_eq!(generate_budget(per_call, 3, 2), Duration::from_secs(600));
        assert_eq!(generate_budget(per_call, 1, 4), per_call);
        assert_eq!(generate_budget(per_call, 0, 0), per_call);
    }

    #[tokio::test]
    async fn timed_maps_elapsed_to_timeout() {
        let result: Result<(), PipelineError> = timed(Stage::Fetch, Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(
            result,
            Err(PipelineError::Timeout { stage: Stage::Fetch, .. })
        ));
    }
}
