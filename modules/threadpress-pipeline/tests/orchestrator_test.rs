//! End-to-end orchestrator behavior against the in-memory store and mocks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use threadpress_common::{Destination, ErrorKind, ItemStatus, PipelineError, RunOutcome};
use threadpress_pipeline::document::SECTION_SEPARATOR;
use threadpress_pipeline::store::MemoryRunStore;
use threadpress_pipeline::testing::{
    fast_settings, item, items, FlakyStore, Harness, MockGenerator, MockNotifier, MockPublisher,
    MockSource,
};
use threadpress_pipeline::traits::{RunStore, SourceBatch};

fn transient() -> PipelineError {
    PipelineError::TransientNetwork("connection reset".into())
}

// =========================================================================
// Happy path
// =========================================================================

#[tokio::test]
async fn two_items_publish_one_document() {
    let harness = Harness::new(MockSource::new().then_return(items(&["a", "b"])));
    let orchestrator = harness.orchestrator(fast_settings(10, 2));

    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.outcome, RunOutcome::Published);
    assert_eq!(
        (stats.items_found, stats.items_processed, stats.items_published),
        (2, 2, 2)
    );
    assert_eq!(stats.retry_count, 0);
    assert!(stats.errors.is_empty());

    let published = harness.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].sequence_number, 1);
    assert_eq!(published[0].destination, Destination::new("general"));
    let sections: Vec<&str> = published[0].text.trim_end().split(SECTION_SEPARATOR).collect();
    assert_eq!(sections.len(), 2);
    assert!(sections[0].starts_with("### 📝 a"));
    assert!(sections[1].starts_with("### 📝 b"));

    let publish = stats.publish.as_ref().unwrap();
    assert_eq!(publish.url, "https://example.com/general/resources-001.md");

    assert_eq!(
        harness.store.ids_with_status(ItemStatus::Processed),
        vec!["a".to_string(), "b".to_string()]
    );
    let notified = harness.notifier.received();
    assert_eq!(notified.len(), 1);
    assert!(notified[0].success());
    assert_eq!(notified[0].run_id, stats.run_id);
}

#[tokio::test]
async fn summaries_follow_source_order() {
    let harness = Harness::new(MockSource::new().then_return(items(&["a", "b", "c"])))
        .with_generator(MockGenerator::new().reversed());
    let orchestrator = harness.orchestrator(fast_settings(10, 1));

    orchestrator.run(&CancellationToken::new()).await.unwrap();

    let text = &harness.publisher.published()[0].text;
    let a = text.find("### 📝 a").unwrap();
    let b = text.find("### 📝 b").unwrap();
    let c = text.find("### 📝 c").unwrap();
    assert!(a < b && b < c);
}

#[tokio::test]
async fn source_destination_selects_counter() {
    let batch = |ids: &[&str]| SourceBatch::new(items(ids)).with_destination(Destination::new("ai"));
    let harness = Harness::new(
        MockSource::new()
            .then_return_batch(batch(&["a"]))
            .then_return_batch(batch(&["b"])),
    );
    let orchestrator = harness.orchestrator(fast_settings(10, 1));

    let first = orchestrator.run(&CancellationToken::new()).await.unwrap();
    let second = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(first.publish.unwrap().sequence_number, 1);
    assert_eq!(second.publish.unwrap().sequence_number, 2);
    assert!(harness
        .publisher
        .published()
        .iter()
        .all(|d| d.destination == Destination::new("ai")));
}

// =========================================================================
// Dedup
// =========================================================================

#[tokio::test]
async fn processed_items_are_never_summarized_again() {
    let store = MemoryRunStore::new().with_item(item("a"), ItemStatus::Processed);
    let harness = Harness::new(
        MockSource::new()
            .then_return(items(&["a", "b", "c"]))
            .then_return(items(&["a", "b", "c"])),
    )
    .with_store(store);
    let orchestrator = harness.orchestrator(fast_settings(10, 1));

    let first = orchestrator.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(first.items_found, 2);
    assert_eq!(
        harness.generator.batches(),
        vec![vec!["b".to_string(), "c".to_string()]]
    );

    let second = orchestrator.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(second.outcome, RunOutcome::NothingToDo);
    assert_eq!(harness.publisher.calls(), 1);
    assert_eq!(harness.generator.batches().len(), 1);
}

#[tokio::test]
async fn repeated_ids_within_a_batch_are_collapsed() {
    let harness = Harness::new(MockSource::new().then_return(items(&["a", "a", "b"])));
    let orchestrator = harness.orchestrator(fast_settings(10, 1));

    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.items_found, 2);
    assert_eq!(
        harness.generator.batches(),
        vec![vec!["a".to_string(), "b".to_string()]]
    );
}

#[tokio::test]
async fn same_url_under_new_id_is_dropped() {
    let mut twin = item("b");
    twin.url = item("a").url;
    let harness = Harness::new(MockSource::new().then_return(vec![item("a"), twin]));
    let orchestrator = harness.orchestrator(fast_settings(10, 1));

    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.items_found, 1);
    assert!(!harness.store.has("b").await.unwrap());
}

#[tokio::test]
async fn batch_is_capped_at_batch_size() {
    let harness =
        Harness::new(MockSource::new().then_return(items(&["a", "b", "c", "d", "e"])));
    let orchestrator = harness.orchestrator(fast_settings(3, 1));

    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.items_found, 3);
    assert!(!harness.store.has("d").await.unwrap());
}

// =========================================================================
// Thresholds and partial failure
// =========================================================================

#[tokio::test]
async fn empty_fetch_is_nothing_to_do() {
    let harness = Harness::new(MockSource::new());
    let orchestrator = harness.orchestrator(fast_settings(10, 1));

    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.outcome, RunOutcome::NothingToDo);
    assert!(stats.success());
    assert_eq!(harness.generator.batches().len(), 0);
    assert_eq!(harness.notifier.received().len(), 1);
}

#[tokio::test]
async fn below_minimum_publishes_nothing() {
    let harness = Harness::new(MockSource::new().then_return(items(&["a", "b"])));
    let orchestrator = harness.orchestrator(fast_settings(10, 5));

    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.outcome, RunOutcome::BelowThreshold);
    assert!(stats.success());
    assert_eq!(stats.items_found, 2);
    assert_eq!(stats.items_published, 0);
    assert!(stats.publish.is_none());
    assert_eq!(harness.publisher.calls(), 0);
    assert_eq!(harness.generator.batches().len(), 0);
    // Still pending, so a later run can pick them up.
    assert_eq!(
        harness.store.ids_with_status(ItemStatus::Pending),
        vec!["a".to_string(), "b".to_string()]
    );
    assert_eq!(harness.notifier.received().len(), 1);
}

#[tokio::test]
async fn dropped_items_are_marked_failed_and_rest_published() {
    let harness = Harness::new(MockSource::new().then_return(items(&["a", "b", "c", "d", "e"])))
        .with_generator(MockGenerator::new().dropping(&["c", "e"]));
    let orchestrator = harness.orchestrator(fast_settings(10, 2));

    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.outcome, RunOutcome::Published);
    assert_eq!(stats.items_found, 5);
    assert_eq!(stats.items_processed, 3);
    assert_eq!(stats.items_published, 3);
    assert_eq!(harness.publisher.calls(), 1);
    assert_eq!(
        harness.store.ids_with_status(ItemStatus::Processed),
        vec!["a".to_string(), "b".to_string(), "d".to_string()]
    );
    assert_eq!(
        harness.store.ids_with_status(ItemStatus::Failed),
        vec!["c".to_string(), "e".to_string()]
    );
    assert_eq!(
        harness.store.record("a").unwrap().summary.as_deref(),
        Some(format!("### 📝 a\n\n{}", item("a").raw_text).as_str())
    );
}

#[tokio::test]
async fn blank_summaries_are_marked_failed() {
    let harness = Harness::new(MockSource::new().then_return(items(&["a", "b", "c"])))
        .with_generator(MockGenerator::new().blanking(&["b"]));
    let orchestrator = harness.orchestrator(fast_settings(10, 1));

    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.outcome, RunOutcome::Published);
    assert_eq!((stats.items_processed, stats.items_published), (2, 2));
    assert_eq!(
        harness.store.ids_with_status(ItemStatus::Failed),
        vec!["b".to_string()]
    );
    let published = harness.publisher.published();
    assert_eq!(published[0].text.matches(SECTION_SEPARATOR).count(), 1);
}

// =========================================================================
// Publication claims
// =========================================================================

#[tokio::test]
async fn unsettled_publication_is_settled_before_next_fetch() {
    let harness = Harness::new(
        MockSource::new()
            .then_return(items(&["a", "b"]))
            .then_return(items(&["a", "b"])),
    );
    // Every settle of the first run fails; the second run's succeeds.
    let store = Arc::new(FlakyStore::new(harness.store.clone()).failing_settles(3));
    let orchestrator = harness.orchestrator_with_store(fast_settings(10, 1), store);

    let first = orchestrator.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(first.outcome, RunOutcome::Published);
    assert_eq!(first.errors.len(), 1);
    assert_eq!(first.errors[0].kind, ErrorKind::Store);
    assert_eq!(
        harness.store.ids_with_status(ItemStatus::Pending),
        vec!["a".to_string(), "b".to_string()]
    );
    assert_eq!(harness.store.open_publications().await.unwrap().len(), 1);

    let second = orchestrator.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(second.outcome, RunOutcome::NothingToDo);
    assert_eq!(harness.publisher.published().len(), 1);
    assert_eq!(harness.generator.batches().len(), 1);
    assert_eq!(
        harness.store.ids_with_status(ItemStatus::Processed),
        vec!["a".to_string(), "b".to_string()]
    );
    assert!(harness.store.open_publications().await.unwrap().is_empty());
}

#[tokio::test]
async fn unsettled_publication_blocks_new_publishing() {
    let harness = Harness::new(
        MockSource::new()
            .then_return(items(&["a", "b"]))
            .then_return(items(&["a", "b"])),
    );
    let store = Arc::new(FlakyStore::new(harness.store.clone()).failing_settles(usize::MAX));
    let orchestrator = harness.orchestrator_with_store(fast_settings(10, 1), store);

    let first = orchestrator.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(first.outcome, RunOutcome::Published);

    let second = orchestrator.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(second.outcome, RunOutcome::Failed);
    assert!(second.errors.iter().all(|e| e.kind == ErrorKind::Store));
    assert_eq!(harness.source.calls(), 1);
    assert_eq!(harness.publisher.published().len(), 1);
}

#[tokio::test]
async fn publish_timeout_never_republishes_the_batch() {
    let harness = Harness::new(
        MockSource::new()
            .then_return(items(&["a", "b"]))
            .then_return(items(&["a", "b"]))
            .then_return(items(&["a", "b"])),
    )
    .with_publisher(MockPublisher::new().slow_reply(Duration::from_millis(300)));
    let mut settings = fast_settings(10, 1);
    settings.timeouts.publish = Duration::from_millis(30);
    let orchestrator = harness.orchestrator(settings);

    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.errors[0].kind, ErrorKind::Timeout);
    assert_eq!(stats.outcome, RunOutcome::NothingToDo);
    assert_eq!(harness.publisher.calls(), 1);
    assert_eq!(
        harness.store.ids_with_status(ItemStatus::Processed),
        vec!["a".to_string(), "b".to_string()]
    );
}

#[tokio::test]
async fn rejected_publish_releases_claim() {
    let harness = Harness::new(MockSource::new().then_return(items(&["a"])))
        .with_publisher(MockPublisher::new().fail_next(PipelineError::FatalAuth("401".into())));
    let orchestrator = harness.orchestrator(fast_settings(10, 1));

    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.outcome, RunOutcome::Failed);
    assert!(harness.store.open_publications().await.unwrap().is_empty());
    assert_eq!(
        harness.store.ids_with_status(ItemStatus::Pending),
        vec!["a".to_string()]
    );
}

#[tokio::test]
async fn slow_follow_up_does_not_fail_publish() {
    let harness = Harness::new(MockSource::new().then_return(items(&["a"])))
        .with_publisher(MockPublisher::new().slow_finalize(Duration::from_millis(500)));
    let mut settings = fast_settings(10, 1);
    settings.timeouts.publish = Duration::from_millis(50);
    let orchestrator = harness.orchestrator(settings);

    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.outcome, RunOutcome::Published);
    assert!(stats.errors.is_empty());
    assert_eq!(harness.publisher.calls(), 1);
    assert_eq!(harness.publisher.finalized(), 0);
    assert_eq!(
        harness.store.ids_with_status(ItemStatus::Processed),
        vec!["a".to_string()]
    );
}

// =========================================================================
// Retry
// =========================================================================

#[tokio::test]
async fn transient_failures_stop_after_max_attempts() {
    let harness = Harness::new(MockSource::new().always_fail(transient()));
    let orchestrator = harness.orchestrator(fast_settings(10, 1));

    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.outcome, RunOutcome::Failed);
    assert!(!stats.success());
    assert_eq!(harness.source.calls(), 3);
    assert_eq!(stats.retry_count, 2);
    assert_eq!(stats.attempts(), 3);
    assert_eq!(stats.errors.len(), 3);
    let attempts: Vec<u32> = stats.errors.iter().map(|e| e.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert!(stats.errors.iter().all(|e| e.kind == ErrorKind::TransientNetwork));

    let notified = harness.notifier.received();
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].outcome, RunOutcome::Failed);
}

#[tokio::test]
async fn transient_failure_then_success() {
    let harness = Harness::new(
        MockSource::new()
            .then_fail(transient())
            .then_return(items(&["a"])),
    );
    let orchestrator = harness.orchestrator(fast_settings(10, 1));

    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.outcome, RunOutcome::Published);
    assert_eq!(stats.retry_count, 1);
    assert_eq!(stats.errors.len(), 1);
    assert_eq!(stats.errors[0].kind, ErrorKind::TransientNetwork);
}

#[tokio::test]
async fn auth_failure_is_not_retried() {
    let harness = Harness::new(
        MockSource::new()
            .then_fail(PipelineError::FatalAuth("401 from search".into()))
            .then_return(items(&["a"])),
    );
    let orchestrator = harness.orchestrator(fast_settings(10, 1));

    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.outcome, RunOutcome::Failed);
    assert_eq!(harness.source.calls(), 1);
    assert_eq!(stats.retry_count, 0);
    assert_eq!(stats.errors[0].kind, ErrorKind::FatalAuth);
}

#[tokio::test]
async fn publish_failure_retries_whole_pipeline() {
    let harness = Harness::new(
        MockSource::new()
            .then_return(items(&["a", "b"]))
            .then_return(items(&["a", "b"])),
    )
    .with_publisher(
        MockPublisher::new().fail_next(PipelineError::PublishFailure("409 conflict".into())),
    );
    let orchestrator = harness.orchestrator(fast_settings(10, 1));

    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.outcome, RunOutcome::Published);
    assert_eq!(stats.retry_count, 1);
    assert_eq!(harness.publisher.calls(), 2);
    assert_eq!(harness.publisher.published().len(), 1);
    assert_eq!(harness.generator.batches().len(), 2);
    assert_eq!(stats.items_found, 2);
}

#[tokio::test]
async fn generation_failure_is_retried() {
    let harness = Harness::new(
        MockSource::new()
            .then_return(items(&["a"]))
            .then_return(items(&["a"])),
    )
    .with_generator(
        MockGenerator::new().fail_next(PipelineError::GenerationFailure("empty output".into())),
    );
    let orchestrator = harness.orchestrator(fast_settings(10, 1));

    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.outcome, RunOutcome::Published);
    assert_eq!(stats.errors[0].kind, ErrorKind::GenerationFailure);
}

#[tokio::test]
async fn generator_dropping_everything_fails_the_attempt() {
    let harness = Harness::new(MockSource::new().then_return(items(&["a"])))
        .with_generator(MockGenerator::new().dropping(&["a"]));
    let orchestrator = harness.orchestrator(fast_settings(10, 1));

    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    // Later attempts fetch an empty batch.
    assert_eq!(stats.outcome, RunOutcome::NothingToDo);
    assert_eq!(stats.errors.len(), 1);
    assert_eq!(stats.errors[0].kind, ErrorKind::GenerationFailure);
    assert_eq!(harness.publisher.calls(), 0);
}

#[tokio::test]
async fn rate_limit_hint_stretches_backoff() {
    let harness = Harness::new(
        MockSource::new()
            .then_fail(PipelineError::rate_limited(
                "slow down",
                Some(Duration::from_millis(80)),
            ))
            .then_return(items(&["a"])),
    );
    let orchestrator = harness.orchestrator(fast_settings(10, 1));

    let started = Instant::now();
    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(80));
    assert_eq!(stats.outcome, RunOutcome::Published);
    assert_eq!(stats.errors[0].kind, ErrorKind::RateLimited);
}

#[tokio::test]
async fn slow_stage_times_out_and_counts_as_attempt() {
    let harness = Harness::new(MockSource::new().with_delay(Duration::from_secs(2)));
    let mut settings = fast_settings(10, 1);
    settings.timeouts.fetch = Duration::from_millis(20);
    let orchestrator = harness.orchestrator(settings);

    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.outcome, RunOutcome::Failed);
    assert_eq!(stats.errors.len(), 3);
    assert!(stats.errors.iter().all(|e| e.kind == ErrorKind::Timeout));
    assert!(stats.errors[0].message.contains("fetch"));
}

#[tokio::test]
async fn generate_budget_scales_with_batch() {
    let harness = Harness::new(MockSource::new().then_return(items(&["a", "b", "c"])))
        .with_generator(MockGenerator::new().with_delay(Duration::from_millis(150)));
    let mut settings = fast_settings(10, 1);
    settings.timeouts.generate = Duration::from_millis(100);
    settings.generate_concurrency = 1;
    let orchestrator = harness.orchestrator(settings);

    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    // 100ms per serial call, so three items get 300ms.
    assert_eq!(stats.outcome, RunOutcome::Published);
    assert!(stats.errors.is_empty());
}

// =========================================================================
// Notification, exclusion, cancellation
// =========================================================================

#[tokio::test]
async fn notifier_failure_does_not_change_outcome() {
    let harness = Harness::new(MockSource::new().then_return(items(&["a"])))
        .with_notifier(MockNotifier::failing());
    let orchestrator = harness.orchestrator(fast_settings(10, 1));

    let stats = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.outcome, RunOutcome::Published);
    assert!(stats.errors.is_empty());
    assert_eq!(harness.notifier.received().len(), 1);
}

#[tokio::test]
async fn overlapping_run_is_rejected() {
    let harness = Harness::new(
        MockSource::new()
            .with_delay(Duration::from_millis(200))
            .then_return(items(&["a"])),
    );
    let orchestrator = Arc::new(harness.orchestrator(fast_settings(10, 1)));

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(&CancellationToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let second = orchestrator.run(&CancellationToken::new()).await;
    assert_eq!(second.unwrap_err(), PipelineError::RunRejected);

    let stats = first.await.unwrap().unwrap();
    assert_eq!(stats.outcome, RunOutcome::Published);
    assert_eq!(harness.source.calls(), 1);
    assert_eq!(harness.notifier.received().len(), 1);
    // Lock released, a new run may start.
    assert!(harness.store.lock_holder().is_none());
}

#[tokio::test]
async fn lock_held_by_another_process_rejects_run() {
    let store = MemoryRunStore::new();
    assert!(store.try_acquire_run_lock("other-host").await.unwrap());
    let harness = Harness::new(MockSource::new().then_return(items(&["a"]))).with_store(store);
    let orchestrator = harness.orchestrator(fast_settings(10, 1));

    let result = orchestrator.run(&CancellationToken::new()).await;

    assert_eq!(result.unwrap_err(), PipelineError::RunRejected);
    assert_eq!(harness.source.calls(), 0);
    assert_eq!(harness.store.lock_holder().as_deref(), Some("other-host"));
}

#[tokio::test]
async fn cancellation_abandons_run_without_notifying() {
    let harness = Harness::new(
        MockSource::new()
            .with_delay(Duration::from_secs(5))
            .then_return(items(&["a"])),
    );
    let orchestrator = harness.orchestrator(fast_settings(10, 1));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });
    let stats = orchestrator.run(&cancel).await.unwrap();

    assert_eq!(stats.outcome, RunOutcome::Cancelled);
    assert_eq!(harness.publisher.calls(), 0);
    assert!(harness.notifier.received().is_empty());
    assert!(harness.store.lock_holder().is_none());
}
