//! RunStore contract on the in-memory store.

use std::collections::HashSet;
use std::sync::Arc;

use threadpress_common::{Destination, ItemStatus, ProcessedItem, PublicationClaim, UpsertOutcome};
use threadpress_pipeline::store::MemoryRunStore;
use threadpress_pipeline::testing::{item, processed};
use threadpress_pipeline::traits::RunStore;

#[tokio::test]
async fn upsert_is_idempotent() {
    let store = MemoryRunStore::new();

    assert_eq!(
        store.upsert(&item("a"), ItemStatus::Pending).await.unwrap(),
        UpsertOutcome::Inserted
    );
    assert_eq!(
        store.upsert(&item("a"), ItemStatus::Pending).await.unwrap(),
        UpsertOutcome::Unchanged
    );
    assert_eq!(store.len(), 1);
    assert!(store.has("a").await.unwrap());
    assert!(!store.has("b").await.unwrap());
}

#[tokio::test]
async fn terminal_status_is_never_downgraded() {
    let store = MemoryRunStore::new();
    store.upsert(&item("a"), ItemStatus::Pending).await.unwrap();

    assert_eq!(
        store.upsert(&item("a"), ItemStatus::Processed).await.unwrap(),
        UpsertOutcome::Updated
    );
    assert_eq!(
        store.upsert(&item("a"), ItemStatus::Pending).await.unwrap(),
        UpsertOutcome::Unchanged
    );
    assert_eq!(store.status("a").await.unwrap(), Some(ItemStatus::Processed));
}

#[tokio::test]
async fn url_owned_by_other_id_is_duplicate() {
    let store = MemoryRunStore::new();
    store.upsert(&item("a"), ItemStatus::Pending).await.unwrap();

    let mut twin = item("b");
    twin.url = item("a").url;
    assert_eq!(
        store.upsert(&twin, ItemStatus::Pending).await.unwrap(),
        UpsertOutcome::Duplicate
    );
    assert_eq!(store.status("b").await.unwrap(), None);
}

#[tokio::test]
async fn terminal_ids_reports_processed_and_failed_only() {
    let store = MemoryRunStore::new()
        .with_item(item("p"), ItemStatus::Processed)
        .with_item(item("f"), ItemStatus::Failed)
        .with_item(item("n"), ItemStatus::Pending);

    let ids: Vec<String> = ["p", "f", "n", "x"].iter().map(|s| s.to_string()).collect();
    let terminal = store.terminal_ids(&ids).await.unwrap();

    assert_eq!(
        terminal,
        HashSet::from(["p".to_string(), "f".to_string()])
    );
}

#[tokio::test]
async fn record_outcomes_marks_both_sets() {
    let store = MemoryRunStore::new()
        .with_item(item("a"), ItemStatus::Pending)
        .with_item(item("b"), ItemStatus::Pending);

    store
        .record_outcomes(&[processed("a")], &[item("b")])
        .await
        .unwrap();

    let a = store.record("a").unwrap();
    assert_eq!(a.status, ItemStatus::Processed);
    assert_eq!(a.summary.as_deref(), Some("### 📝 a"));
    assert_eq!(store.record("b").unwrap().status, ItemStatus::Failed);
}

#[tokio::test]
async fn record_outcomes_writes_the_item_status() {
    let store = MemoryRunStore::new().with_item(item("a"), ItemStatus::Pending);

    store
        .record_outcomes(&[ProcessedItem::new(item("a"), "draft")], &[])
        .await
        .unwrap();

    let a = store.record("a").unwrap();
    assert_eq!(a.status, ItemStatus::Pending);
    assert_eq!(a.summary.as_deref(), Some("draft"));
}

#[tokio::test]
async fn claims_stay_open_until_settled_or_released() {
    let store = MemoryRunStore::new()
        .with_item(item("a"), ItemStatus::Pending)
        .with_item(item("b"), ItemStatus::Pending)
        .with_item(item("c"), ItemStatus::Pending);
    let ai = Destination::new("ai");

    let settled = PublicationClaim::new(ai.clone(), vec![processed("a")], vec![item("b")]);
    let released = PublicationClaim::new(ai, vec![processed("c")], vec![]);
    store.claim_publication(&settled).await.unwrap();
    store.claim_publication(&released).await.unwrap();
    store.claim_publication(&settled).await.unwrap();
    assert_eq!(
        store.open_publications().await.unwrap(),
        vec![settled.clone(), released.clone()]
    );

    store.release_publication(released.id).await.unwrap();
    store.settle_publication(&settled).await.unwrap();

    assert!(store.open_publications().await.unwrap().is_empty());
    assert_eq!(store.status("a").await.unwrap(), Some(ItemStatus::Processed));
    assert_eq!(store.status("b").await.unwrap(), Some(ItemStatus::Failed));
    assert_eq!(store.status("c").await.unwrap(), Some(ItemStatus::Pending));
}

#[tokio::test]
async fn sequences_are_per_destination_and_monotonic() {
    let store = MemoryRunStore::new().with_sequence(Destination::new("ai"), 4);
    let ai = Destination::new("ai");
    let dev = Destination::new("dev");

    assert_eq!(store.allocate_sequence(&ai).await.unwrap(), 5);
    assert_eq!(store.allocate_sequence(&dev).await.unwrap(), 1);
    assert_eq!(store.allocate_sequence_after(&ai, 2).await.unwrap(), 6);
    assert_eq!(store.allocate_sequence_after(&ai, 20).await.unwrap(), 21);
    assert_eq!(store.allocate_sequence(&ai).await.unwrap(), 22);
}

#[tokio::test]
async fn concurrent_allocations_never_collide() {
    let store = Arc::new(MemoryRunStore::new());
    let dest = Destination::new("ai");

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let store = store.clone();
            let dest = dest.clone();
            tokio::spawn(async move { store.allocate_sequence(&dest).await.unwrap() })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        assert!(seen.insert(handle.await.unwrap()));
    }
    assert_eq!(seen, (1..=32).collect::<HashSet<u64>>());
}

#[tokio::test]
async fn run_lock_is_exclusive_until_released() {
    let store = MemoryRunStore::new();

    assert!(store.try_acquire_run_lock("one").await.unwrap());
    assert!(!store.try_acquire_run_lock("two").await.unwrap());

    // Only the holder can release.
    store.release_run_lock("two").await.unwrap();
    assert_eq!(store.lock_holder().as_deref(), Some("one"));

    store.release_run_lock("one").await.unwrap();
    assert!(store.try_acquire_run_lock("two").await.unwrap());
}
