pub mod category;
pub mod thread;

pub use category::{default_categories, title_for, Category};

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use apify_client::{ApifyClient, ApifyError, TweetSearchInput};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use threadpress_common::{Item, PipelineError};

use crate::traits::{ContentSource, RunStore, SourceBatch};

/// Raw tweets requested per wanted item; most search hits are not threads.
const OVERFETCH: u32 = 3;

/// Searches X/Twitter through Apify, one category per fetch in rotation.
pub struct ApifyThreadSource {
    client: ApifyClient,
    store: Arc<dyn RunStore>,
    categories: Vec<Category>,
    cursor: AtomicUsize,
}

impl ApifyThreadSource {
    pub fn new(client: ApifyClient, store: Arc<dyn RunStore>, categories: Vec<Category>) -> Self {
        Self {
            client,
            store,
            categories,
            cursor: AtomicUsize::new(0),
        }
    }

    fn next_category(&self) -> Option<&Category> {
        if self.categories.is_empty() {
            return None;
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.categories.len();
        self.categories.get(i)
    }
}

#[async_trait]
impl ContentSource for ApifyThreadSource {
    async fn fetch(&self, batch_size_hint: usize) -> Result<SourceBatch, PipelineError> {
        let Some(category) = self.next_category() else {
            return Err(PipelineError::Config("no search categories configured".into()));
        };

        let input = TweetSearchInput {
            search_terms: category.queries.clone(),
            max_items: search_limit(batch_size_hint),
            sort: Some("Latest".to_string()),
            tweet_language: Some("en".to_string()),
        };
        info!(category = %category.slug, max_items = input.max_items, "Searching for threads");

        let tweets = self.client.search_tweets(&input).await.map_err(classify_apify)?;
        let now = Utc::now();
        let candidates: Vec<Item> = tweets
            .iter()
            .filter_map(|t| thread::tweet_to_item(t, now))
            .collect();
        debug!(raw = tweets.len(), candidates = candidates.len(), "Filtered search results");

        let ids: Vec<String> = candidates.iter().map(|i| i.id.clone()).collect();
        let finished = self.store.terminal_ids(&ids).await?;

        let mut seen = HashSet::new();
        let items: Vec<Item> = candidates
            .into_iter()
            .filter(|i| !finished.contains(&i.id) && seen.insert(i.id.clone()))
            .take(batch_size_hint)
            .collect();

        info!(category = %category.slug, found = items.len(), "Thread search complete");
        Ok(SourceBatch::new(items).with_destination(category.destination()))
    }
}

/// Raw tweets to request for `batch_size_hint` wanted items.
fn search_limit(batch_size_hint: usize) -> u32 {
    u32::try_from(batch_size_hint)
        .unwrap_or(u32::MAX)
        .saturating_mul(OVERFETCH)
        .max(1)
}

pub fn classify_apify(err: ApifyError) -> PipelineError {
    match err.status() {
        Some(401 | 403) => PipelineError::FatalAuth(err.to_string()),
        Some(429) => PipelineError::rate_limited(err.to_string(), None),
        _ => PipelineError::TransientNetwork(err.to_string()),
    }
}
