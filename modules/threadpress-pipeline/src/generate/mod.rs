//! Gemini-backed summarizer.
//!
//! One generation call per item, `concurrency` in flight at a time. Results
//! keep input order. Items whose output fails validation or whose call fails
//! are dropped; the batch only fails when nothing survives.

pub mod cleanup;
pub mod prompt;

use ai_client::util::truncate_to_char_boundary;
use ai_client::{Gemini, GeminiError};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tracing::{debug, info, warn};

use threadpress_common::{Item, PipelineError, ProcessedItem};

use crate::traits::SummaryGenerator;

pub use cleanup::clean_output;
pub use prompt::build_prompt;

pub struct GeminiSummarizer {
    gemini: Gemini,
    concurrency: usize,
}

impl GeminiSummarizer {
    pub fn new(gemini: Gemini, concurrency: usize) -> Self {
        Self {
            gemini,
            concurrency: concurrency.max(1),
        }
    }

    async fn summarize_one(&self, item: &Item) -> Result<Option<String>, GeminiError> {
        let raw = self
            .gemini
            .generate(Some(prompt::SYSTEM_PROMPT), build_prompt(item))
            .await?;
        let cleaned = clean_output(&raw);
        if cleaned.is_none() {
            debug!(
                item_id = %item.id,
                preview = truncate_to_char_boundary(&raw, 200),
                "Generated content failed validation"
            );
        }
        Ok(cleaned)
    }
}

/// Maps a Gemini failure onto the pipeline taxonomy.
pub fn classify_gemini(err: &GeminiError) -> PipelineError {
    if err.is_auth() {
        return PipelineError::FatalAuth(err.to_string());
    }
    if err.is_rate_limited() {
        return PipelineError::rate_limited(err.to_string(), err.retry_after());
    }
    match err {
        GeminiError::Network(msg) => PipelineError::TransientNetwork(msg.clone()),
        GeminiError::Api { status, .. } if *status >= 500 => {
            PipelineError::TransientNetwork(err.to_string())
        }
        _ => PipelineError::GenerationFailure(err.to_string()),
    }
}

#[async_trait]
impl SummaryGenerator for GeminiSummarizer {
    async fn summarize(&self, items: &[Item]) -> Result<Vec<ProcessedItem>, PipelineError> {
        let calls: Vec<_> = items
            .iter()
            .map(|item| async move { (item, self.summarize_one(item).await) }.boxed())
            .collect();
        let results: Vec<(&Item, Result<Option<String>, GeminiError>)> = stream::iter(calls)
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut processed = Vec::with_capacity(results.len());
        let mut last_error: Option<PipelineError> = None;

        for (item, result) in results {
            match result {
                Ok(Some(section)) => processed.push(ProcessedItem::new(item.clone(), section)),
                Ok(None) => {
                    warn!(item_id = %item.id, "Generated content had no valid section, dropping item");
                }
                Err(e) => {
                    let err = classify_gemini(&e);
                    if matches!(err, PipelineError::FatalAuth(_)) {
                        return Err(err);
                    }
                    warn!(item_id = %item.id, error = %e, "Summary generation failed, dropping item");
                    last_error = Some(err);
                }
            }
        }

        if processed.is_empty() {
            return Err(match last_error {
                Some(err @ PipelineError::RateLimited { .. }) => err,
                Some(err) => PipelineError::GenerationFailure(format!(
                    "no item in a batch of {} produced content; last error: {err}",
                    items.len()
                )),
                None => PipelineError::GenerationFailure(format!(
                    "no valid markdown generated for a batch of {}",
                    items.len()
                )),
            });
        }

        info!(
            requested = items.len(),
            generated = processed.len(),
            model = self.gemini.model(),
            "Summaries generated"
        );
        Ok(processed)
    }
}
