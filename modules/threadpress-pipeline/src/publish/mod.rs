//! GitHub publisher: one numbered Markdown file per run under a
//! per-destination folder. The README index is updated afterwards in
//! `finalize`, outside the commit that decides the run.

pub mod index;

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::Utc;
use github_client::{GithubClient, GithubError};
use regex::Regex;
use tracing::info;

use threadpress_common::{Destination, PipelineError, PublishResult};

use crate::source::{title_for, Category};
use crate::traits::{PublishTarget, RunStore};

static RESOURCE_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^resources-(\d{3,})\.md$").expect("valid regex"));

const INDEX_PATH: &str = "README.md";

pub struct GithubPublisher {
    client: GithubClient,
    store: Arc<dyn RunStore>,
    branch: String,
    base_folder: String,
    categories: Vec<Category>,
}

impl GithubPublisher {
    pub fn new(
        client: GithubClient,
        store: Arc<dyn RunStore>,
        branch: impl Into<String>,
        base_folder: impl Into<String>,
    ) -> Self {
        Self {
            client,
            store,
            branch: branch.into(),
            base_folder: base_folder.into(),
            categories: Vec::new(),
        }
    }

    /// Categories used to title README sections.
    pub fn with_categories(mut self, categories: Vec<Category>) -> Self {
        self.categories = categories;
        self
    }

    pub fn folder_for(&self, destination: &Destination) -> String {
        let base = self.base_folder.trim_matches('/');
        if base.is_empty() {
            destination.as_str().to_string()
        } else {
            format!("{base}/{destination}")
        }
    }

    /// Highest `resources-NNN.md` number already in `folder`, or 0.
    async fn highest_existing(&self, folder: &str) -> Result<u64, GithubError> {
        let entries = self.client.list_dir(folder, &self.branch).await?;
        Ok(entries
            .iter()
            .filter(|e| e.entry_type == "file")
            .filter_map(|e| RESOURCE_FILE.captures(&e.name))
            .filter_map(|c| c[1].parse::<u64>().ok())
            .max()
            .unwrap_or(0))
    }

    async fn update_index(
        &self,
        destination: &Destination,
        sequence: u64,
        url: &str,
    ) -> Result<(), GithubError> {
        let existing = self.client.get_file(INDEX_PATH, &self.branch).await?;
        let current = existing.as_ref().map(|f| f.text.as_str()).unwrap_or_default();
        let title = title_for(&self.categories, destination);
        let updated = index::update_index(
            current,
            &title,
            &index::index_entry(sequence, url, destination.as_str()),
        );

        self.client
            .put_file(
                INDEX_PATH,
                &self.branch,
                &format!("Update index with {destination} #{sequence:03}"),
                &updated,
                existing.as_ref().map(|f| f.sha.as_str()),
            )
            .await?;
        Ok(())
    }
}

/// Maps a GitHub failure onto the pipeline taxonomy.
pub fn classify_github(err: GithubError) -> PipelineError {
    if err.is_rate_limited() {
        let now = Utc::now().timestamp().max(0) as u64;
        let retry_after = err.retry_after(now);
        return PipelineError::rate_limited(err.to_string(), retry_after);
    }
    match &err {
        GithubError::Network(msg) => PipelineError::TransientNetwork(msg.clone()),
        GithubError::InvalidRepo(msg) => PipelineError::Config(msg.clone()),
        GithubError::Parse(_) => PipelineError::PublishFailure(err.to_string()),
        GithubError::Api { status, .. } => match *status {
            401 | 403 | 404 => PipelineError::FatalAuth(err.to_string()),
            s if s >= 500 => PipelineError::TransientNetwork(err.to_string()),
            _ => PipelineError::PublishFailure(err.to_string()),
        },
    }
}

#[async_trait]
impl PublishTarget for GithubPublisher {
    async fn publish(
        &self,
        text: &str,
        destination: &Destination,
    ) -> Result<PublishResult, PipelineError> {
        let folder = self.folder_for(destination);
        let existing = self.highest_existing(&folder).await.map_err(classify_github)?;
        let sequence = self
            .store
            .allocate_sequence_after(destination, existing)
            .await?;

        let path = format!("{folder}/resources-{sequence:03}.md");
        let message = format!("Add resource collection #{sequence:03}");
        let committed = self
            .client
            .put_file(&path, &self.branch, &message, text, None)
            .await
            .map_err(classify_github)?;

        let url = committed
            .content
            .html_url
            .unwrap_or_else(|| self.client.blob_url(&self.branch, &path));
        info!(repo = %self.client.repo(), path = %path, sequence, commit = %committed.commit.sha, "Published collection");

        Ok(PublishResult {
            url,
            revision_id: committed.commit.sha,
            sequence_number: sequence,
        })
    }

    async fn finalize(
        &self,
        published: &PublishResult,
        destination: &Destination,
    ) -> anyhow::Result<()> {
        self.update_index(destination, published.sequence_number, &published.url)
            .await?;
        info!(sequence = published.sequence_number, "README index updated");
        Ok(())
    }
}
