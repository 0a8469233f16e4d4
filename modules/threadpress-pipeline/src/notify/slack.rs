use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use threadpress_common::{RunOutcome, RunStats};

use crate::traits::NotificationSink;

/// Slack incoming webhook.
pub struct SlackWebhook {
    webhook_url: String,
    http: reqwest::Client,
}

impl SlackWebhook {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            http: reqwest::Client::new(),
        }
    }

    fn outcome_emoji(outcome: RunOutcome) -> &'static str {
        match outcome {
            RunOutcome::Published => ":white_check_mark:",
            RunOutcome::NothingToDo | RunOutcome::BelowThreshold => ":information_source:",
            RunOutcome::Failed | RunOutcome::Cancelled => ":rotating_light:",
        }
    }

    async fn post(&self, payload: serde_json::Value) -> anyhow::Result<()> {
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Slack webhook returned non-success");
            anyhow::bail!("Slack webhook returned {status}");
        }

        Ok(())
    }
}

pub fn slack_text(stats: &RunStats) -> String {
    let headline = if stats.success() {
        "Pipeline Success"
    } else {
        "Pipeline Error"
    };
    let mut lines = vec![
        format!(
            "{} *{headline}* ({})",
            SlackWebhook::outcome_emoji(stats.outcome),
            stats.outcome
        ),
        format!(
            "*Items:* found={} processed={} published={}",
            stats.items_found, stats.items_processed, stats.items_published
        ),
    ];
    if let Some(publish) = &stats.publish {
        lines.push(format!(
            "*File:* <{}|#{:03}>",
            publish.url, publish.sequence_number
        ));
    }
    if let Some(err) = stats.last_error() {
        lines.push(format!("*Error:* [{}] {}", err.kind, err.message));
    }
    lines.push(format!(
        "_Attempts {}/{} at {}_",
        stats.attempts(),
        stats.max_attempts,
        stats.ended_at.to_rfc3339()
    ));
    lines.join("\n")
}

#[async_trait]
impl NotificationSink for SlackWebhook {
    async fn notify(&self, stats: &RunStats) -> anyhow::Result<()> {
        let payload = json!({
            "text": slack_text(stats),
            "unfurl_links": false,
        });
        self.post(payload).await
    }
}
