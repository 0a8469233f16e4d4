use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use threadpress_common::{RunOutcome, RunStats};

use crate::traits::NotificationSink;

const GREEN: u32 = 0x00ff00;
const RED: u32 = 0xff0000;

/// Discord webhook posting one embed per run.
pub struct DiscordWebhook {
    webhook_url: String,
    http: reqwest::Client,
}

impl DiscordWebhook {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            http: reqwest::Client::new(),
        }
    }
}

fn field(name: &str, value: impl ToString, inline: bool) -> Value {
    json!({"name": name, "value": value.to_string(), "inline": inline})
}

pub fn discord_embed(stats: &RunStats) -> Value {
    let success = stats.success();
    let mut fields = vec![
        field("Status", if success { "✅ Success" } else { "❌ Failed" }, true),
        field("Timestamp", stats.ended_at.to_rfc3339(), true),
        field("Items Found", stats.items_found, true),
        field("Items Processed", stats.items_processed, true),
        field("Items Published", stats.items_published, true),
    ];
    if let Some(publish) = &stats.publish {
        fields.push(field("File URL", &publish.url, false));
    }
    if let Some(err) = stats.last_error() {
        fields.push(field("Error Details", format!("[{}] {}", err.kind, err.message), false));
    }
    fields.push(field(
        "Attempts",
        format!("{}/{}", stats.attempts(), stats.max_attempts),
        true,
    ));

    let mut embed = json!({
        "title": if success { "Pipeline Success" } else { "Pipeline Error" },
        "color": if success { GREEN } else { RED },
        "fields": fields,
        "footer": {"text": format!("run {}", stats.run_id)},
    });
    let description = match stats.outcome {
        RunOutcome::NothingToDo => Some("No new threads found."),
        RunOutcome::BelowThreshold => Some("Not enough new threads to publish a collection."),
        _ => None,
    };
    if let Some(description) = description {
        embed["description"] = json!(description);
    }
    embed
}

#[async_trait]
impl NotificationSink for DiscordWebhook {
    async fn notify(&self, stats: &RunStats) -> anyhow::Result<()> {
        let payload = json!({ "embeds": [discord_embed(stats)] });
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Discord webhook returned non-success");
            anyhow::bail!("Discord webhook returned {status}");
        }

        Ok(())
    }
}
