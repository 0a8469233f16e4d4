pub mod discord;
pub mod noop;
pub mod slack;

pub use discord::DiscordWebhook;
pub use noop::NoopNotifier;
pub use slack::SlackWebhook;

use std::sync::Arc;

use tracing::{info, warn};

use threadpress_common::{Config, NotifyKind};

use crate::traits::NotificationSink;

/// Webhook flavor for a URL when none is configured explicitly.
pub fn infer_kind(url: &str) -> NotifyKind {
    let host = reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase));
    match host.as_deref() {
        Some(h) if h.ends_with("discord.com") || h.ends_with("discordapp.com") => {
            NotifyKind::Discord
        }
        _ => NotifyKind::Slack,
    }
}

/// Builds the configured sink. No webhook URL yields a noop.
pub fn build_notifier(config: &Config) -> Arc<dyn NotificationSink> {
    let Some(url) = config.notify_webhook_url.clone() else {
        warn!("NOTIFY_WEBHOOK_URL not set, run notifications disabled");
        return Arc::new(NoopNotifier);
    };
    let kind = config.notify_webhook_kind.unwrap_or_else(|| infer_kind(&url));
    info!(?kind, "Run notifications enabled");
    match kind {
        NotifyKind::Discord => Arc::new(DiscordWebhook::new(url)),
        NotifyKind::Slack => Arc::new(SlackWebhook::new(url)),
    }
}
