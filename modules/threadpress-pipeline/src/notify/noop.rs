use async_trait::async_trait;

use threadpress_common::RunStats;

use crate::traits::NotificationSink;

/// Sink used when no webhook is configured.
pub struct NoopNotifier;

#[async_trait]
impl NotificationSink for NoopNotifier {
    async fn notify(&self, _stats: &RunStats) -> anyhow::Result<()> {
        Ok(())
    }
}
