use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

/// Logical publish folder/category. Each destination has its own sequence counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Destination(String);

impl Destination {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One discovered content unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub url: String,
    pub raw_text: String,
    pub links: Vec<String>,
    pub images: Vec<String>,
    pub collected_at: DateTime<Utc>,
}

impl Item {
    /// Bare item with only an id and a derived URL. Mostly useful in tests.
    pub fn stub(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            url: format!("https://example.invalid/status/{id}"),
            raw_text: format!("thread {id}"),
            links: Vec::new(),
            images: Vec::new(),
            collected_at: Utc::now(),
            id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processed => "processed",
            ItemStatus::Failed => "failed",
        }
    }

    /// `processed` and `failed` never change again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ItemStatus::Pending)
    }

    /// Status that results from writing `next` over `self`.
    pub fn merge(self, next: ItemStatus) -> ItemStatus {
        if self.is_terminal() {
            self
        } else {
            next
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            "processed" => Ok(ItemStatus::Processed),
            "failed" => Ok(ItemStatus::Failed),
            other => Err(format!("unknown item status: {other}")),
        }
    }
}

/// An item with its generated summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedItem {
    pub item: Item,
    pub summary: String,
    pub status: ItemStatus,
}

impl ProcessedItem {
    pub fn new(item: Item, summary: impl Into<String>) -> Self {
        Self {
            item,
            summary: summary.into(),
            status: ItemStatus::Pending,
        }
    }

    /// Moves the status forward; terminal statuses stay put.
    pub fn mark(&mut self, status: ItemStatus) {
        self.status = self.status.merge(status);
    }
}

/// A batch journaled right before it is published.
///
/// Settling a claim records its item outcomes and removes it in one unit.
/// A claim still open when the next attempt starts is settled before that
/// attempt fetches anything, so its items are never published twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicationClaim {
    pub id: Uuid,
    pub destination: Destination,
    /// Sections of the document, each marked `processed`.
    pub sections: Vec<ProcessedItem>,
    /// Items of the batch left out of the document.
    pub failed: Vec<Item>,
    pub claimed_at: DateTime<Utc>,
}

impl PublicationClaim {
    pub fn new(
        destination: Destination,
        mut sections: Vec<ProcessedItem>,
        failed: Vec<Item>,
    ) -> Self {
        for section in &mut sections {
            section.mark(ItemStatus::Processed);
        }
        Self {
            id: Uuid::new_v4(),
            destination,
            sections,
            failed,
            claimed_at: Utc::now(),
        }
    }
}

/// Durable reference to a published document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    pub url: String,
    pub revision_id: String,
    pub sequence_number: u64,
}

/// Result of writing an item into the run store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Same id already stored with a status that must not change.
    Unchanged,
    /// The url already belongs to a different id. Nothing was written.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub attempt: u32,
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Published,
    /// Source returned nothing new.
    NothingToDo,
    /// Fewer items than the configured minimum; nothing was published.
    BelowThreshold,
    Failed,
    Cancelled,
}

impl RunOutcome {
    pub fn is_success(self) -> bool {
        matches!(
            self,
            RunOutcome::Published | RunOutcome::NothingToDo | RunOutcome::BelowThreshold
        )
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunOutcome::Published => "published",
            RunOutcome::NothingToDo => "nothing_to_do",
            RunOutcome::BelowThreshold => "below_threshold",
            RunOutcome::Failed => "failed",
            RunOutcome::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Outcome record of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub items_found: u32,
    pub items_processed: u32,
    pub items_published: u32,
    pub errors: Vec<ErrorRecord>,
    pub retry_count: u32,
    pub max_attempts: u32,
    pub outcome: RunOutcome,
    pub publish: Option<PublishResult>,
}

impl RunStats {
    pub fn success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Attempts made, including the first.
    pub fn attempts(&self) -> u32 {
        self.retry_count + 1
    }

    pub fn last_error(&self) -> Option<&ErrorRecord> {
        self.errors.last()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Pipeline Run {} ===", self.run_id)?;
        writeln!(f, "Outcome:         {}", self.outcome)?;
        writeln!(f, "Items found:     {}", self.items_found)?;
        writeln!(f, "Items processed: {}", self.items_processed)?;
        writeln!(f, "Items published: {}", self.items_published)?;
        writeln!(f, "Attempts:        {}/{}", self.attempts(), self.max_attempts)?;
        if let Some(publish) = &self.publish {
            writeln!(f, "Published:       #{} {}", publish.sequence_number, publish.url)?;
        }
        for err in &self.errors {
            writeln!(f, "  attempt {} [{}]: {}", err.attempt, err.kind, err.message)?;
        }
        write!(f, "Duration:        {}s", self.duration().num_seconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_status_is_never_downgraded() {
        assert_eq!(ItemStatus::Processed.merge(ItemStatus::Pending), ItemStatus::Processed);
        assert_eq!(ItemStatus::Failed.merge(ItemStatus::Processed), ItemStatus::Failed);
        assert_eq!(ItemStatus::Pending.merge(ItemStatus::Processed), ItemStatus::Processed);
        assert_eq!(ItemStatus::Pending.merge(ItemStatus::Pending), ItemStatus::Pending);
    }

    #[test]
    fn claim_marks_sections_processed() {
        let claim = PublicationClaim::new(
            Destination::new("general"),
            vec![ProcessedItem::new(Item::stub("a"), "### 📝 a")],
            vec![Item::stub("b")],
        );
        assert_eq!(claim.sections[0].status, ItemStatus::Processed);
        assert_eq!(claim.failed[0].id, "b");

        let mut failed = ProcessedItem::new(Item::stub("c"), "");
        failed.mark(ItemStatus::Failed);
        failed.mark(ItemStatus::Processed);
        assert_eq!(failed.status, ItemStatus::Failed);
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [ItemStatus::Pending, ItemStatus::Processed, ItemStatus::Failed] {
            assert_eq!(status.as_str().parse::<ItemStatus>(), Ok(status));
        }
        assert!("done".parse::<ItemStatus>().is_err());
    }

    #[test]
    fn no_op_outcomes_count_as_success() {
        assert!(RunOutcome::NothingToDo.is_success());
        assert!(RunOutcome::BelowThreshold.is_success());
        assert!(!RunOutcome::Failed.is_success());
        assert!(!RunOutcome::Cancelled.is_success());
    }

    #[test]
    fn stats_serialize_with_snake_case_kinds() {
        let now = Utc::now();
        let stats = RunStats {
            run_id: Uuid::nil(),
            started_at: now,
            ended_at: now,
            items_found: 2,
            items_processed: 1,
            items_published: 1,
            errors: vec![ErrorRecord {
                attempt: 1,
                kind: ErrorKind::RateLimited,
                message: "slow down".into(),
                at: now,
            }],
            retry_count: 1,
            max_attempts: 3,
            outcome: RunOutcome::NothingToDo,
            publish: None,
        };
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["outcome"], "nothing_to_do");
        assert_eq!(value["errors"][0]["kind"], "rate_limited");
        assert_eq!(stats.attempts(), 2);
        assert!(stats.to_string().contains("Attempts:        2/3"));
    }
}
