use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wrapper for Apify API responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

/// Metadata of an actor run.
#[derive(Debug, Clone, Deserialize)]
pub struct RunData {
    pub id: String,
    pub status: String,
    #[serde(rename = "defaultDatasetId")]
    pub default_dataset_id: String,
}

/// Input for X/Twitter keyword search via apidojo/tweet-scraper.
#[derive(Debug, Clone, Serialize)]
pub struct TweetSearchInput {
    #[serde(rename = "searchTerms")]
    pub search_terms: Vec<String>,
    #[serde(rename = "maxItems")]
    pub max_items: u32,
    /// "Latest" or "Top".
    #[serde(rename = "sort", skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    #[serde(rename = "tweetLanguage", skip_serializing_if = "Option::is_none")]
    pub tweet_language: Option<String>,
}

/// Author info nested inside a Tweet.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TweetAuthor {
    #[serde(rename = "userName")]
    pub user_name: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TweetUrlEntity {
    pub url: Option<String>,
    pub expanded_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TweetMedia {
    pub media_url_https: Option<String>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TweetEntities {
    #[serde(default)]
    pub urls: Vec<TweetUrlEntity>,
    #[serde(default)]
    pub media: Vec<TweetMedia>,
}

/// A single tweet from the Apify dataset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Tweet {
    pub id: Option<String>,
    pub text: Option<String>,
    #[serde(rename = "full_text", alias = "fullText")]
    pub full_text: Option<String>,
    pub url: Option<String>,
    #[serde(rename = "twitterUrl")]
    pub twitter_url: Option<String>,
    #[serde(rename = "created_at", alias = "createdAt")]
    pub created_at: Option<String>,
    pub author: Option<TweetAuthor>,
    pub entities: Option<TweetEntities>,
    #[serde(rename = "extendedEntities")]
    pub extended_entities: Option<TweetEntities>,
    #[serde(rename = "likeCount")]
    pub like_count: Option<i64>,
    #[serde(rename = "retweetCount")]
    pub retweet_count: Option<i64>,
    #[serde(rename = "replyCount")]
    pub reply_count: Option<i64>,
}

impl Tweet {
    /// Returns whichever text field is populated, preferring `full_text`.
    pub fn content(&self) -> Option<&str> {
        self.full_text.as_deref().or(self.text.as_deref())
    }

    /// Canonical status URL, preferring `url` over `twitterUrl`.
    pub fn status_url(&self) -> Option<&str> {
        self.url.as_deref().or(self.twitter_url.as_deref())
    }

    /// Tweet id, falling back to the `/status/<id>` segment of the URL.
    pub fn status_id(&self) -> Option<String> {
        if let Some(id) = self.id.as_deref().filter(|s| !s.is_empty()) {
            return Some(id.to_string());
        }
        let url = self.status_url()?;
        let (_, rest) = url.split_once("/status/")?;
        let id: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        (!id.is_empty()).then_some(id)
    }

    /// Expanded link targets in the order they appear.
    pub fn link_urls(&self) -> Vec<String> {
        self.entities
            .iter()
            .flat_map(|e| e.urls.iter())
            .filter_map(|u| u.expanded_url.clone().or_else(|| u.url.clone()))
            .collect()
    }

    /// Photo URLs, preferring extended entities when present.
    pub fn image_urls(&self) -> Vec<String> {
        let media = self
            .extended_entities
            .as_ref()
            .filter(|e| !e.media.is_empty())
            .or(self.entities.as_ref());
        media
            .iter()
            .flat_map(|e| e.media.iter())
            .filter(|m| m.media_type.as_deref().map_or(true, |t| t == "photo"))
            .filter_map(|m| m.media_url_https.clone())
            .collect()
    }

    /// Parses `created_at` in either RFC 3339 or the legacy Twitter format.
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        let raw = self.created_at.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .or_else(|_| DateTime::parse_from_str(raw, "%a %b %d %H:%M:%S %z %Y"))
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}
