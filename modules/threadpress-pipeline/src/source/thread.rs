//! Heuristics that decide whether a post opens a thread worth summarizing.

use std::collections::HashSet;
use std::sync::LazyLock;

use apify_client::Tweet;
use chrono::{DateTime, Utc};
use regex::Regex;

use threadpress_common::Item;

/// Shortest post text considered substantial.
pub const MIN_TEXT_CHARS: usize = 100;

static THREAD_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)(🧵|\bthread\b|\bhilo\b|スレッド|(^|\s|\()1/|(^|\s)1:\s|\b1\)|\bpart 1\b|\bstep 1\b|\(1\)",
        r"|here's a list|\btop resources\b|\bresources for\b|\bcollection of\b",
        r"|\b(comprehensive|ultimate) guide\b|\b(best|must-have) resources\b)",
    ))
    .expect("thread marker regex is valid")
});

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"')\]]+"#).expect("url regex is valid"));

pub fn is_thread_like(text: &str) -> bool {
    THREAD_MARKER.is_match(text) || text.lines().filter(|l| !l.trim().is_empty()).count() > 3
}

fn is_self_link(url: &str) -> bool {
    let host = url
        .split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or_default()
        .trim_start_matches("www.")
        .trim_start_matches("mobile.");
    matches!(host, "twitter.com" | "x.com") && url.contains("/status/")
}

/// External links of a tweet, de-duplicated in order.
pub fn extract_links(tweet: &Tweet, text: &str) -> Vec<String> {
    let mut links = tweet.link_urls();
    if links.is_empty() {
        links = URL
            .find_iter(text)
            .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':']).to_string())
            .collect();
    }
    let mut seen = HashSet::new();
    links
        .into_iter()
        .filter(|l| !is_self_link(l))
        .filter(|l| seen.insert(l.clone()))
        .collect()
}

/// Converts a tweet into an item if it looks like a substantial thread with links.
pub fn tweet_to_item(tweet: &Tweet, now: DateTime<Utc>) -> Option<Item> {
    let text = tweet.content()?.trim();
    if text.chars().count() < MIN_TEXT_CHARS || !is_thread_like(text) {
        return None;
    }
    let links = extract_links(tweet, text);
    if links.is_empty() {
        return None;
    }
    let id = tweet.status_id()?;
    let url = tweet
        .status_url()
        .map(str::to_string)
        .unwrap_or_else(|| format!("https://x.com/i/status/{id}"));

    Some(Item {
        id,
        url,
        raw_text: text.to_string(),
        links,
        images: tweet.image_urls(),
        collected_at: tweet.created_at_utc().unwrap_or(now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_text(prefix: &str) -> String {
        format!("{prefix} {}", "useful details about tooling ".repeat(5))
    }

    fn tweet(id: &str, text: &str) -> Tweet {
        Tweet {
            id: Some(id.to_string()),
            text: Some(text.to_string()),
            url: Some(format!("https://x.com/dev/status/{id}")),
            ..Default::default()
        }
    }

    #[test]
    fn markers_are_detected() {
        assert!(is_thread_like("New AI tools 🧵"));
        assert!(is_thread_like("A Thread on caching"));
        assert!(is_thread_like("1/ here we go"));
        assert!(is_thread_like("one\ntwo\nthree\nfour"));
        assert!(!is_thread_like("threaded needles are fun"));
        assert!(!is_thread_like("see page 21/22"));
    }

    #[test]
    fn resource_list_phrases_count_as_markers() {
        assert!(is_thread_like("1: start with the basics"));
        assert!(is_thread_like("Here's a list of tools I use daily"));
        assert!(is_thread_like("Top resources for learning Rust"));
        assert!(is_thread_like("A collection of prompts"));
        assert!(is_thread_like("The ultimate guide to embeddings"));
        assert!(is_thread_like("Must-have resources for designers"));
        assert!(!is_thread_like("meeting moved to 11:30"));
    }

    #[test]
    fn short_posts_are_rejected() {
        let t = tweet("1", "🧵 https://example.com");
        assert!(tweet_to_item(&t, Utc::now()).is_none());
    }

    #[test]
    fn posts_without_links_are_rejected() {
        let t = tweet("1", &long_text("🧵 no links here"));
        assert!(tweet_to_item(&t, Utc::now()).is_none());
    }

    #[test]
    fn thread_with_link_becomes_item() {
        let text = long_text("🧵 Best tools: https://example.com/tools, and https://x.com/dev/status/9");
        let item = tweet_to_item(&tweet("77", &text), Utc::now()).unwrap();
        assert_eq!(item.id, "77");
        assert_eq!(item.url, "https://x.com/dev/status/77");
        assert_eq!(item.links, vec!["https://example.com/tools".to_string()]);
    }

    #[test]
    fn entity_links_take_precedence_over_text() {
        let mut t = tweet("5", &long_text("🧵 see https://t.co/abc"));
        t.entities = Some(apify_client::TweetEntities {
            urls: vec![apify_client::TweetUrlEntity {
                url: Some("https://t.co/abc".into()),
                expanded_url: Some("https://docs.rs/tokio".into()),
            }],
            media: vec![],
        });
        let item = tweet_to_item(&t, Utc::now()).unwrap();
        assert_eq!(item.links, vec!["https://docs.rs/tokio".to_string()]);
    }
}
