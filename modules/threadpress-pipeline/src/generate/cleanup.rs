//! Normalizes raw model output into publishable sections.

use std::sync::LazyLock;

use ai_client::util::strip_code_blocks;
use regex::Regex;

/// `### ` followed by an emoji or symbol, never a word character.
static SECTION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^### [^\w\s]").expect("valid regex"));

static SECTION_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*---\s*\n").expect("valid regex"));

static BARE_LINK_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(https?://[^\s\]]+)\]\((https?://[^\s)]+)\)").expect("valid regex")
});

const MIN_SECTION_CHARS: usize = 10;

/// Returns the valid sections of a generation joined by `---`, or `None`
/// when nothing usable remains.
pub fn clean_output(raw: &str) -> Option<String> {
    let text = strip_code_blocks(raw);
    let text = text
        .trim_start()
        .strip_prefix("---")
        .unwrap_or(text)
        .trim();
    let text = BARE_LINK_TEXT.replace_all(text, "[Resource Link]($2)");

    if !SECTION_HEADER.is_match(&text) {
        return None;
    }

    let sections: Vec<&str> = SECTION_BREAK
        .split(&text)
        .map(str::trim)
        .filter(|s| SECTION_HEADER.is_match(s) && s.chars().count() > MIN_SECTION_CHARS)
        .collect();

    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n---\n\n"))
    }
}
