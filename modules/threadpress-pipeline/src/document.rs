use threadpress_common::ProcessedItem;

/// Separator between per-item sections of a published document.
pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// Joins item summaries, in the order given, into one Markdown document.
pub fn compose_document(items: &[ProcessedItem]) -> String {
    let sections: Vec<&str> = items
        .iter()
        .map(|p| p.summary.trim())
        .filter(|s| !s.is_empty())
        .collect();
    let mut doc = sections.join(SECTION_SEPARATOR);
    if !doc.is_empty() {
        doc.push('\n');
    }
    doc
}
