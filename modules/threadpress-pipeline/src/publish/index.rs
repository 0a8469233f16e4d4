//! README index of published collections, one section per destination.

pub const MAX_INDEX_ENTRIES: usize = 10;

pub fn index_entry(sequence: u64, url: &str, slug: &str) -> String {
    format!(
        "- [#{sequence:03}]({url}) - Latest {} collection",
        slug.replace('-', " ")
    )
}

/// Inserts `entry` at the top of the `## {title}` section, keeping at most
/// [`MAX_INDEX_ENTRIES`] entries there. Content outside the section is
/// preserved. A missing section is appended.
pub fn update_index(readme: &str, title: &str, entry: &str) -> String {
    let heading = format!("## {title}");
    let lines: Vec<&str> = readme.lines().collect();

    let Some(pos) = lines.iter().position(|l| l.trim_end() == heading) else {
        let base = readme.trim_end();
        return if base.is_empty() {
            format!("{heading}\n{entry}\n")
        } else {
            format!("{base}\n\n{heading}\n{entry}\n")
        };
    };

    let start = pos + 1;
    let end = lines[start..]
        .iter()
        .position(|l| !l.starts_with("- "))
        .map_or(lines.len(), |i| start + i);

    let mut out: Vec<&str> = lines[..start].to_vec();
    out.push(entry);
    out.extend(
        lines[start..end]
            .iter()
            .filter(|l| **l != entry)
            .take(MAX_INDEX_ENTRIES - 1),
    );
    out.extend_from_slice(&lines[end..]);

    let mut updated = out.join("\n");
    updated.push('\n');
    updated
}
