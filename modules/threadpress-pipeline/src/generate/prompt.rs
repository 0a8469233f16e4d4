use threadpress_common::Item;

pub const SYSTEM_PROMPT: &str = "You are a technical content curator. You turn social media \
threads and the resources they link to into concise, well structured Markdown. You never \
invent links or resources.";

const FORMAT: &str = r####"FORMAT:
1. Header: "### " followed by ONE emoji and a title, e.g. "### 🤖 Observability - RAG Implementation".
   Emoji options: 🤖 technical, 🚀 tools, 💡 tips, ✨ features.
2. Introduction: 2-3 plain sentences on what the article covers. No emojis.
3. "Key Points:" followed by 3-5 bullet points using "•", separated by blank lines.
4. Optional "🚀 Implementation:" with 3-5 numbered, action-oriented steps.
5. "🔗 Resources:" listing every external link as [Descriptive Title](url) - short description.

RULES:
- No bold or italic text, no extra sections, no marketing language.
- No placeholder content and no extra horizontal rules.
- Only use links that appear in the thread."####;

/// Prompt for one item: thread text, images, then its links.
pub fn build_prompt(item: &Item) -> String {
    let mut content = item.raw_text.trim().to_string();
    for image in &item.images {
        content.push_str(&format!("\n\n![Image]({image})"));
    }

    let mut prompt = format!(
        "Transform this thread into a Markdown article.\n\n{FORMAT}\n\nTHREAD ({}):\n{content}\n",
        item.url
    );
    if !item.links.is_empty() {
        prompt.push_str("\nRelevant Links:\n");
        for link in &item.links {
            prompt.push_str(link);
            prompt.push('\n');
        }
    }
    prompt
}
