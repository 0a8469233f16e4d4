use threadpress_common::Destination;

/// A topic the source searches for. Its slug names the publish destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub slug: String,
    /// Heading used for this category in the repository index.
    pub title: String,
    pub queries: Vec<String>,
}

impl Category {
    pub fn new(slug: &str, title: &str, queries: &[&str]) -> Self {
        Self {
            slug: slug.to_string(),
            title: title.to_string(),
            queries: queries.iter().map(|q| q.to_string()).collect(),
        }
    }

    pub fn destination(&self) -> Destination {
        Destination::new(self.slug.clone())
    }
}

pub fn default_categories() -> Vec<Category> {
    vec![
        Category::new(
            "ai-updates",
            "🤖 AI Updates",
            &[
                "ai tools thread 🧵",
                "chatgpt tips thread",
                "ai automation guide 🧵",
                "machine learning tools thread",
                "llm developments 🧵",
                "generative ai guide 1/",
                "ai tools comparison thread",
            ],
        ),
        Category::new(
            "development",
            "💻 Development Resources",
            &[
                "coding best practices 🧵",
                "software architecture thread",
                "programming tips 🧵",
                "system design tips thread",
                "clean code guide 🧵",
                "web development tools thread",
                "devops practices 🧵",
            ],
        ),
        Category::new(
            "productivity",
            "📈 Productivity & Growth",
            &[
                "productivity system thread",
                "digital tools thread",
                "remote work tools thread",
                "business automation 1/",
                "time management system 🧵",
                "side business guide thread",
                "personal finance tips 🧵",
            ],
        ),
    ]
}

/// Index heading for a destination, falling back to a generic title.
pub fn title_for(categories: &[Category], destination: &Destination) -> String {
    categories
        .iter()
        .find(|c| c.slug == destination.as_str())
        .map(|c| c.title.clone())
        .unwrap_or_else(|| "📝 Updates".to_string())
}
