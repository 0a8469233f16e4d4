mod client;
pub(crate) mod types;

pub use types::GenerationConfig;

use std::time::Duration;

use client::GeminiClient;
use types::GenerateContentRequest;

use crate::error::{GeminiError, Result};

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

// =============================================================================
// Gemini
// =============================================================================

#[derive(Clone)]
pub struct Gemini {
    api_key: String,
    model: String,
    config: GenerationConfig,
    base_url: Option<String>,
    http: reqwest::Client,
}

impl Gemini {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            config: GenerationConfig::default(),
            base_url: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    /// Per-request timeout on the underlying HTTP client.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> GeminiClient {
        let client = GeminiClient::new(&self.api_key, self.http.clone());
        if let Some(ref url) = self.base_url {
            client.with_base_url(url)
        } else {
            client
        }
    }

    /// Single-turn generation; returns the text of the first candidate.
    pub async fn generate(&self, system: Option<&str>, prompt: impl Into<String>) -> Result<String> {
        let mut request = GenerateContentRequest::new(self.config.clone()).user(prompt);
        if let Some(system) = system {
            request = request.system(system);
        }

        let response = self.client().generate_content(&self.model, &request).await?;

        response
            .text()
            .ok_or_else(|| GeminiError::Empty(response.finish_reason()))
    }
}
