use crate::types::Result;
use async_trait::async_trait;

/// Something that can GET a URL and hand back its body as text.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url`, following redirects. Non-success statuses are errors.
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// Prompt-in, text-out language model.
#[async_trait]
pub trait TextOracle: Send + Sync {
    /// Model identifier sent with each request
    fn model_name(&self) -> String;

    /// Generate a completion for `prompt` using at most `max_tokens` output tokens
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}
