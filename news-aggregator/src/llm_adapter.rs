use crate::config::DEFAULT_MODEL;
use crate::traits::TextOracle;
use crate::types::{AggregatorError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

/// Oracle backed by the Anthropic Messages API.
pub struct AnthropicOracle {
    client: Client,
    api_key: String,
    model: String,
}

impl AnthropicOracle {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl TextOracle for AnthropicOracle {
    fn model_name(&self) -> String {
        self.model.clone()
    }

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(AggregatorError::Oracle("no API key configured".to_string()));
        }

        let request = MessagesRequest {
            model: &self.model,
            max_tokens,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        debug!("Sending {} char prompt to {}", prompt.chars().count(), self.model);

        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AggregatorError::Oracle(format!("API returned {}: {}", status, body)));
        }

        let body: MessagesResponse = response.json().await?;
        body.content
            .into_iter()
            .next()
            .map(|block| block.text.trim().to_string())
            .ok_or_else(|| AggregatorError::Oracle("empty response".to_string()))
    }
}

/// Mock oracle for development and testing: answers every prompt with the
/// same canned text.
pub struct MockOracle {
    reply: String,
    response_delay_ms: u64,
}

impl MockOracle {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            response_delay_ms: 0,
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.response_delay_ms = delay_ms;
        self
    }
}

impl Default for MockOracle {
    fn default() -> Self {
        Self::new(
            r#"{"summary": "Mock summary.", "tags": ["mock"], "sentiment": "neutral", "relevance_score": 0.5}"#,
        )
    }
}

#[async_trait]
impl TextOracle for MockOracle {
    fn model_name(&self) -> String {
        format!("mock ({})", DEFAULT_MODEL)
    }

    async fn complete(&self, _prompt: &str, _max_tokens: u32) -> Result<String> {
        if self.response_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.response_delay_ms)).await;
        }
        Ok(self.reply.clone())
    }
}
