use crate::traits::PageFetcher;
use crate::types::{AggregatorError, FetchConfig, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use url::Url;

/// HTTP client used for feeds and newsletter pages.
///
/// Each call is bounded by the configured timeout. There are no retries: a
/// failed fetch is reported to the caller, which skips it for the current run.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let redirect = if config.follow_redirects {
            reqwest::redirect::Policy::limited(config.max_redirects)
        } else {
            reqwest::redirect::Policy::none()
        };

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(redirect)
            .build()?;

        Ok(Self { client, config })
    }

    pub async fn fetch(&self, url: &str) -> Result<String> {
        let start_time = Instant::now();
        // Reject garbage before it reaches the client
        Url::parse(url)?;

        debug!("Fetching: {}", url);

        let mut response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(AggregatorError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let mut body = CappedBody::new(self.config.max_feed_size_mb);
        if let Some(content_length) = response.content_length() {
            body.check(content_length as usize)?;
        }

        // Content-Length is absent on chunked responses, so count as we read
        while let Some(chunk) = response.chunk().await? {
            body.push(&chunk)?;
        }

        let content = body.into_text();
        info!(
            "Fetched {} ({} bytes in {}ms)",
            url,
            content.len(),
            start_time.elapsed().as_millis()
        );
        Ok(content)
    }
}

/// Response body accumulator that refuses to grow past `max_mb` megabytes.
struct CappedBody {
    limit: usize,
    bytes: Vec<u8>,
}

impl CappedBody {
    fn new(max_mb: usize) -> Self {
        Self {
            limit: max_mb.saturating_mul(1024 * 1024),
            bytes: Vec::new(),
        }
    }

    fn check(&self, size: usize) -> Result<()> {
        if size > self.limit {
            return Err(AggregatorError::ContentTooLarge {
                size_mb: size / (1024 * 1024),
            });
        }
        Ok(())
    }

    fn push(&mut self, chunk: &[u8]) -> Result<()> {
        self.check(self.bytes.len() + chunk.len())?;
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }

    fn into_text(self) -> String {
        match String::from_utf8(self.bytes) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }
}

#[async_trait]
impl PageFetcher for Fetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.fetch(url).await
    }
}
