use crate::parser::FeedParser;
use crate::store::Store;
use crate::traits::PageFetcher;
use crate::types::{AggregatorError, Newsletter, Result};
use chrono::Utc;
use scraper::{Html, Selector};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_NEWSLETTER_TITLE: &str = "tl;dr sec Newsletter";

/// Primary content containers, most specific first.
const CONTENT_SELECTORS: [&str; 6] = [
    "article",
    "main",
    ".post-content",
    ".newsletter-content",
    "[data-content]",
    ".content",
];

const STRIPPED_IN_BODY: &str = "body script, body style, body nav, body header, body footer";

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| AggregatorError::Selector(format!("{}: {}", css, e)))
}

/// Best-effort main content of an HTML page, kept as HTML.
///
/// The first matching content container wins. Without one, the whole body
/// is returned with scripts, styles and page chrome removed.
pub fn extract_main_content(html: &str) -> Result<Option<String>> {
    let mut document = Html::parse_document(html);

    for css in CONTENT_SELECTORS {
        if let Some(element) = document.select(&selector(css)?).next() {
            return Ok(Some(element.html()));
        }
    }

    let stripped: Vec<_> = document
        .select(&selector(STRIPPED_IN_BODY)?)
        .map(|element| element.id())
        .collect();
    for id in stripped {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }

    Ok(document.select(&selector("body")?).next().map(|body| body.html()))
}

/// Tracks the single newsletter feed and keeps its latest issue.
pub struct NewsletterCollector {
    store: Store,
    fetcher: Arc<dyn PageFetcher>,
    feed_url: String,
}

impl NewsletterCollector {
    pub fn new(store: Store, fetcher: Arc<dyn PageFetcher>, feed_url: impl Into<String>) -> Self {
        Self {
            store,
            fetcher,
            feed_url: feed_url.into(),
        }
    }

    /// Store the feed's most recent issue.
    ///
    /// An issue whose URL is already stored is returned as is. `None` means
    /// the feed could not be read or had no usable entry.
    pub async fn fetch_latest(&self) -> Result<Option<Newsletter>> {
        info!("Fetching newsletter feed {}", self.feed_url);

        let feed = match self.fetcher.fetch_text(&self.feed_url).await {
            Ok(body) => FeedParser::parse_feed(&body),
            Err(e) => Err(e),
        };
        let feed = match feed {
            Ok(feed) => feed,
            Err(e) => {
                warn!("Newsletter feed unavailable: {}", e);
                return Ok(None);
            }
        };

        let Some(entry) = feed.entries.into_iter().next() else {
            warn!("No newsletter entries found");
            return Ok(None);
        };

        if let Some(existing) = self.store.get_newsletter_by_url(&entry.url).await? {
            info!("Newsletter already stored: {}", existing.title);
            return Ok(Some(existing));
        }

        let content = match self.fetch_full_content(&entry.url).await {
            Some(content) => Some(content),
            None => entry.content.filter(|c| !c.is_empty()),
        };

        let newsletter = Newsletter {
            id: Uuid::new_v4(),
            title: entry
                .title
                .unwrap_or_else(|| DEFAULT_NEWSLETTER_TITLE.to_string()),
            url: entry.url,
            content,
            published_at: entry.published_at,
            fetched_at: Utc::now(),
            executive_summary: None,
            processed: false,
        };

        let stored = self.store.insert_newsletter(&newsletter).await?;
        info!("Fetched new newsletter: {}", stored.title);
        Ok(Some(stored))
    }

    async fn fetch_full_content(&self, url: &str) -> Option<String> {
        let page = match self.fetcher.fetch_text(url).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Could not fetch newsletter page {}: {}", url, e);
                return None;
            }
        };

        match extract_main_content(&page) {
            Ok(content) => content.filter(|c| !c.is_empty()),
            Err(e) => {
                warn!("Could not extract newsletter content: {}", e);
                None
            }
        }
    }

    pub async fn get_latest(&self) -> Result<Option<Newsletter>> {
        self.store.latest_newsletter().await
    }
}
