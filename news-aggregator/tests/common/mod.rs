#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use news_aggregator::{
    AggregatorError, Annotation, Article, Catalog, CategorySources, PageFetcher, Result, Sentiment,
    Services, Settings, Source, SourceSpec, Store, TextOracle,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const NEWSLETTER_FEED: &str = "https://newsletter.test/feed";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("news_aggregator=debug")
        .try_init();
}

pub async fn memory_store() -> Store {
    Store::connect("sqlite::memory:")
        .await
        .expect("in-memory store")
}

/// Serves fixed bodies by URL; anything else is a 404.
#[derive(Default)]
pub struct StaticFetcher {
    pages: Mutex<HashMap<String, String>>,
    requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, url: &str, body: impl Into<String>) -> Self {
        self.set(url, body);
        self
    }

    pub fn set(&self, url: &str, body: impl Into<String>) {
        self.pages.lock().unwrap().insert(url.to_string(), body.into());
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.requests.lock().unwrap().push(url.to_string());
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AggregatorError::HttpStatus {
                status: 404,
                url: url.to_string(),
            })
    }
}

/// Replays scripted replies in order, then falls back to a fixed reply
/// (or an error when there is none).
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    fallback: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn replying(reply: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Some(reply.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn scripted(replies: Vec<std::result::Result<&str, &str>>) -> Self {
        Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            fallback: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextOracle for ScriptedOracle {
    fn model_name(&self) -> String {
        "scripted".to_string()
    }

    async fn complete(&self, _prompt: &str, _max_tokens: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(reason)) => Err(AggregatorError::Oracle(reason)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| AggregatorError::Oracle("scripted failure".to_string())),
        }
    }
}

pub fn good_reply(score: f64) -> String {
    format!(
        r#"{{"summary": "Short summary.", "tags": ["security", "cloud"], "sentiment": "positive", "relevance_score": {score}}}"#
    )
}

fn spec(name: &str, host: &str) -> SourceSpec {
    SourceSpec {
        name: name.to_string(),
        url: format!("https://{host}"),
        feed_url: format!("https://{host}/feed"),
    }
}

/// Two cyber sources and one ai source.
pub fn test_catalog() -> Catalog {
    Catalog::new(vec![
        CategorySources {
            category: "cyber".to_string(),
            sources: vec![spec("Cyber One", "cyber-one.test"), spec("Cyber Two", "cyber-two.test")],
        },
        CategorySources {
            category: "ai".to_string(),
            sources: vec![spec("AI One", "ai-one.test")],
        },
    ])
}

pub struct RssItem {
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
}

pub fn item(title: &str, link: &str, published: Option<DateTime<Utc>>) -> RssItem {
    RssItem {
        title: title.to_string(),
        link: link.to_string(),
        published,
    }
}

pub fn rss(items: &[RssItem]) -> String {
    let mut body = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>Test feed</title><link>https://feed.test</link><description>test</description>"#,
    );
    for item in items {
        body.push_str("<item>");
        body.push_str(&format!("<title>{}</title><link>{}</link>", item.title, item.link));
        body.push_str(&format!("<description>About {}</description>", item.title));
        if let Some(published) = item.published {
            body.push_str(&format!("<pubDate>{}</pubDate>", published.to_rfc2822()));
        }
        body.push_str("</item>");
    }
    body.push_str("</channel></rss>");
    body
}

pub fn test_settings() -> Settings {
    Settings {
        database_url: "sqlite::memory:".to_string(),
        newsletter_feed_url: NEWSLETTER_FEED.to_string(),
        ..Settings::default()
    }
}

pub fn services(store: Store, fetcher: Arc<StaticFetcher>, oracle: Arc<ScriptedOracle>) -> Arc<Services> {
    Arc::new(Services::new(store, test_settings(), test_catalog(), fetcher, oracle))
}

/// Store a source for `category` directly.
pub async fn seed_source(store: &Store, category: &str) -> Source {
    let source = Source::from_spec(&spec(&format!("{category} seed"), &format!("{category}-seed.test")), category);
    store.insert_source_if_missing(&source).await.unwrap();
    source
}

/// Store an article and, when `score` is given, annotate it with that relevance.
pub async fn seed_article(
    store: &Store,
    source: &Source,
    title: &str,
    published_at: Option<DateTime<Utc>>,
    score: Option<f64>,
) -> Article {
    let mut article = Article::new(
        source,
        title.to_string(),
        format!("https://articles.test/{}/{}", source.category, title.replace(' ', "-")),
        None,
        Some(format!("Body of {title}")),
        published_at,
    );
    store.insert_articles(std::slice::from_ref(&article)).await.unwrap();

    if let Some(score) = score {
        article.apply_annotation(
            Annotation {
                summary: format!("Summary of {title}"),
                tags: vec!["seed".to_string()],
                sentiment: Sentiment::Neutral,
                relevance_score: score,
            },
            Utc::now(),
        );
        store.save_annotation(&article).await.unwrap();
    }
    article
}
