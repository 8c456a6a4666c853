use chrono::{DateTime, Utc};
// Domain definitions shared with other crates
pub use interfaces::defs::{
    Annotation, Article, ArticleDetail, ArticleSummary, DailyDigest, FetchLog, FetchStatus,
    LastFetch, Newsletter, Sentiment, Source, SourceSpec, Stats,
};

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_feed_size_mb: usize,
    pub follow_redirects: bool,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "NewsAggregator/1.0 (https://github.com/news-aggregator)".to_string(),
            timeout_seconds: 30,
            max_feed_size_mb: 10,
            follow_redirects: true,
            max_redirects: 10,
        }
    }
}

#[derive(Debug)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<ParsedEntry>,
}

#[derive(Debug, Clone)]
pub struct ParsedEntry {
    pub url: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} fetching {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Invalid selector: {0}")]
    Selector(String),

    #[error("Article not found: {id}")]
    ArticleNotFound { id: uuid::Uuid },

    #[error("Fetch log not found: {id}")]
    FetchLogNotFound { id: uuid::Uuid },

    #[error("No newsletter found")]
    NewsletterNotFound,

    #[error("Invalid category: {category}")]
    InvalidCategory { category: String },

    #[error("Content size exceeds limit: {size_mb}MB")]
    ContentTooLarge { size_mb: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job worker is not running")]
    WorkerStopped,

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
