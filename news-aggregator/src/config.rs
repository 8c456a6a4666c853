use crate::types::{FetchConfig, Result, SourceSpec};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_NEWSLETTER_FEED: &str = "https://rss.beehiiv.com/feeds/xgTKUmMmUm.xml";

/// Runtime settings, built once at startup and handed to each component.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub anthropic_api_key: String,
    pub oracle_model: String,
    pub articles_per_category: usize,
    pub articles_per_source: usize,
    pub annotation_batch_limit: usize,
    pub fetch_schedule_hours: u64,
    pub feature_window_hours: i64,
    pub newsletter_feed_url: String,
    pub bind_addr: String,
    pub cors_origins: Vec<String>,
    pub fetch: FetchConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/news.db".to_string(),
            anthropic_api_key: String::new(),
            oracle_model: DEFAULT_MODEL.to_string(),
            articles_per_category: 5,
            articles_per_source: 5,
            annotation_batch_limit: 100,
            fetch_schedule_hours: 24,
            feature_window_hours: 24,
            newsletter_feed_url: DEFAULT_NEWSLETTER_FEED.to_string(),
            bind_addr: "0.0.0.0:8000".to_string(),
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://frontend:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            fetch: FetchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySources {
    pub category: String,
    pub sources: Vec<SourceSpec>,
}

/// Ordered mapping of category to its feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    entries: Vec<CategorySources>,
}

impl Catalog {
    pub fn new(entries: Vec<CategorySources>) -> Self {
        Self { entries }
    }

    /// Load a catalog from a JSON array of `{category, sources}` objects.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn categories(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.category.clone()).collect()
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.entries.iter().any(|e| e.category == category)
    }

    /// Every (category, source) pair in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SourceSpec)> {
        self.entries
            .iter()
            .flat_map(|e| e.sources.iter().map(move |s| (e.category.as_str(), s)))
    }
}

fn spec(name: &str, url: &str, feed_url: &str) -> SourceSpec {
    SourceSpec {
        name: name.to_string(),
        url: url.to_string(),
        feed_url: feed_url.to_string(),
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(vec![
            CategorySources {
                category: "cyber".to_string(),
                sources: vec![
                    spec("The Hacker News", "https://thehackernews.com", "https://feeds.feedburner.com/TheHackersNews"),
                    spec("Bleeping Computer", "https://www.bleepingcomputer.com", "https://www.bleepingcomputer.com/feed/"),
                    spec("Krebs on Security", "https://krebsonsecurity.com", "https://krebsonsecurity.com/feed/"),
                    spec("Dark Reading", "https://www.darkreading.com", "https://www.darkreading.com/rss.xml"),
                    spec("SecurityWeek", "https://www.securityweek.com", "https://feeds.feedburner.com/securityweek"),
                ],
            },
            CategorySources {
                category: "ai".to_string(),
                sources: vec![
                    spec("TechCrunch AI", "https://techcrunch.com/category/artificial-intelligence/", "https://techcrunch.com/category/artificial-intelligence/feed/"),
                    spec("MIT Technology Review", "https://www.technologyreview.com", "https://www.technologyreview.com/feed/"),
                    spec("VentureBeat AI", "https://venturebeat.com/category/ai/", "https://venturebeat.com/category/ai/feed/"),
                    spec("AI News", "https://www.artificialintelligence-news.com", "https://www.artificialintelligence-news.com/feed/"),
                    spec("The Verge AI", "https://www.theverge.com/ai-artificial-intelligence", "https://www.theverge.com/rss/ai-artificial-intelligence/index.xml"),
                ],
            },
            CategorySources {
                category: "cloud".to_string(),
                sources: vec![
                    spec("AWS Blog", "https://aws.amazon.com/blogs/aws/", "https://aws.amazon.com/blogs/aws/feed/"),
                    spec("Google Cloud Blog", "https://cloud.google.com/blog/", "https://cloudblog.withgoogle.com/rss/"),
                    spec("Azure Blog", "https://azure.microsoft.com/en-us/blog/", "https://azure.microsoft.com/en-us/blog/feed/"),
                    spec("InfoQ Cloud", "https://www.infoq.com/cloud-computing/", "https://feed.infoq.com/cloud-computing/"),
                    spec("The New Stack", "https://thenewstack.io", "https://thenewstack.io/feed/"),
                ],
            },
            CategorySources {
                category: "crypto".to_string(),
                sources: vec![
                    spec("CoinTelegraph", "https://cointelegraph.com", "https://cointelegraph.com/rss"),
                    spec("Decrypt", "https://decrypt.co", "https://decrypt.co/feed"),
                    spec("Bitcoin Magazine", "https://bitcoinmagazine.com", "https://bitcoinmagazine.com/.rss/full/"),
                    spec("CoinDesk", "https://www.coindesk.com", "https://www.coindesk.com/arc/outboundfeeds/rss/"),
                    spec("The Block", "https://www.theblock.co", "https://www.theblock.co/rss.xml"),
                ],
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_has_four_ordered_categories() {
        let catalog = Catalog::default();
        assert_eq!(catalog.categories(), vec!["cyber", "ai", "cloud", "crypto"]);
        assert_eq!(catalog.iter().count(), 20);
        assert!(catalog.has_category("cloud"));
        assert!(!catalog.has_category("sports"));
    }

    #[test]
    fn catalog_json_round_trips_in_order() {
        let catalog = Catalog::default();
        let json = serde_json::to_string(&catalog).unwrap();
        let back: Catalog = serde_json::from_str(&json).unwrap();
        assert_eq!(back.categories(), catalog.categories());
    }
}
