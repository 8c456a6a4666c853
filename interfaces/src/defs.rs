use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use indexmap::IndexMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// One entry of the static source catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    pub url: String,
    pub feed_url: String,
}

/// A configured RSS feed, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub feed_url: String,
    pub category: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Source {
    pub fn from_spec(spec: &SourceSpec, category: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: spec.name.clone(),
            url: spec.url.clone(),
            feed_url: spec.feed_url.clone(),
            category: category.to_owned(),
            active: true,
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(Sentiment::Positive),
            "neutral" => Ok(Sentiment::Neutral),
            "negative" => Ok(Sentiment::Negative),
            other => Err(anyhow::anyhow!("unknown sentiment: {other}")),
        }
    }
}

/// The enrichment the oracle produces for one article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub summary: String,
    pub tags: Vec<String>,
    pub sentiment: Sentiment,
    pub relevance_score: f64,
}

impl Annotation {
    pub const DEFAULT_RELEVANCE: f64 = 0.5;

    /// Neutral annotation carrying only a summary.
    pub fn neutral(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            tags: Vec::new(),
            sentiment: Sentiment::Neutral,
            relevance_score: Self::DEFAULT_RELEVANCE,
        }
    }
}

/// One collected news item.
///
/// While `processed` is false the annotation fields stay `None`, and
/// `featured_date` is only ever set on processed articles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub source_id: Uuid,
    pub title: String,
    pub url: String,
    pub author: Option<String>,
    pub content: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub category: String,
    pub summary: Option<String>,
    #[serde(rename = "ai_tags")]
    pub tags: Option<Vec<String>>,
    pub sentiment: Option<Sentiment>,
    pub relevance_score: Option<f64>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub featured_date: Option<NaiveDate>,
}

impl Article {
    /// A fresh, unprocessed article owned by `source`.
    pub fn new(
        source: &Source,
        title: String,
        url: String,
        author: Option<String>,
        content: Option<String>,
        published_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id: source.id,
            title,
            url,
            author,
            content,
            published_at,
            fetched_at: Utc::now(),
            category: source.category.clone(),
            summary: None,
            tags: None,
            sentiment: None,
            relevance_score: None,
            processed: false,
            processed_at: None,
            featured_date: None,
        }
    }

    pub fn apply_annotation(&mut self, annotation: Annotation, processed_at: DateTime<Utc>) {
        self.summary = Some(annotation.summary);
        self.tags = Some(annotation.tags);
        self.sentiment = Some(annotation.sentiment);
        self.relevance_score = Some(annotation.relevance_score);
        self.processed = true;
        self.processed_at = Some(processed_at);
    }
}

/// Lightweight article view for list endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleSummary {
    pub id: Uuid,
    pub title: String,
    pub url: String,
    pub category: String,
    pub summary: Option<String>,
    pub ai_tags: Option<Vec<String>>,
    pub sentiment: Option<Sentiment>,
    pub relevance_score: Option<f64>,
    pub published_at: Option<DateTime<Utc>>,
    pub featured_date: Option<NaiveDate>,
    pub source_name: Option<String>,
}

impl ArticleSummary {
    pub fn from_article(article: &Article, source_name: Option<String>) -> Self {
        Self {
            id: article.id,
            title: article.title.clone(),
            url: article.url.clone(),
            category: article.category.clone(),
            summary: article.summary.clone(),
            ai_tags: article.tags.clone(),
            sentiment: article.sentiment,
            relevance_score: article.relevance_score,
            published_at: article.published_at,
            featured_date: article.featured_date,
            source_name,
        }
    }
}

/// Full article with its owning source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleDetail {
    #[serde(flatten)]
    pub article: Article,
    pub source: Option<Source>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Newsletter {
    pub id: Uuid,
    pub title: String,
    pub url: String,
    pub content: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub executive_summary: Option<String>,
    pub processed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Running,
    Completed,
    Failed,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Running => "running",
            FetchStatus::Completed => "completed",
            FetchStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(FetchStatus::Running),
            "completed" => Ok(FetchStatus::Completed),
            "failed" => Ok(FetchStatus::Failed),
            other => Err(anyhow::anyhow!("unknown fetch status: {other}")),
        }
    }
}

/// Audit record of one collector run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchLog {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: FetchStatus,
    pub articles_fetched: i64,
    pub articles_processed: i64,
    pub errors: Option<Vec<String>>,
}

impl FetchLog {
    pub fn started() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            completed_at: None,
            status: FetchStatus::Running,
            articles_fetched: 0,
            articles_processed: 0,
            errors: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status != FetchStatus::Running
    }
}

/// Featured articles for one calendar date, grouped by category in
/// configuration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyDigest {
    pub date: NaiveDate,
    pub categories: IndexMap<String, Vec<ArticleSummary>>,
    pub total_articles: usize,
}

impl DailyDigest {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            categories: IndexMap::new(),
            total_articles: 0,
        }
    }

    pub fn insert_category(&mut self, category: &str, articles: Vec<ArticleSummary>) {
        self.total_articles += articles.len();
        if let Some(replaced) = self.categories.insert(category.to_owned(), articles) {
            self.total_articles -= replaced.len();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastFetch {
    pub status: FetchStatus,
    pub started_at: DateTime<Utc>,
    pub articles_fetched: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub total_articles: i64,
    pub processed_articles: i64,
    /// Keyed in configuration order
    pub articles_by_category: IndexMap<String, i64>,
    pub total_sources: i64,
    pub active_sources: i64,
    pub last_fetch: Option<LastFetch>,
    pub categories: Vec<String>,
    pub fetch_interval_hours: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_source() -> Source {
        Source::from_spec(
            &SourceSpec {
                name: "Krebs on Security".to_owned(),
                url: "https://krebsonsecurity.com".to_owned(),
                feed_url: "https://krebsonsecurity.com/feed/".to_owned(),
            },
            "cyber",
        )
    }

    #[test]
    fn sentiment_parses_case_insensitively() {
        assert_eq!("Positive".parse::<Sentiment>().unwrap(), Sentiment::Positive);
        assert_eq!(" negative ".parse::<Sentiment>().unwrap(), Sentiment::Negative);
        assert!("mixed".parse::<Sentiment>().is_err());
    }

    #[test]
    fn new_article_inherits_category_and_is_unannotated() {
        let source = sample_source();
        let article = Article::new(
            &source,
            "Patch Tuesday".to_owned(),
            "https://krebsonsecurity.com/patch".to_owned(),
            None,
            None,
            None,
        );

        assert_eq!(article.category, "cyber");
        assert_eq!(article.source_id, source.id);
        assert!(!article.processed);
        assert!(article.summary.is_none());
        assert!(article.tags.is_none());
        assert!(article.sentiment.is_none());
        assert!(article.relevance_score.is_none());
        assert!(article.featured_date.is_none());
    }

    #[test]
    fn applying_annotation_marks_processed() {
        let mut article = Article::new(
            &sample_source(),
            "t".to_owned(),
            "https://example.com/a".to_owned(),
            None,
            None,
            None,
        );
        let at = Utc::now();
        article.apply_annotation(Annotation::neutral("s"), at);

        assert!(article.processed);
        assert_eq!(article.processed_at, Some(at));
        assert_eq!(article.sentiment, Some(Sentiment::Neutral));
        assert_eq!(article.relevance_score, Some(0.5));
    }

    #[test]
    fn digest_total_tracks_categories() {
        let mut digest = DailyDigest::new(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        digest.insert_category("ai", Vec::new());
        assert_eq!(digest.total_articles, 0);
        assert_eq!(digest.categories.len(), 1);
    }

    #[test]
    fn digest_keeps_insertion_order_on_the_wire() {
        let mut digest = DailyDigest::new(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        for category in ["cyber", "ai", "cloud", "crypto"] {
            digest.insert_category(category, Vec::new());
        }

        let json = serde_json::to_string(&digest).unwrap();
        let positions: Vec<_> = ["cyber", "ai", "cloud", "crypto"]
            .iter()
            .map(|c| json.find(&format!("\"{c}\"")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn article_tags_serialize_as_ai_tags() {
        let mut article = Article::new(
            &sample_source(),
            "t".to_owned(),
            "https://example.com/b".to_owned(),
            None,
            None,
            None,
        );
        article.tags = Some(vec!["ransomware".to_owned()]);
        let json = serde_json::to_value(&article).unwrap();
        assert_eq!(json["ai_tags"][0], "ransomware");
    }
}
