use crate::config::Catalog;
use crate::parser::FeedParser;
use crate::store::Store;
use crate::traits::PageFetcher;
use crate::types::{AggregatorError, Article, ParsedEntry, Result, Source};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const UNTITLED: &str = "Untitled";

/// Outcome of one collection pass.
#[derive(Debug, Default)]
pub struct CollectReport {
    /// Articles stored during this pass
    pub articles: Vec<Article>,
    /// One message per source that was skipped
    pub errors: Vec<String>,
}

/// Pulls configured RSS feeds into the store.
pub struct FeedCollector {
    store: Store,
    fetcher: Arc<dyn PageFetcher>,
    catalog: Catalog,
}

impl FeedCollector {
    pub fn new(store: Store, fetcher: Arc<dyn PageFetcher>, catalog: Catalog) -> Self {
        Self {
            store,
            fetcher,
            catalog,
        }
    }

    /// Insert every catalog source not yet stored (matched by feed URL).
    /// Existing sources are never touched.
    pub async fn ensure_sources_exist(&self) -> Result<usize> {
        let mut inserted = 0;
        for (category, spec) in self.catalog.iter() {
            if self
                .store
                .insert_source_if_missing(&Source::from_spec(spec, category))
                .await?
            {
                inserted += 1;
            }
        }

        info!("Sources synchronized with configuration ({} new)", inserted);
        Ok(inserted)
    }

    pub async fn fetch_all_sources(&self, limit_per_source: usize) -> Result<Vec<Article>> {
        Ok(self.collect_all(limit_per_source).await?.articles)
    }

    /// Fetch every active source, recording the sources that had to be skipped.
    pub async fn collect_all(&self, limit_per_source: usize) -> Result<CollectReport> {
        let mut report = CollectReport::default();
        self.collect_all_into(limit_per_source, &mut report).await?;
        Ok(report)
    }

    /// Like `collect_all`, but progress lands in `report` as each source is
    /// stored, so a caller still sees what was committed when a later source
    /// aborts the pass.
    pub async fn collect_all_into(&self, limit_per_source: usize, report: &mut CollectReport) -> Result<()> {
        self.ensure_sources_exist().await?;
        let sources = self.store.list_sources(None, true).await?;
        self.collect_sources(&sources, limit_per_source, report).await?;

        info!(
            "Fetched {} new articles total ({} sources skipped)",
            report.articles.len(),
            report.errors.len()
        );
        Ok(())
    }

    pub async fn fetch_category(&self, category: &str, limit_per_source: usize) -> Result<Vec<Article>> {
        if !self.catalog.has_category(category) {
            return Err(AggregatorError::InvalidCategory {
                category: category.to_string(),
            });
        }

        self.ensure_sources_exist().await?;
        let sources = self.store.list_sources(Some(category), true).await?;
        let mut report = CollectReport::default();
        self.collect_sources(&sources, limit_per_source, &mut report).await?;
        Ok(report.articles)
    }

    pub async fn fetch_source(&self, source: &Source, limit: usize) -> Result<Vec<Article>> {
        self.ensure_sources_exist().await?;
        if !source.active {
            debug!("Source {} is inactive, skipping", source.name);
            return Ok(Vec::new());
        }
        let mut report = CollectReport::default();
        self.collect_sources(std::slice::from_ref(source), limit, &mut report)
            .await?;
        Ok(report.articles)
    }

    async fn collect_sources(&self, sources: &[Source], limit: usize, report: &mut CollectReport) -> Result<()> {
        for source in sources {
            info!("Fetching from {} ({})", source.name, source.category);

            let entries = match self.read_feed(source).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Skipping source {}: {}", source.name, e);
                    report.errors.push(format!("{}: {}", source.name, e));
                    continue;
                }
            };

            let mut fresh = Vec::new();
            for entry in entries.into_iter().take(limit) {
                if self.store.article_exists(&entry.url).await? {
                    continue;
                }
                fresh.push(article_from_entry(source, entry));
            }

            let stored = self.store.insert_articles(&fresh).await?;
            debug!("{} new articles from {}", stored.len(), source.name);
            report.articles.extend(stored);
        }

        Ok(())
    }

    async fn read_feed(&self, source: &Source) -> Result<Vec<ParsedEntry>> {
        let body = self.fetcher.fetch_text(&source.feed_url).await?;
        Ok(FeedParser::parse_feed(&body)?.entries)
    }
}

fn article_from_entry(source: &Source, entry: ParsedEntry) -> Article {
    Article::new(
        source,
        entry.title.unwrap_or_else(|| UNTITLED.to_string()),
        entry.url,
        entry.author,
        entry.content,
        entry.published_at,
    )
}
