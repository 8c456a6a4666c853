use crate::store::Store;
use crate::types::{Article, DailyDigest, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info};

/// Articles featured for one category in a selection run.
#[derive(Debug, Clone)]
pub struct CategorySelection {
    pub category: String,
    pub articles: Vec<Article>,
}

/// Rank feature candidates: keep those published at or after `since`,
/// order by relevance (missing counts as 0.0) then recency, and keep the
/// first `limit`.
pub fn rank_candidates(candidates: Vec<Article>, since: DateTime<Utc>, limit: usize) -> Vec<Article> {
    let mut ranked: Vec<Article> = candidates
        .into_iter()
        .filter(|a| a.processed && a.featured_date.is_none())
        .filter(|a| a.published_at.is_some_and(|published| published >= since))
        .collect();

    ranked.sort_by(|a, b| {
        let score_a = a.relevance_score.unwrap_or(0.0);
        let score_b = b.relevance_score.unwrap_or(0.0);
        score_b
            .total_cmp(&score_a)
            .then_with(|| b.published_at.cmp(&a.published_at))
    });
    ranked.truncate(limit);
    ranked
}

/// Daily selection of each category's top articles.
pub struct FeaturingSelector {
    store: Store,
    categories: Vec<String>,
    window: Duration,
}

impl FeaturingSelector {
    pub fn new(store: Store, categories: Vec<String>, window_hours: i64) -> Self {
        Self {
            store,
            categories,
            window: Duration::hours(window_hours),
        }
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub async fn select_top_articles_for_today(&self, per_category: usize) -> Result<Vec<CategorySelection>> {
        self.select_top_articles_at(Utc::now(), per_category).await
    }

    /// Feature up to `per_category` articles per category as of `now`.
    ///
    /// Only processed, never-featured articles published inside the trailing
    /// window qualify. Their `featured_date` becomes the UTC date of `now`;
    /// nothing else about them changes.
    pub async fn select_top_articles_at(
        &self,
        now: DateTime<Utc>,
        per_category: usize,
    ) -> Result<Vec<CategorySelection>> {
        let today = now.date_naive();
        let since = now - self.window;
        let mut selections = Vec::with_capacity(self.categories.len());

        for category in &self.categories {
            let candidates = self.store.feature_candidates(category, since).await?;
            let chosen = rank_candidates(candidates, since, per_category);

            let ids: Vec<_> = chosen.iter().map(|a| a.id).collect();
            let marked = self.store.mark_featured(&ids, today).await?;
            // a concurrent run may have featured some of them first
            let chosen: Vec<_> = chosen
                .into_iter()
                .filter(|a| marked.contains(&a.id))
                .map(|mut a| {
                    a.featured_date = Some(today);
                    a
                })
                .collect();

            debug!("Featured {} {} articles for {}", chosen.len(), category, today);
            selections.push(CategorySelection {
                category: category.clone(),
                articles: chosen,
            });
        }

        let total: usize = selections.iter().map(|s| s.articles.len()).sum();
        info!("Selected {} featured articles for {}", total, today);
        Ok(selections)
    }

    /// Everything featured on `date`, per category, most relevant first.
    pub async fn get_daily_digest(&self, date: NaiveDate) -> Result<DailyDigest> {
        let mut digest = DailyDigest::new(date);
        for category in &self.categories {
            let articles = self.store.featured_on(category, date).await?;
            digest.insert_category(category, articles);
        }
        Ok(digest)
    }

    pub async fn available_dates(&self, limit: i64) -> Result<Vec<NaiveDate>> {
        self.store.featured_dates(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Source, SourceSpec};

    fn article(title: &str, score: Option<f64>, published: Option<DateTime<Utc>>) -> Article {
        let source = Source::from_spec(
            &SourceSpec {
                name: "s".to_string(),
                url: "https://s.example".to_string(),
                feed_url: "https://s.example/feed".to_string(),
            },
            "cyber",
        );
        let mut article = Article::new(
            &source,
            title.to_string(),
            format!("https://s.example/{title}"),
            None,
            None,
            published,
        );
        article.processed = true;
        article.relevance_score = score;
        article
    }

    #[test]
    fn ties_break_on_recency_and_low_scores_drop() {
        let now = Utc::now();
        let since = now - Duration::hours(24);
        let ranked = rank_candidates(
            vec![
                article("older-high", Some(0.9), Some(now - Duration::hours(5))),
                article("mid", Some(0.5), Some(now - Duration::hours(1))),
                article("newer-high", Some(0.9), Some(now - Duration::hours(2))),
            ],
            since,
            2,
        );
        let titles: Vec<_> = ranked.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["newer-high", "older-high"]);
    }

    #[test]
    fn window_and_missing_dates_exclude() {
        let now = Utc::now();
        let ranked = rank_candidates(
            vec![
                article("stale", Some(1.0), Some(now - Duration::hours(30))),
                article("undated", Some(1.0), None),
                article("unscored", None, Some(now)),
            ],
            now - Duration::hours(24),
            5,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].title, "unscored");
    }
}
