use crate::types::{
    AggregatorError, Article, ArticleDetail, ArticleSummary, FetchLog, FetchStatus, LastFetch,
    Newsletter, Result, Source, Stats,
};
use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const ARTICLE_WITH_SOURCE: &str =
    "SELECT a.*, s.name AS source_name FROM articles a LEFT JOIN sources s ON s.id = a.source_id";

/// Filters for article listings.
#[derive(Debug, Clone)]
pub struct ArticleFilter {
    pub category: Option<String>,
    pub featured_date: Option<NaiveDate>,
    pub processed_only: bool,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ArticleFilter {
    fn default() -> Self {
        Self {
            category: None,
            featured_date: None,
            processed_only: true,
            limit: 20,
            offset: 0,
        }
    }
}

/// Persistent store for sources, articles, newsletters and fetch logs.
#[derive(Clone)]
pub struct Store {
    db: SqlitePool,
}

impl Store {
    /// Open (or create) the database at `database_url` and apply migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");
        if !in_memory {
            ensure_parent_dir(database_url)?;
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // An in-memory database lives and dies with its single connection
        let db = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options.journal_mode(SqliteJournalMode::Wal))
                .await?
        };

        sqlx::migrate!("./migrations").run(&db).await?;
        info!("Database ready: {}", database_url);

        Ok(Self { db })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }

    // ---- sources ----

    /// Insert `source` unless a source with the same feed URL exists.
    pub async fn insert_source_if_missing(&self, source: &Source) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO sources (id, name, url, feed_url, category, active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (feed_url) DO NOTHING
            "#,
        )
        .bind(source.id)
        .bind(&source.name)
        .bind(&source.url)
        .bind(&source.feed_url)
        .bind(&source.category)
        .bind(source.active)
        .bind(source.created_at)
        .bind(source.updated_at)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_sources(&self, category: Option<&str>, active_only: bool) -> Result<Vec<Source>> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM sources WHERE 1 = 1");
        if let Some(category) = category {
            query.push(" AND category = ").push_bind(category.to_string());
        }
        if active_only {
            query.push(" AND active = 1");
        }
        query.push(" ORDER BY created_at, rowid");

        let rows = query.build().fetch_all(&self.db).await?;
        rows.iter().map(source_from_row).collect()
    }

    pub async fn get_source(&self, id: Uuid) -> Result<Option<Source>> {
        let row = sqlx::query("SELECT * FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(source_from_row).transpose()
    }

    pub async fn set_source_active(&self, id: Uuid, active: bool) -> Result<()> {
        sqlx::query("UPDATE sources SET active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.db)
            .await?;

        debug!("Source {} active = {}", id, active);
        Ok(())
    }

    // ---- articles ----

    pub async fn article_exists(&self, url: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE url = ?")
            .bind(url)
            .fetch_one(&self.db)
            .await?;
        Ok(count > 0)
    }

    /// Store new articles in one transaction, returning the ones actually
    /// inserted. Rows whose URL is already present are skipped.
    pub async fn insert_articles(&self, articles: &[Article]) -> Result<Vec<Article>> {
        let mut tx = self.db.begin().await?;
        let mut stored = Vec::with_capacity(articles.len());

        for article in articles {
            let result = sqlx::query(
                r#"
                INSERT INTO articles (id, source_id, title, url, author, content, published_at,
                                      fetched_at, category, processed)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
                ON CONFLICT (url) DO NOTHING
                "#,
            )
            .bind(article.id)
            .bind(article.source_id)
            .bind(&article.title)
            .bind(&article.url)
            .bind(&article.author)
            .bind(&article.content)
            .bind(article.published_at)
            .bind(article.fetched_at)
            .bind(&article.category)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                stored.push(article.clone());
            } else {
                warn!("Article already stored, skipping: {}", article.url);
            }
        }

        tx.commit().await?;
        debug!("Stored {} new articles out of {}", stored.len(), articles.len());
        Ok(stored)
    }

    pub async fn get_article(&self, id: Uuid) -> Result<Option<Article>> {
        let row = sqlx::query("SELECT * FROM articles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(article_from_row).transpose()
    }

    pub async fn get_article_detail(&self, id: Uuid) -> Result<ArticleDetail> {
        let article = self
            .get_article(id)
            .await?
            .ok_or(AggregatorError::ArticleNotFound { id })?;
        let source = self.get_source(article.source_id).await?;
        Ok(ArticleDetail { article, source })
    }

    pub async fn get_article_by_url(&self, url: &str) -> Result<Option<Article>> {
        let row = sqlx::query("SELECT * FROM articles WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(article_from_row).transpose()
    }

    pub async fn unprocessed_articles(&self, limit: usize) -> Result<Vec<Article>> {
        let rows = sqlx::query("SELECT * FROM articles WHERE processed = 0 ORDER BY fetched_at, rowid LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.db)
            .await?;
        rows.iter().map(article_from_row).collect()
    }

    pub async fn save_annotation(&self, article: &Article) -> Result<()> {
        self.save_annotations(std::slice::from_ref(article)).await
    }

    /// Persist annotation fields of every article in a single commit.
    pub async fn save_annotations(&self, articles: &[Article]) -> Result<()> {
        let mut tx = self.db.begin().await?;

        for article in articles {
            let tags = article.tags.as_ref().map(serde_json::to_string).transpose()?;
            sqlx::query(
                r#"
                UPDATE articles
                SET summary = ?, tags = ?, sentiment = ?, relevance_score = ?,
                    processed = ?, processed_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&article.summary)
            .bind(tags)
            .bind(article.sentiment.map(|s| s.as_str()))
            .bind(article.relevance_score)
            .bind(article.processed)
            .bind(article.processed_at)
            .bind(article.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Processed, never-featured articles of `category` published at or after `since`.
    pub async fn feature_candidates(&self, category: &str, since: DateTime<Utc>) -> Result<Vec<Article>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM articles
            WHERE category = ? AND processed = 1 AND featured_date IS NULL
              AND published_at IS NOT NULL AND published_at >= ?
            "#,
        )
        .bind(category)
        .bind(since)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(article_from_row).collect()
    }

    /// Set `featured_date` on the given articles. Already featured or
    /// unprocessed rows are left alone.
    /// Stamp `date` on each id still eligible, returning the ids that were
    /// actually updated.
    pub async fn mark_featured(&self, ids: &[Uuid], date: NaiveDate) -> Result<Vec<Uuid>> {
        let mut tx = self.db.begin().await?;
        let mut updated = Vec::with_capacity(ids.len());

        for id in ids {
            let result = sqlx::query(
                "UPDATE articles SET featured_date = ? WHERE id = ? AND featured_date IS NULL AND processed = 1",
            )
            .bind(date)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() > 0 {
                updated.push(*id);
            }
        }

        tx.commit().await?;
        Ok(updated)
    }

    pub async fn featured_on(&self, category: &str, date: NaiveDate) -> Result<Vec<ArticleSummary>> {
        let rows = sqlx::query(&format!(
            "{ARTICLE_WITH_SOURCE} WHERE a.category = ? AND a.featured_date = ? \
             ORDER BY a.relevance_score DESC, a.published_at DESC"
        ))
        .bind(category)
        .bind(date)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(summary_from_row).collect()
    }

    pub async fn featured_dates(&self, limit: i64) -> Result<Vec<NaiveDate>> {
        let dates = sqlx::query_scalar::<_, NaiveDate>(
            "SELECT DISTINCT featured_date FROM articles WHERE featured_date IS NOT NULL \
             ORDER BY featured_date DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        Ok(dates)
    }

    pub async fn list_articles(&self, filter: &ArticleFilter) -> Result<Vec<ArticleSummary>> {
        let mut query = QueryBuilder::<Sqlite>::new(ARTICLE_WITH_SOURCE);
        query.push(" WHERE 1 = 1");
        if let Some(category) = &filter.category {
            query.push(" AND a.category = ").push_bind(category.clone());
        }
        if let Some(date) = filter.featured_date {
            query.push(" AND a.featured_date = ").push_bind(date);
        }
        if filter.processed_only {
            query.push(" AND a.processed = 1");
        }
        query
            .push(" ORDER BY a.relevance_score DESC, a.published_at DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        let rows = query.build().fetch_all(&self.db).await?;
        rows.iter().map(summary_from_row).collect()
    }

    // ---- newsletters ----

    pub async fn get_newsletter_by_url(&self, url: &str) -> Result<Option<Newsletter>> {
        let row = sqlx::query("SELECT * FROM newsletters WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(newsletter_from_row).transpose()
    }

    /// Store `newsletter`, or return the stored row if its URL already exists.
    pub async fn insert_newsletter(&self, newsletter: &Newsletter) -> Result<Newsletter> {
        sqlx::query(
            r#"
            INSERT INTO newsletters (id, title, url, content, published_at, fetched_at,
                                     executive_summary, processed)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (url) DO NOTHING
            "#,
        )
        .bind(newsletter.id)
        .bind(&newsletter.title)
        .bind(&newsletter.url)
        .bind(&newsletter.content)
        .bind(newsletter.published_at)
        .bind(newsletter.fetched_at)
        .bind(&newsletter.executive_summary)
        .bind(newsletter.processed)
        .execute(&self.db)
        .await?;

        self.get_newsletter_by_url(&newsletter.url)
            .await?
            .ok_or(AggregatorError::NewsletterNotFound)
    }

    pub async fn save_newsletter_summary(&self, newsletter: &Newsletter) -> Result<()> {
        sqlx::query("UPDATE newsletters SET executive_summary = ?, processed = ? WHERE id = ?")
            .bind(&newsletter.executive_summary)
            .bind(newsletter.processed)
            .bind(newsletter.id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn latest_newsletter(&self) -> Result<Option<Newsletter>> {
        let row = sqlx::query(
            "SELECT * FROM newsletters ORDER BY published_at DESC, fetched_at DESC LIMIT 1",
        )
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(newsletter_from_row).transpose()
    }

    pub async fn count_newsletters(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM newsletters")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    // ---- fetch logs ----

    pub async fn create_fetch_log(&self) -> Result<FetchLog> {
        let log = FetchLog::started();
        sqlx::query(
            r#"
            INSERT INTO fetch_logs (id, started_at, status, articles_fetched, articles_processed)
            VALUES (?, ?, ?, 0, 0)
            "#,
        )
        .bind(log.id)
        .bind(log.started_at)
        .bind(log.status.as_str())
        .execute(&self.db)
        .await?;
        Ok(log)
    }

    /// Finish a running fetch log. Returns false if the log was not running,
    /// in which case nothing is changed.
    pub async fn complete_fetch_log(
        &self,
        id: Uuid,
        status: FetchStatus,
        articles_fetched: i64,
        articles_processed: i64,
        errors: &[String],
    ) -> Result<bool> {
        let errors = if errors.is_empty() {
            None
        } else {
            Some(serde_json::to_string(errors)?)
        };

        let result = sqlx::query(
            r#"
            UPDATE fetch_logs
            SET status = ?, completed_at = ?, articles_fetched = ?, articles_processed = ?, errors = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(articles_fetched)
        .bind(articles_processed)
        .bind(errors)
        .bind(id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            warn!("Fetch log {} was not running; completion ignored", id);
            return Ok(false);
        }
        Ok(true)
    }

    pub async fn get_fetch_log(&self, id: Uuid) -> Result<Option<FetchLog>> {
        let row = sqlx::query("SELECT * FROM fetch_logs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(fetch_log_from_row).transpose()
    }

    pub async fn list_fetch_logs(&self, limit: i64) -> Result<Vec<FetchLog>> {
        let rows = sqlx::query("SELECT * FROM fetch_logs ORDER BY started_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.db)
            .await?;
        rows.iter().map(fetch_log_from_row).collect()
    }

    // ---- stats ----

    pub async fn stats(&self, categories: &[String], fetch_interval_hours: u64) -> Result<Stats> {
        let total_articles = self.count("SELECT COUNT(*) FROM articles").await?;
        let processed_articles = self
            .count("SELECT COUNT(*) FROM articles WHERE processed = 1")
            .await?;

        let mut articles_by_category = IndexMap::new();
        for category in categories {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE category = ?")
                .bind(category)
                .fetch_one(&self.db)
                .await?;
            articles_by_category.insert(category.clone(), count);
        }

        let total_sources = self.count("SELECT COUNT(*) FROM sources").await?;
        let active_sources = self
            .count("SELECT COUNT(*) FROM sources WHERE active = 1")
            .await?;

        let last_fetch = self.list_fetch_logs(1).await?.into_iter().next().map(|log| LastFetch {
            status: log.status,
            started_at: log.started_at,
            articles_fetched: log.articles_fetched,
        });

        Ok(Stats {
            total_articles,
            processed_articles,
            articles_by_category,
            total_sources,
            active_sources,
            last_fetch,
            categories: categories.to_vec(),
            fetch_interval_hours,
        })
    }

    async fn count(&self, sql: &str) -> Result<i64> {
        let count = sqlx::query_scalar(sql).fetch_one(&self.db).await?;
        Ok(count)
    }
}

fn ensure_parent_dir(database_url: &str) -> Result<()> {
    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn source_from_row(row: &SqliteRow) -> Result<Source> {
    Ok(Source {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        feed_url: row.try_get("feed_url")?,
        category: row.try_get("category")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn article_from_row(row: &SqliteRow) -> Result<Article> {
    let tags: Option<String> = row.try_get("tags")?;
    let tags = tags
        .map(|raw| serde_json::from_str::<Vec<String>>(&raw))
        .transpose()?;
    let sentiment: Option<String> = row.try_get("sentiment")?;

    Ok(Article {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        author: row.try_get("author")?,
        content: row.try_get("content")?,
        published_at: row.try_get("published_at")?,
        fetched_at: row.try_get("fetched_at")?,
        category: row.try_get("category")?,
        summary: row.try_get("summary")?,
        tags,
        sentiment: sentiment.and_then(|s| s.parse().ok()),
        relevance_score: row.try_get("relevance_score")?,
        processed: row.try_get("processed")?,
        processed_at: row.try_get("processed_at")?,
        featured_date: row.try_get("featured_date")?,
    })
}

fn summary_from_row(row: &SqliteRow) -> Result<ArticleSummary> {
    let article = article_from_row(row)?;
    let source_name: Option<String> = row.try_get("source_name")?;
    Ok(ArticleSummary::from_article(&article, source_name))
}

fn newsletter_from_row(row: &SqliteRow) -> Result<Newsletter> {
    Ok(Newsletter {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        content: row.try_get("content")?,
        published_at: row.try_get("published_at")?,
        fetched_at: row.try_get("fetched_at")?,
        executive_summary: row.try_get("executive_summary")?,
        processed: row.try_get("processed")?,
    })
}

fn fetch_log_from_row(row: &SqliteRow) -> Result<FetchLog> {
    let status: String = row.try_get("status")?;
    let status = FetchStatus::from_str(&status).map_err(|e| AggregatorError::General(e.to_string()))?;
    let errors: Option<String> = row.try_get("errors")?;
    let errors = errors
        .map(|raw| serde_json::from_str::<Vec<String>>(&raw))
        .transpose()?;

    Ok(FetchLog {
        id: row.try_get("id")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        status,
        articles_fetched: row.try_get("articles_fetched")?,
        articles_processed: row.try_get("articles_processed")?,
        errors,
    })
}
