use crate::pipeline::{JobQueue, Services};
use crate::store::ArticleFilter;
use crate::types::{
    AggregatorError, ArticleDetail, ArticleSummary, DailyDigest, FetchLog, Newsletter, Result, Source,
    Stats,
};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

const MAX_ARTICLES: i64 = 100;
const MAX_DIGEST_DATES: i64 = 90;
const MAX_CATEGORY_ARTICLES: i64 = 50;
const MAX_FETCH_LOGS: i64 = 50;

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
    pub queue: JobQueue,
}

/// Error body shared by every endpoint: `{"detail": "..."}`.
#[derive(Debug)]
pub struct ApiError(AggregatorError);

impl From<AggregatorError> for ApiError {
    fn from(err: AggregatorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AggregatorError::ArticleNotFound { .. }
            | AggregatorError::FetchLogNotFound { .. }
            | AggregatorError::NewsletterNotFound => StatusCode::NOT_FOUND,
            AggregatorError::InvalidCategory { .. } => StatusCode::BAD_REQUEST,
            other => {
                warn!("Request failed: {}", other);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

pub fn router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .services
        .settings
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/articles", get(list_articles))
        .route("/api/articles/{id}", get(get_article))
        .route("/api/digest", get(daily_digest))
        .route("/api/digest/dates", get(digest_dates))
        .route("/api/categories/{category}", get(category_articles))
        .route("/api/sources", get(list_sources))
        .route("/api/fetch/trigger", post(trigger_fetch))
        .route("/api/fetch/logs", get(fetch_logs))
        .route("/api/fetch/logs/{id}", get(fetch_log))
        .route("/api/stats", get(stats))
        .route("/api/newsletter/latest", get(latest_newsletter))
        .route("/api/newsletter/trigger", post(trigger_newsletter))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: AppState, bind_addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn clamp_limit(limit: Option<i64>, default: i64, max: i64) -> i64 {
    limit.unwrap_or(default).clamp(1, max)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let database = match state.services.store.ping().await {
        Ok(()) => "connected",
        Err(e) => {
            warn!("Health check database error: {}", e);
            "disconnected"
        }
    };

    Json(json!({
        "status": if database == "connected" { "healthy" } else { "unhealthy" },
        "database": database,
        "timestamp": Utc::now(),
    }))
}

#[derive(Debug, Deserialize)]
struct ArticlesQuery {
    category: Option<String>,
    featured_date: Option<NaiveDate>,
    processed_only: Option<bool>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_articles(
    State(state): State<AppState>,
    Query(query): Query<ArticlesQuery>,
) -> ApiResult<Vec<ArticleSummary>> {
    let filter = ArticleFilter {
        category: query.category,
        featured_date: query.featured_date,
        processed_only: query.processed_only.unwrap_or(true),
        limit: clamp_limit(query.limit, 20, MAX_ARTICLES),
        offset: query.offset.unwrap_or(0).max(0),
    };
    Ok(Json(state.services.store.list_articles(&filter).await?))
}

async fn get_article(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<ArticleDetail> {
    Ok(Json(state.services.store.get_article_detail(id).await?))
}

#[derive(Debug, Deserialize)]
struct DigestQuery {
    target_date: Option<NaiveDate>,
}

async fn daily_digest(State(state): State<AppState>, Query(query): Query<DigestQuery>) -> ApiResult<DailyDigest> {
    let date = query.target_date.unwrap_or_else(|| Utc::now().date_naive());
    Ok(Json(state.services.selector.get_daily_digest(date).await?))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct DatesResponse {
    dates: Vec<NaiveDate>,
}

async fn digest_dates(State(state): State<AppState>, Query(query): Query<LimitQuery>) -> ApiResult<DatesResponse> {
    let limit = clamp_limit(query.limit, 30, MAX_DIGEST_DATES);
    let dates = state.services.selector.available_dates(limit).await?;
    Ok(Json(DatesResponse { dates }))
}

#[derive(Debug, Deserialize)]
struct CategoryQuery {
    featured_date: Option<NaiveDate>,
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct CategoryArticles {
    category: String,
    total: usize,
    articles: Vec<ArticleSummary>,
}

async fn category_articles(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(query): Query<CategoryQuery>,
) -> ApiResult<CategoryArticles> {
    if !state.services.categories().contains(&category) {
        return Err(AggregatorError::InvalidCategory { category }.into());
    }

    let filter = ArticleFilter {
        category: Some(category.clone()),
        featured_date: query.featured_date,
        processed_only: true,
        limit: clamp_limit(query.limit, 10, MAX_CATEGORY_ARTICLES),
        offset: 0,
    };
    let articles = state.services.store.list_articles(&filter).await?;

    Ok(Json(CategoryArticles {
        category,
        total: articles.len(),
        articles,
    }))
}

#[derive(Debug, Deserialize)]
struct SourcesQuery {
    category: Option<String>,
    active_only: Option<bool>,
}

async fn list_sources(State(state): State<AppState>, Query(query): Query<SourcesQuery>) -> ApiResult<Vec<Source>> {
    let sources = state
        .services
        .store
        .list_sources(query.category.as_deref(), query.active_only.unwrap_or(true))
        .await?;
    Ok(Json(sources))
}

#[derive(Debug, Serialize)]
struct FetchTriggered {
    message: &'static str,
    log_id: Uuid,
    status: &'static str,
}

async fn trigger_fetch(State(state): State<AppState>) -> ApiResult<FetchTriggered> {
    let log_id = state.queue.trigger_collect().await?;
    Ok(Json(FetchTriggered {
        message: "Fetch job started",
        log_id,
        status: "running",
    }))
}

async fn fetch_logs(State(state): State<AppState>, Query(query): Query<LimitQuery>) -> ApiResult<Vec<FetchLog>> {
    let limit = clamp_limit(query.limit, 10, MAX_FETCH_LOGS);
    Ok(Json(state.services.store.list_fetch_logs(limit).await?))
}

async fn fetch_log(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<FetchLog> {
    let log = state
        .services
        .store
        .get_fetch_log(id)
        .await?
        .ok_or(AggregatorError::FetchLogNotFound { id })?;
    Ok(Json(log))
}

async fn stats(State(state): State<AppState>) -> ApiResult<Stats> {
    let services = &state.services;
    let stats = services
        .store
        .stats(services.categories(), services.settings.fetch_schedule_hours)
        .await?;
    Ok(Json(stats))
}

async fn latest_newsletter(State(state): State<AppState>) -> ApiResult<Newsletter> {
    let newsletter = state
        .services
        .newsletters
        .get_latest()
        .await?
        .ok_or(AggregatorError::NewsletterNotFound)?;
    Ok(Json(newsletter))
}

async fn trigger_newsletter(State(state): State<AppState>) -> ApiResult<Value> {
    state.queue.trigger_newsletter()?;
    Ok(Json(json!({
        "message": "Newsletter fetch job started",
        "newsletter_id": null,
        "status": "running",
    })))
}
