mod common;

use chrono::{Duration, Utc};
use common::*;
use news_aggregator::{AggregatorError, FetchLog, FetchStatus, JobQueue, Result, Store};
use std::sync::Arc;
use uuid::Uuid;

fn cyber_feed() -> String {
    let now = Utc::now();
    rss(&[
        item("Ransomware gang busted", "https://cyber-one.test/busted", Some(now - Duration::hours(1))),
        item("Old advisory", "https://cyber-one.test/old", Some(now - Duration::hours(40))),
    ])
}

async fn wait_until_finished(store: &Store, id: Uuid) -> FetchLog {
    for _ in 0..200 {
        let log = store.get_fetch_log(id).await.unwrap().unwrap();
        if log.is_finished() {
            return log;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("fetch log {id} never finished");
}

#[tokio::test]
async fn collect_job_runs_every_stage_and_completes_the_log() -> Result<()> {
    init_tracing();
    let store = memory_store().await;
    let fetcher = Arc::new(StaticFetcher::new().with("https://cyber-one.test/feed", cyber_feed()));
    let oracle = Arc::new(ScriptedOracle::replying(&good_reply(0.8)));
    let services = services(store.clone(), fetcher, oracle);

    let log = store.create_fetch_log().await?;
    assert_eq!(log.status, FetchStatus::Running);

    let finished = services.run_collect(log.id).await?;
    assert_eq!(finished.status, FetchStatus::Completed);
    assert!(finished.completed_at.is_some());
    assert_eq!(finished.articles_fetched, 2);
    assert_eq!(finished.articles_processed, 2);

    // the two unreachable sources are reported but do not fail the run
    let errors = finished.errors.unwrap_or_default();
    assert_eq!(errors.len(), 2);

    let digest = services.selector.get_daily_digest(Utc::now().date_naive()).await?;
    assert_eq!(digest.total_articles, 1);
    assert_eq!(digest.categories["cyber"][0].title, "Ransomware gang busted");
    Ok(())
}

#[tokio::test]
async fn a_log_is_completed_exactly_once() -> Result<()> {
    let store = memory_store().await;
    let log = store.create_fetch_log().await?;

    assert!(store.complete_fetch_log(log.id, FetchStatus::Completed, 3, 3, &[]).await?);
    assert!(!store
        .complete_fetch_log(log.id, FetchStatus::Failed, 0, 0, &["late".to_string()])
        .await?);

    let stored = store.get_fetch_log(log.id).await?.unwrap();
    assert_eq!(stored.status, FetchStatus::Completed);
    assert_eq!(stored.articles_fetched, 3);
    assert!(stored.errors.is_none());
    Ok(())
}

#[tokio::test]
async fn queued_collect_is_visible_through_the_log() -> Result<()> {
    init_tracing();
    let store = memory_store().await;
    let fetcher = Arc::new(StaticFetcher::new().with("https://cyber-one.test/feed", cyber_feed()));
    let services = services(store.clone(), fetcher, Arc::new(ScriptedOracle::failing()));
    let (queue, _worker) = JobQueue::start(services);

    let first = queue.trigger_collect().await?;
    let second = queue.trigger_collect().await?;
    assert_ne!(first, second);

    let first_log = wait_until_finished(&store, first).await;
    assert_eq!(first_log.status, FetchStatus::Completed);
    assert_eq!(first_log.articles_fetched, 2);

    // jobs run one after another, so the second run finds nothing new
    let second_log = wait_until_finished(&store, second).await;
    assert_eq!(second_log.status, FetchStatus::Completed);
    assert_eq!(second_log.articles_fetched, 0);
    assert_eq!(second_log.articles_processed, 0);

    let logs = store.list_fetch_logs(10).await?;
    assert_eq!(logs.len(), 2);
    Ok(())
}

#[tokio::test]
async fn job_failure_is_recorded_on_the_log() -> Result<()> {
    let store = memory_store().await;
    let fetcher = Arc::new(StaticFetcher::new().with("https://cyber-one.test/feed", cyber_feed()));
    let services = services(store.clone(), fetcher, Arc::new(ScriptedOracle::failing()));

    let log = store.create_fetch_log().await?;
    // without the articles table the collector fails on its first lookup
    sqlx::query("DROP TABLE articles").execute(store.pool()).await?;

    let finished = services.run_collect(log.id).await?;
    assert_eq!(finished.status, FetchStatus::Failed);
    assert!(finished.completed_at.is_some());
    assert_eq!(finished.articles_fetched, 0);
    let errors = finished.errors.unwrap_or_default();
    assert!(errors.last().unwrap().contains("no such table"));
    Ok(())
}

#[tokio::test]
async fn newsletter_job_fetches_and_summarizes() -> Result<()> {
    let store = memory_store().await;
    let fetcher = Arc::new(StaticFetcher::new().with(
        NEWSLETTER_FEED,
        rss(&[item("tl;dr sec #310", "https://newsletter.test/p/310", Some(Utc::now()))]),
    ));
    let oracle = Arc::new(ScriptedOracle::replying("Key Themes: identity"));
    let services = services(store.clone(), fetcher, oracle.clone());

    let newsletter = services.run_newsletter().await?.unwrap();
    assert!(newsletter.processed);
    assert_eq!(newsletter.executive_summary.as_deref(), Some("Key Themes: identity"));

    // a second run finds the stored, processed issue and leaves it alone
    let again = services.run_newsletter().await?.unwrap();
    assert_eq!(again.id, newsletter.id);
    assert_eq!(oracle.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_run_keeps_the_progress_made_before_the_failure() -> Result<()> {
    init_tracing();
    let store = memory_store().await;
    let fetcher = Arc::new(
        StaticFetcher::new()
            .with("https://cyber-one.test/feed", cyber_feed())
            .with("https://ai-one.test/feed", rss(&[item("Rejected", "https://ai-one.test/rejected", None)])),
    );
    let services = services(store.clone(), fetcher, Arc::new(ScriptedOracle::failing()));

    // sources run in catalog order: cyber-one stores two, cyber-two is a 404,
    // then the ai-one insert aborts the pass
    sqlx::query(
        "CREATE TRIGGER reject_ai BEFORE INSERT ON articles \
         WHEN NEW.url LIKE 'https://ai-one.test/%' BEGIN SELECT RAISE(ABORT, 'insert rejected'); END",
    )
    .execute(store.pool())
    .await?;

    let log = store.create_fetch_log().await?;
    let finished = services.run_collect(log.id).await?;

    assert_eq!(finished.status, FetchStatus::Failed);
    assert_eq!(finished.articles_fetched, 2);
    assert_eq!(finished.articles_processed, 0);
    let errors = finished.errors.unwrap_or_default();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].starts_with("Cyber Two"));
    assert!(errors[1].contains("insert rejected"));

    assert!(store.article_exists("https://cyber-one.test/busted").await?);
    Ok(())
}

#[tokio::test]
async fn log_completion_is_retried_once() -> Result<()> {
    let store = memory_store().await;
    let services = services(store.clone(), Arc::new(StaticFetcher::new()), Arc::new(ScriptedOracle::failing()));
    let log = store.create_fetch_log().await?;

    sqlx::query("ALTER TABLE fetch_logs RENAME TO fetch_logs_away").execute(store.pool()).await?;
    let run = tokio::spawn({
        let services = services.clone();
        async move { services.run_collect(log.id).await }
    });

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    sqlx::query("ALTER TABLE fetch_logs_away RENAME TO fetch_logs").execute(store.pool()).await?;

    let finished = run.await.expect("collect task")?;
    assert_eq!(finished.status, FetchStatus::Completed);
    assert!(finished.completed_at.is_some());
    Ok(())
}

#[tokio::test]
async fn scheduler_keeps_running_after_a_failed_tick() -> Result<()> {
    init_tracing();
    let store = memory_store().await;
    let services = services(store.clone(), Arc::new(StaticFetcher::new()), Arc::new(ScriptedOracle::failing()));
    let (queue, _worker) = JobQueue::start(services);

    // the first ticks cannot open a fetch log
    sqlx::query("ALTER TABLE fetch_logs RENAME TO fetch_logs_away").execute(store.pool()).await?;
    let scheduler = queue.spawn_scheduler(std::time::Duration::from_millis(100));
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    sqlx::query("ALTER TABLE fetch_logs_away RENAME TO fetch_logs").execute(store.pool()).await?;

    let mut logs = Vec::new();
    for _ in 0..300 {
        logs = store.list_fetch_logs(10).await?;
        if !logs.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(!logs.is_empty());
    assert!(!scheduler.is_finished());

    scheduler.abort();
    Ok(())
}

#[tokio::test]
async fn scheduler_and_triggers_stop_once_the_worker_is_gone() -> Result<()> {
    let store = memory_store().await;
    let services = services(store.clone(), Arc::new(StaticFetcher::new()), Arc::new(ScriptedOracle::failing()));
    let (queue, worker) = JobQueue::start(services);
    worker.abort();
    let _ = worker.await;

    assert!(matches!(queue.trigger_collect().await, Err(AggregatorError::WorkerStopped)));
    assert!(matches!(queue.trigger_newsletter(), Err(AggregatorError::WorkerStopped)));

    // the orphaned log is closed instead of staying running
    let logs = store.list_fetch_logs(10).await?;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, FetchStatus::Failed);

    let scheduler = queue.spawn_scheduler(std::time::Duration::from_millis(50));
    let stopped = tokio::time::timeout(std::time::Duration::from_secs(2), scheduler).await;
    assert!(stopped.is_ok());
    Ok(())
}
