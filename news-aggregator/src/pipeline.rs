use crate::annotator::Annotator;
use crate::collector::{CollectReport, FeedCollector};
use crate::config::{Catalog, Settings};
use crate::newsletter::NewsletterCollector;
use crate::selector::FeaturingSelector;
use crate::store::Store;
use crate::traits::{PageFetcher, TextOracle};
use crate::types::{AggregatorError, FetchLog, FetchStatus, Newsletter, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Work the background worker knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Collect, annotate and feature; `log_id` is the running FetchLog.
    Collect { log_id: Uuid },
    /// Fetch the latest newsletter and summarize it.
    Newsletter,
}

/// Every component a job touches, wired from one `Settings`.
pub struct Services {
    pub store: Store,
    pub settings: Settings,
    pub collector: FeedCollector,
    pub newsletters: NewsletterCollector,
    pub annotator: Annotator,
    pub selector: FeaturingSelector,
}

/// Pause before the second attempt at completing a fetch log.
pub const COMPLETE_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct Progress {
    fetched: i64,
    processed: i64,
    errors: Vec<String>,
}

impl Services {
    pub fn new(
        store: Store,
        settings: Settings,
        catalog: Catalog,
        fetcher: Arc<dyn PageFetcher>,
        oracle: Arc<dyn TextOracle>,
    ) -> Self {
        let selector = FeaturingSelector::new(
            store.clone(),
            catalog.categories(),
            settings.feature_window_hours,
        );
        let newsletters = NewsletterCollector::new(
            store.clone(),
            fetcher.clone(),
            settings.newsletter_feed_url.clone(),
        );

        Self {
            collector: FeedCollector::new(store.clone(), fetcher, catalog),
            newsletters,
            annotator: Annotator::new(store.clone(), oracle),
            selector,
            store,
            settings,
        }
    }

    pub fn categories(&self) -> &[String] {
        self.selector.categories()
    }

    /// Run the collect job for a running log and complete that log.
    ///
    /// Work committed before a failure stays committed; the failure is
    /// recorded on the log rather than returned.
    pub async fn run_collect(&self, log_id: Uuid) -> Result<FetchLog> {
        info!("Collect job {} started", log_id);
        let mut progress = Progress::default();

        let status = match self.collect_annotate_select(&mut progress).await {
            Ok(()) => FetchStatus::Completed,
            Err(e) => {
                error!("Collect job {} failed: {}", log_id, e);
                progress.errors.push(e.to_string());
                FetchStatus::Failed
            }
        };

        self.complete_log(log_id, status, &progress).await?;
        info!(
            "Collect job {} {}: {} fetched, {} processed",
            log_id, status, progress.fetched, progress.processed
        );

        self.store
            .get_fetch_log(log_id)
            .await?
            .ok_or(AggregatorError::FetchLogNotFound { id: log_id })
    }

    /// Write the outcome, trying once more after a pause. If the store is
    /// still unreachable the log stays `running` and the error is returned.
    async fn complete_log(&self, log_id: Uuid, status: FetchStatus, progress: &Progress) -> Result<()> {
        let complete = move || {
            self.store.complete_fetch_log(
                log_id,
                status,
                progress.fetched,
                progress.processed,
                &progress.errors,
            )
        };

        if let Err(e) = complete().await {
            warn!("Completing fetch log {} failed, retrying: {}", log_id, e);
            sleep(COMPLETE_RETRY_DELAY).await;
            complete().await?;
        }
        Ok(())
    }

    async fn collect_annotate_select(&self, progress: &mut Progress) -> Result<()> {
        let mut report = CollectReport::default();
        let collected = self
            .collector
            .collect_all_into(self.settings.articles_per_source, &mut report)
            .await;
        progress.fetched = report.articles.len() as i64;
        progress.errors.extend(report.errors);
        collected?;

        let processed = self
            .annotator
            .process_unprocessed_articles(self.settings.annotation_batch_limit)
            .await?;
        progress.processed = processed as i64;

        self.selector
            .select_top_articles_for_today(self.settings.articles_per_category)
            .await?;
        Ok(())
    }

    /// Fetch the newest issue and summarize it if that has not happened yet.
    pub async fn run_newsletter(&self) -> Result<Option<Newsletter>> {
        let Some(newsletter) = self.newsletters.fetch_latest().await? else {
            return Ok(None);
        };
        if newsletter.processed {
            return Ok(Some(newsletter));
        }
        Ok(Some(self.annotator.process_newsletter(newsletter).await?))
    }
}

/// Handle for enqueuing jobs onto the single background worker.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<Job>,
    store: Store,
}

impl JobQueue {
    /// Spawn the worker. Jobs run one at a time in submission order; the
    /// worker exits once every queue handle is dropped.
    pub fn start(services: Arc<Services>) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = Self {
            sender,
            store: services.store.clone(),
        };
        let worker = tokio::spawn(run_worker(services, receiver));
        (queue, worker)
    }

    /// Open a running FetchLog, enqueue its collect job and return the log id.
    pub async fn trigger_collect(&self) -> Result<Uuid> {
        let log = self.store.create_fetch_log().await?;

        if self.sender.send(Job::Collect { log_id: log.id }).is_err() {
            let reason = AggregatorError::WorkerStopped.to_string();
            self.store
                .complete_fetch_log(log.id, FetchStatus::Failed, 0, 0, &[reason])
                .await?;
            return Err(AggregatorError::WorkerStopped);
        }

        debug!("Enqueued collect job {}", log.id);
        Ok(log.id)
    }

    pub fn trigger_newsletter(&self) -> Result<()> {
        self.sender
            .send(Job::Newsletter)
            .map_err(|_| AggregatorError::WorkerStopped)?;
        debug!("Enqueued newsletter job");
        Ok(())
    }

    /// Enqueue a collect and a newsletter job every `every`, starting one
    /// period from now.
    ///
    /// A tick that fails to enqueue is logged and the next tick tries again.
    /// The scheduler only stops once the worker is gone.
    pub fn spawn_scheduler(&self, every: Duration) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                info!("Scheduled run");
                let collect = queue.trigger_collect().await;
                let newsletter = queue.trigger_newsletter();

                for (job, outcome) in [("collect", collect.map(|_| ())), ("newsletter", newsletter)] {
                    match outcome {
                        Ok(()) => {}
                        Err(AggregatorError::WorkerStopped) => {
                            error!("Job worker is gone, stopping the scheduler");
                            return;
                        }
                        Err(e) => warn!("Scheduled {} could not be enqueued: {}", job, e),
                    }
                }
            }
        })
    }
}

async fn run_worker(services: Arc<Services>, mut receiver: mpsc::UnboundedReceiver<Job>) {
    info!("Job worker started");

    while let Some(job) = receiver.recv().await {
        match job {
            Job::Collect { log_id } => {
                if let Err(e) = services.run_collect(log_id).await {
                    error!("Collect job {} could not be recorded: {}", log_id, e);
                }
            }
            Job::Newsletter => match services.run_newsletter().await {
                Ok(Some(newsletter)) => info!("Newsletter ready: {}", newsletter.title),
                Ok(None) => warn!("Newsletter job found nothing to store"),
                Err(e) => error!("Newsletter job failed: {}", e),
            },
        }
    }

    info!("Job worker stopped");
}
