use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use news_aggregator::api::{self, AppState};
use news_aggregator::config::{DEFAULT_MODEL, DEFAULT_NEWSLETTER_FEED};
use news_aggregator::logging::configure_logging;
use news_aggregator::{
    AnthropicOracle, Catalog, Fetcher, JobQueue, MockOracle, Services, Settings, Store, TextOracle,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[clap(name = "news-aggregator", about = "Collect, annotate and serve categorized news feeds")]
struct Cli {
    #[clap(long, env = "DATABASE_URL", default_value = "sqlite://data/news.db")]
    database_url: String,

    #[clap(long, env = "ANTHROPIC_API_KEY", default_value = "", hide_env_values = true)]
    anthropic_api_key: String,

    #[clap(long, env = "ORACLE_MODEL", default_value = DEFAULT_MODEL)]
    oracle_model: String,

    /// Articles featured per category each day
    #[clap(long, env = "ARTICLES_PER_CATEGORY", default_value = "5")]
    articles_per_category: usize,

    #[clap(long, env = "FETCH_SCHEDULE_HOURS", default_value = "24")]
    fetch_schedule_hours: u64,

    #[clap(long, env = "NEWSLETTER_FEED_URL", default_value = DEFAULT_NEWSLETTER_FEED)]
    newsletter_feed_url: String,

    /// JSON file replacing the built-in source catalog
    #[clap(long, env = "SOURCES_FILE")]
    sources_file: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[clap(long)]
    log_json: bool,

    /// Answer every prompt with a canned reply instead of calling the API
    #[clap(long)]
    mock_oracle: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the REST API together with the job worker
    Serve {
        #[clap(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
        bind: String,

        /// Also enqueue collect and newsletter jobs every FETCH_SCHEDULE_HOURS
        #[clap(long)]
        schedule: bool,
    },
    /// Collect, annotate and feature once, then print the fetch log
    Collect,
    /// Fetch and summarize the latest newsletter
    Newsletter,
    /// Feature today's top articles
    Select,
    /// Sync the source catalog and list sources
    Sources,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            database_url: self.database_url.clone(),
            anthropic_api_key: self.anthropic_api_key.clone(),
            oracle_model: self.oracle_model.clone(),
            articles_per_category: self.articles_per_category,
            fetch_schedule_hours: self.fetch_schedule_hours,
            newsletter_feed_url: self.newsletter_feed_url.clone(),
            ..Settings::default()
        }
    }

    fn catalog(&self) -> Result<Catalog> {
        match &self.sources_file {
            Some(path) => Catalog::from_json_file(path)
                .with_context(|| format!("reading source catalog {}", path.display())),
            None => Ok(Catalog::default()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    configure_logging(cli.log_json);

    let mut settings = cli.settings();
    let catalog = cli.catalog()?;

    let store = Store::connect(&settings.database_url)
        .await
        .with_context(|| format!("opening database {}", settings.database_url))?;
    let fetcher = Arc::new(Fetcher::new(settings.fetch.clone())?);
    let oracle: Arc<dyn TextOracle> = if cli.mock_oracle {
        Arc::new(MockOracle::default())
    } else {
        Arc::new(AnthropicOracle::new(
            settings.anthropic_api_key.clone(),
            settings.oracle_model.clone(),
        )?)
    };
    info!("Using oracle {}", oracle.model_name());

    if let Command::Serve { bind, .. } = &cli.command {
        settings.bind_addr = bind.clone();
    }
    let services = Arc::new(Services::new(store, settings, catalog, fetcher, oracle));

    match cli.command {
        Command::Serve { schedule, .. } => serve(services, schedule).await?,
        Command::Collect => {
            let log = services.store.create_fetch_log().await?;
            let log = services.run_collect(log.id).await?;
            println!("{}", serde_json::to_string_pretty(&log)?);
        }
        Command::Newsletter => match services.run_newsletter().await? {
            Some(newsletter) => {
                println!("{}\n{}\n", newsletter.title, newsletter.url);
                println!("{}", newsletter.executive_summary.unwrap_or_default());
            }
            None => println!("No newsletter available"),
        },
        Command::Select => {
            let selections = services
                .selector
                .select_top_articles_for_today(services.settings.articles_per_category)
                .await?;
            for selection in selections {
                println!("{} ({})", selection.category, selection.articles.len());
                for article in selection.articles {
                    println!(
                        "  {:.2}  {}",
                        article.relevance_score.unwrap_or_default(),
                        article.title
                    );
                }
            }
        }
        Command::Sources => {
            services.collector.ensure_sources_exist().await?;
            for source in services.store.list_sources(None, false).await? {
                let state = if source.active { "active" } else { "inactive" };
                println!("{:<8} {:<8} {:<28} {}", source.category, state, source.name, source.feed_url);
            }
        }
    }

    Ok(())
}

async fn serve(services: Arc<Services>, schedule: bool) -> Result<()> {
    let (queue, _worker) = JobQueue::start(services.clone());

    if schedule {
        let hours = services.settings.fetch_schedule_hours;
        if hours == 0 {
            bail!("FETCH_SCHEDULE_HOURS must be at least 1 when scheduling");
        }
        info!("Scheduling collect and newsletter jobs every {}h", hours);
        queue.spawn_scheduler(Duration::from_secs(hours * 3600));
    }

    let bind_addr = services.settings.bind_addr.clone();
    api::serve(AppState { services, queue }, &bind_addr).await?;
    Ok(())
}
