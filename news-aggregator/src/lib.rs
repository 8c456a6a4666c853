pub mod annotator;
pub mod api;
pub mod collector;
pub mod config;
pub mod fetcher;
pub mod llm_adapter;
pub mod logging;
pub mod newsletter;
pub mod parser;
pub mod pipeline;
pub mod selector;
pub mod store;
pub mod traits;
pub mod types;

pub use annotator::{AnnotationOutcome, Annotator};
pub use collector::{CollectReport, FeedCollector};
pub use config::{Catalog, CategorySources, Settings};
pub use fetcher::Fetcher;
pub use llm_adapter::{AnthropicOracle, MockOracle};
pub use newsletter::NewsletterCollector;
pub use parser::FeedParser;
pub use pipeline::{Job, JobQueue, Services};
pub use selector::{CategorySelection, FeaturingSelector};
pub use store::{ArticleFilter, Store};
pub use traits::{PageFetcher, TextOracle};
pub use types::*;
