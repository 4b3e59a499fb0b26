pub mod ai;
pub mod config;
pub mod crawler;
pub mod library;
pub mod pipeline;
pub mod reader;
pub mod scheduler;
pub mod store;
pub mod text;
pub mod types;

pub use types::*;
pub use config::{AiConfig, Config, FetchConfig, StorageBackend};
pub use reader::{FeedSource, HttpFeedReader};
pub use store::{ArtifactFilter, ItemFilter, MemoryStore, SqliteStore, Store};
pub use ai::{
    Extractor, LanguageDetector, LanguageTag, SectionDraft, SectionWriter, Summarizer,
    SummaryOutcome,
};
pub use crawler::CrawlOrchestrator;
pub use pipeline::GenerationPipeline;
pub use scheduler::{CrawlScheduler, JobInfo, TriggerResult};
pub use library::{FeedAggregator, FeedQuery};
