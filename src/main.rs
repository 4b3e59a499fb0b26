use cardpress::ai::{HttpExtractor, OpenAiCompat};
use cardpress::{
    Config, CrawlOrchestrator, CrawlScheduler, FeedSource, GenerationPipeline, HttpFeedReader,
    MemoryStore, Source, SourceStatus, SqliteStore, StorageBackend, Store,
};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "cardpress", about = "Feed ingestion and card generation service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler over every active source until interrupted.
    Serve,
    /// Crawl one source immediately and print the outcome.
    Crawl {
        #[arg(long)]
        source_id: Uuid,
    },
    /// Register a new source after validating its feed.
    AddSource {
        #[arg(long)]
        name: String,
        #[arg(long)]
        site_url: String,
        #[arg(long)]
        feed_url: String,
        /// Crawl interval in minutes.
        #[arg(long, default_value_t = 30)]
        interval: u32,
        /// Activate immediately instead of registering inactive.
        #[arg(long)]
        activate: bool,
    },
    /// Generate an artifact from a page URL.
    GenerateUrl {
        #[arg(long)]
        url: String,
    },
    /// Generate an artifact from pasted text.
    GenerateText {
        #[arg(long)]
        title: String,
        #[arg(long)]
        text: String,
    },
    /// List registered sources.
    Sources,
    /// Check a feed URL without registering anything.
    Validate {
        #[arg(long)]
        feed_url: String,
    },
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    Ok(match config.storage {
        StorageBackend::Memory => {
            warn!("Using in-memory store, data will not survive a restart");
            Arc::new(MemoryStore::new())
        }
        StorageBackend::Sqlite => Arc::new(SqliteStore::connect(&config.database_url).await?),
    })
}

struct Services {
    store: Arc<dyn Store>,
    reader: Arc<HttpFeedReader>,
    pipeline: Arc<GenerationPipeline>,
    orchestrator: Arc<CrawlOrchestrator>,
}

async fn build_services(config: &Config) -> anyhow::Result<Services> {
    let store = build_store(config).await?;
    let reader = Arc::new(HttpFeedReader::new(config.fetch.clone()));
    let extractor = Arc::new(HttpExtractor::new(&config.fetch));
    let ai = Arc::new(OpenAiCompat::new(config.ai.clone()));

    let pipeline = Arc::new(GenerationPipeline::new(
        Arc::clone(&store),
        extractor.clone(),
        ai.clone(),
        ai.clone(),
        config.ai.model.clone(),
    ));
    let orchestrator = Arc::new(CrawlOrchestrator::new(
        Arc::clone(&store),
        reader.clone(),
        extractor,
        ai,
        Arc::clone(&pipeline),
        config.generation_cap,
    ));
    Ok(Services {
        store,
        reader,
        pipeline,
        orchestrator,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Command::Serve => {
            let services = build_services(&config).await?;
            let scheduler = CrawlScheduler::new(Arc::clone(&services.orchestrator));

            let sources = services.store.list_sources().await?;
            let mut scheduled = 0usize;
            for source in &sources {
                if source.status == SourceStatus::Active {
                    scheduler.add_job(source.id, source.crawl_interval_minutes).await;
                    scheduled += 1;
                }
            }
            info!(scheduled, total = sources.len(), "Scheduler running, press Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;
            scheduler.shutdown().await;
        }
        Command::Crawl { source_id } => {
            let services = build_services(&config).await?;
            let outcome = services.orchestrator.run_crawl(source_id).await?;
            info!(
                status = ?outcome.status,
                found = outcome.items_found,
                new = outcome.new_items,
                artifacts = outcome.artifacts_created,
                duration = outcome.duration_seconds,
                "Crawl finished"
            );
            if let Some(error) = outcome.error {
                error!(%error, "Crawl reported a failure");
            }
        }
        Command::AddSource {
            name,
            site_url,
            feed_url,
            interval,
            activate,
        } => {
            let services = build_services(&config).await?;
            let validation = services.reader.validate(&feed_url).await?;
            if !validation.valid {
                error!(
                    %feed_url,
                    error = validation.error.as_deref().unwrap_or("unknown"),
                    "Feed failed validation, source not registered"
                );
                return Ok(());
            }

            let mut source = Source::new(name, site_url, feed_url, interval);
            if activate {
                source.status = SourceStatus::Active;
            }
            services.store.create_source(&source).await?;
            info!(
                id = %source.id,
                name = %source.name,
                entries = validation.entry_count,
                status = ?source.status,
                "Source registered"
            );
        }
        Command::GenerateUrl { url } => {
            let services = build_services(&config).await?;
            let artifact_id = services.pipeline.generate_from_url(&url).await?;
            if let Some(artifact) = services.store.get_artifact(artifact_id).await? {
                info!(id = %artifact_id, status = ?artifact.status, title = %artifact.title, "Artifact generated");
            }
        }
        Command::GenerateText { title, text } => {
            let services = build_services(&config).await?;
            let artifact_id = services.pipeline.generate_from_text(&title, &text).await?;
            if let Some(artifact) = services.store.get_artifact(artifact_id).await? {
                info!(id = %artifact_id, status = ?artifact.status, "Artifact generated");
            }
        }
        Command::Sources => {
            let services = build_services(&config).await?;
            for source in services.store.list_sources().await? {
                info!(
                    id = %source.id,
                    name = %source.name,
                    status = ?source.status,
                    interval = source.crawl_interval_minutes,
                    crawls = source.total_crawls,
                    errors = source.error_count,
                    last = ?source.last_crawled_at,
                    "source"
                );
            }
        }
        Command::Validate { feed_url } => {
            let services = build_services(&config).await?;
            let validation = services.reader.validate(&feed_url).await?;
            if validation.valid {
                info!(
                    title = validation.title.as_deref().unwrap_or(""),
                    entries = validation.entry_count,
                    "Feed is valid"
                );
            } else {
                error!(
                    error = validation.error.as_deref().unwrap_or("unknown"),
                    "Feed is invalid"
                );
            }
        }
    }
    Ok(())
}
