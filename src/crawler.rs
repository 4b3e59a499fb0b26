use crate::ai::{Extractor, LanguageDetector, LanguageTag, ScriptRatioDetector, Summarizer};
use crate::pipeline::GenerationPipeline;
use crate::reader::FeedSource;
use crate::store::Store;
use crate::text::truncate_chars;
use crate::types::{
    url_hash, ContentItem, CrawlOutcome, CrawlRun, CrawlStatus, FeedItem, IngestError, Result,
    Source, SourceStatus,
};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Failures in a row before a source is flipped to `errored`.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;
/// Items processed into artifacts on a source's first-ever crawl.
const BOOTSTRAP_ITEM_CAP: usize = 3;
/// Content below this many chars triggers a best-effort page extraction.
const SHORT_CONTENT_CHARS: usize = 200;
/// Content at or above this many chars is summarized by the AI capability.
const ENRICH_SUMMARY_CHARS: usize = 100;
const FALLBACK_SUMMARY_CHARS: usize = 500;
const SAMPLE_TITLE_CAP: usize = 10;

/// Runs one crawl end to end: fetch, dedup, enrich, generate, record.
pub struct CrawlOrchestrator {
    store: Arc<dyn Store>,
    reader: Arc<dyn FeedSource>,
    extractor: Arc<dyn Extractor>,
    summarizer: Arc<dyn Summarizer>,
    pipeline: Arc<GenerationPipeline>,
    detector: Arc<dyn LanguageDetector>,
    generation_cap: usize,
}

impl CrawlOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        reader: Arc<dyn FeedSource>,
        extractor: Arc<dyn Extractor>,
        summarizer: Arc<dyn Summarizer>,
        pipeline: Arc<GenerationPipeline>,
        generation_cap: usize,
    ) -> Self {
        Self {
            store,
            reader,
            extractor,
            summarizer,
            pipeline,
            detector: Arc::new(ScriptRatioDetector),
            generation_cap,
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn LanguageDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub async fn run_crawl(&self, source_id: Uuid) -> Result<CrawlOutcome> {
        let mut source = self
            .store
            .get_source(source_id)
            .await?
            .ok_or(IngestError::SourceNotFound { id: source_id })?;

        info!(source = %source.name, "Starting crawl");
        let mut run = CrawlRun::begin(source.id, source.name.clone());
        self.store.create_run(&run).await?;

        let entries = match self.reader.read(&source.feed_url).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(source = %source.name, error = %e, "Feed fetch failed");
                return self.finalize_failure(&mut source, &mut run, e.to_string()).await;
            }
        };

        match self.crawl_body(&mut source, &mut run, entries).await {
            Ok(()) => {
                let completed = Utc::now();
                run.completed_at = Some(completed);
                run.duration_seconds =
                    Some((completed - run.started_at).num_milliseconds() as f64 / 1000.0);
                self.store.update_run(&run).await?;

                source.last_crawled_at = Some(completed);
                source.next_crawl_at =
                    Some(completed + ChronoDuration::minutes(source.crawl_interval_minutes as i64));
                source.total_crawls += 1;
                source.success_count += 1;
                source.total_items_found += run.new_items;
                source.consecutive_failures = 0;
                source.updated_at = completed;
                self.store.update_source(&source).await?;

                info!(
                    source = %source.name,
                    found = run.items_found,
                    new = run.new_items,
                    artifacts = run.artifacts_created,
                    "Crawl finished"
                );
                Ok(CrawlOutcome {
                    run_id: run.id,
                    status: run.status,
                    items_found: run.items_found,
                    new_items: run.new_items,
                    artifacts_created: run.artifacts_created,
                    duration_seconds: run.duration_seconds.unwrap_or(0.0),
                    error: None,
                })
            }
            Err(e) => {
                error!(source = %source.name, error = %e, "Crawl aborted");
                self.finalize_failure(&mut source, &mut run, e.to_string()).await
            }
        }
    }

    /// Steps between a successful feed fetch and run finalization. Errors
    /// here abort the whole run.
    async fn crawl_body(
        &self,
        source: &mut Source,
        run: &mut CrawlRun,
        entries: Vec<FeedItem>,
    ) -> Result<()> {
        run.items_found = entries.len() as u32;
        let crawled_at = Utc::now();

        let new_links = partition_new(&entries, source, crawled_at);
        let mut new_items = Vec::new();

        for entry in &entries {
            let item = self.enrich(entry, source, crawled_at).await;
            let is_new_link = new_links.contains(&entry.link);
            self.store.upsert_item(&item).await?;
            if is_new_link {
                new_items.push(item);
            }
        }

        run.new_items = new_items.len() as u32;
        run.sample_titles = new_items
            .iter()
            .take(SAMPLE_TITLE_CAP)
            .map(|i| i.title.clone())
            .collect();

        let batch = self
            .pipeline
            .generate_batch(&new_items, self.generation_cap)
            .await;
        run.artifacts_created = batch.success as u32;
        if batch.failed > 0 {
            warn!(failed = batch.failed, "Some pipeline calls produced no artifact");
        }
        // Pipeline failures are isolated per item; the crawl itself succeeded.
        run.status = CrawlStatus::Success;
        Ok(())
    }

    /// Per-item enrichment: page extraction for thin content, AI summary and
    /// keywords, title translation. Every step is best-effort; a failure
    /// degrades that item, never the crawl.
    async fn enrich(
        &self,
        entry: &FeedItem,
        source: &Source,
        crawled_at: chrono::DateTime<Utc>,
    ) -> ContentItem {
        let mut content = entry
            .content
            .clone()
            .or_else(|| entry.summary.clone())
            .unwrap_or_default();

        if content.chars().count() < SHORT_CONTENT_CHARS {
            match self.extractor.extract(&entry.link).await {
                Ok(page) if page.text.chars().count() > content.chars().count() => {
                    debug!(link = %entry.link, "Using extracted page text");
                    content = page.text;
                }
                Ok(_) => {}
                Err(e) => debug!(link = %entry.link, error = %e, "Extraction skipped"),
            }
        }

        let (summary, keywords) = if content.chars().count() >= ENRICH_SUMMARY_CHARS {
            match self
                .summarizer
                .summarize(
                    &content,
                    Some(FALLBACK_SUMMARY_CHARS),
                    Some("Write 8-12 sentences."),
                )
                .await
            {
                Ok(outcome) => (outcome.summary, outcome.keywords),
                Err(e) => {
                    warn!(link = %entry.link, error = %e, "Enrichment summary failed, using truncation");
                    (truncate_chars(&content, FALLBACK_SUMMARY_CHARS), Vec::new())
                }
            }
        } else {
            (truncate_chars(&content, FALLBACK_SUMMARY_CHARS), Vec::new())
        };

        let title = if self.detector.detect(&entry.title) == LanguageTag::Latin {
            match self.summarizer.translate_title(&entry.title).await {
                Ok(translated) => translated,
                Err(e) => {
                    warn!(link = %entry.link, error = %e, "Title translation failed, keeping original");
                    entry.title.clone()
                }
            }
        } else {
            entry.title.clone()
        };

        ContentItem {
            id: url_hash(&entry.link),
            source_id: source.id,
            source_name: source.name.clone(),
            title,
            title_original: entry.title.clone(),
            url: entry.link.clone(),
            content,
            summary,
            keywords,
            author: entry.author.clone(),
            published_at: entry.published_at.unwrap_or(crawled_at),
            crawled_at,
            artifact_id: None,
            has_artifact: false,
        }
    }

    async fn finalize_failure(
        &self,
        source: &mut Source,
        run: &mut CrawlRun,
        message: String,
    ) -> Result<CrawlOutcome> {
        let completed = Utc::now();
        run.status = CrawlStatus::Failed;
        run.error_message = Some(message.clone());
        run.completed_at = Some(completed);
        run.duration_seconds =
            Some((completed - run.started_at).num_milliseconds() as f64 / 1000.0);
        self.store.update_run(run).await?;

        source.total_crawls += 1;
        source.error_count += 1;
        source.consecutive_failures += 1;
        if source.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
            warn!(
                source = %source.name,
                failures = source.consecutive_failures,
                "Deactivating source after repeated failures"
            );
            source.status = SourceStatus::Errored;
        }
        source.updated_at = completed;
        self.store.update_source(source).await?;

        Ok(CrawlOutcome {
            run_id: run.id,
            status: CrawlStatus::Failed,
            items_found: run.items_found,
            new_items: run.new_items,
            artifacts_created: run.artifacts_created,
            duration_seconds: run.duration_seconds.unwrap_or(0.0),
            error: Some(message),
        })
    }
}

/// Links of the entries considered new for this run. First-ever crawls
/// bootstrap with the few most recent entries instead of the whole backlog.
fn partition_new(
    entries: &[FeedItem],
    source: &Source,
    crawled_at: chrono::DateTime<Utc>,
) -> Vec<String> {
    match source.last_crawled_at {
        // Undated entries are never new here: stamping them with the run
        // time would re-admit them on every crawl.
        Some(last) => entries
            .iter()
            .filter(|e| e.published_at.is_some_and(|p| p > last))
            .map(|e| e.link.clone())
            .collect(),
        None => {
            let mut sorted: Vec<&FeedItem> = entries.iter().collect();
            sorted.sort_by(|a, b| {
                b.published_at
                    .unwrap_or(crawled_at)
                    .cmp(&a.published_at.unwrap_or(crawled_at))
            });
            sorted
                .into_iter()
                .take(BOOTSTRAP_ITEM_CAP)
                .map(|e| e.link.clone())
                .collect()
        }
    }
}
