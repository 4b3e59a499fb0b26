#![allow(dead_code)]

use async_trait::async_trait;
use cardpress::ai::{MockExtractor, MockSectionWriter, MockSummarizer, SectionWriter};
use cardpress::{
    CrawlOrchestrator, Extractor, FeedItem, FeedSource, FeedValidation, GenerationPipeline,
    IngestError, MemoryStore, Result,
};
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Feed source serving a fixed set of entries, with a switch to simulate
/// an unreachable feed.
pub struct StaticFeed {
    entries: Mutex<Vec<FeedItem>>,
    failing: AtomicBool,
}

impl StaticFeed {
    pub fn new(entries: Vec<FeedItem>) -> Self {
        Self {
            entries: Mutex::new(entries),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_entries(&self, entries: Vec<FeedItem>) {
        *self.entries.lock().unwrap() = entries;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl FeedSource for StaticFeed {
    async fn read(&self, feed_url: &str) -> Result<Vec<FeedItem>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(IngestError::FeedUnavailable(format!(
                "{feed_url}: connection refused"
            )));
        }
        Ok(self.entries.lock().unwrap().clone())
    }

    async fn validate(&self, _feed_url: &str) -> Result<FeedValidation> {
        let entries = self.entries.lock().unwrap();
        Ok(FeedValidation {
            valid: !entries.is_empty(),
            title: Some("Static".to_string()),
            description: None,
            entry_count: entries.len(),
            link: None,
            error: if entries.is_empty() {
                Some("No entries found in feed".to_string())
            } else {
                None
            },
        })
    }
}

/// Entry published `minutes_ago` with a body long enough for generation.
pub fn entry(link: &str, title: &str, minutes_ago: i64) -> FeedItem {
    entry_with_content(link, title, minutes_ago, &"News sentence goes here. ".repeat(12))
}

/// Entry the feed never dated. Some feeds omit publish timestamps entirely.
pub fn undated_entry(link: &str, title: &str) -> FeedItem {
    let mut item = entry(link, title, 0);
    item.published_at = None;
    item
}

pub fn entry_with_content(link: &str, title: &str, minutes_ago: i64, content: &str) -> FeedItem {
    FeedItem {
        id: link.to_string(),
        title: title.to_string(),
        link: link.to_string(),
        summary: None,
        content: Some(content.to_string()),
        published_at: Some(Utc::now() - Duration::minutes(minutes_ago)),
        author: None,
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub feed: Arc<StaticFeed>,
    pub summarizer: Arc<MockSummarizer>,
    pub pipeline: Arc<GenerationPipeline>,
    pub orchestrator: Arc<CrawlOrchestrator>,
}

pub fn harness(entries: Vec<FeedItem>) -> Harness {
    harness_with(
        entries,
        Arc::new(MockSummarizer::new()),
        Arc::new(MockSectionWriter::new()),
    )
}

pub fn harness_with(
    entries: Vec<FeedItem>,
    summarizer: Arc<MockSummarizer>,
    writer: Arc<dyn SectionWriter>,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let feed = Arc::new(StaticFeed::new(entries));
    let extractor: Arc<dyn Extractor> = Arc::new(MockExtractor::new());

    let pipeline = Arc::new(GenerationPipeline::new(
        store.clone(),
        extractor.clone(),
        summarizer.clone(),
        writer,
        "mock-model".to_string(),
    ));
    let orchestrator = Arc::new(CrawlOrchestrator::new(
        store.clone(),
        feed.clone(),
        extractor,
        summarizer.clone(),
        pipeline.clone(),
        3,
    ));
    Harness {
        store,
        feed,
        summarizer,
        pipeline,
        orchestrator,
    }
}
