use crate::reader::FeedSource;
use crate::store::{ArtifactFilter, ItemFilter, Store};
use crate::types::{
    url_hash, Artifact, ArtifactSourceType, ContentItem, FeedEntrySource, FeedEntryType,
    FeedEntryView, FeedPage, Result, SourceStatus,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Entries are flagged new for this long after publish/crawl.
const NEW_WINDOW_HOURS: i64 = 24;
/// Live-feed refreshes are cached per source-filter key for this long.
const LIVE_CACHE_TTL: Duration = Duration::from_secs(3600);
/// Cap on live entries taken from any single source.
const LIVE_ENTRIES_PER_SOURCE: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct FeedQuery {
    pub source_id: Option<Uuid>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub year_month: Option<String>,
    pub keyword: Option<String>,
}

/// Merges generated artifacts and raw content items into one deduplicated,
/// paginated reading feed.
pub struct FeedAggregator {
    store: Arc<dyn Store>,
    reader: Arc<dyn FeedSource>,
    live_cache: RwLock<HashMap<String, (Vec<FeedEntryView>, Instant)>>,
}

impl FeedAggregator {
    pub fn new(store: Arc<dyn Store>, reader: Arc<dyn FeedSource>) -> Self {
        Self {
            store,
            reader,
            live_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Persisted view: artifacts first, then raw items, one entry per URL.
    pub async fn get_feed(
        &self,
        query: &FeedQuery,
        page: usize,
        page_size: usize,
    ) -> Result<FeedPage> {
        let now = Utc::now();

        let artifacts = self
            .store
            .list_artifacts(&ArtifactFilter {
                source_type: Some(ArtifactSourceType::Feed),
                source_id: query.source_id,
                start_date: query.start_date,
                end_date: query.end_date,
                ..Default::default()
            })
            .await?;
        let items = self
            .store
            .list_items(&ItemFilter {
                source_id: query.source_id,
                start_date: query.start_date,
                end_date: query.end_date,
                year_month: query.year_month.clone(),
                limit: None,
            })
            .await?;

        // Artifacts take precedence for any URL both sides know about.
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(artifacts.len() + items.len());
        for artifact in &artifacts {
            if seen.insert(url_hash(&artifact.source_url)) {
                entries.push(artifact_view(artifact, now));
            }
        }
        for item in &items {
            if seen.insert(item.id.clone()) {
                entries.push(item_view(item, now));
            }
        }

        if let Some(keyword) = &query.keyword {
            let needle = keyword.to_lowercase();
            entries.retain(|e| {
                e.title.to_lowercase().contains(&needle)
                    || e.summary.to_lowercase().contains(&needle)
                    || e.keywords.iter().any(|k| k.to_lowercase().contains(&needle))
            });
        }

        entries.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        let total = entries.len();
        let page = page.max(1);
        let page_size = page_size.max(1);
        let start = (page - 1) * page_size;
        let items = if start >= total {
            Vec::new()
        } else {
            entries[start..(start + page_size).min(total)].to_vec()
        };
        debug!(total, page, page_size, "Aggregated feed page");
        Ok(FeedPage {
            total,
            page,
            page_size,
            items,
        })
    }

    /// Live view straight from the feeds of active sources, cached per
    /// source filter. Source fetch failures degrade that source to empty.
    pub async fn live_entries(&self, source_id: Option<Uuid>) -> Result<Vec<FeedEntryView>> {
        let key = source_id.map_or_else(|| "all".to_string(), |id| id.to_string());
        if let Some((cached, fetched_at)) = self.live_cache.read().await.get(&key) {
            if fetched_at.elapsed() < LIVE_CACHE_TTL {
                debug!(key = %key, "Serving live feed from cache");
                return Ok(cached.clone());
            }
        }

        let sources = self.store.list_sources().await?;
        let now = Utc::now();
        let mut entries = Vec::new();
        for source in sources
            .iter()
            .filter(|s| s.status == SourceStatus::Active)
            .filter(|s| source_id.map_or(true, |id| s.id == id))
        {
            match self.reader.read(&source.feed_url).await {
                Ok(feed_items) => {
                    for fi in feed_items.into_iter().take(LIVE_ENTRIES_PER_SOURCE) {
                        entries.push(FeedEntryView {
                            id: url_hash(&fi.link),
                            entry_type: FeedEntryType::RawItem,
                            title: fi.title,
                            source: FeedEntrySource {
                                source_id: Some(source.id),
                                source_name: source.name.clone(),
                                site_url: source.site_url.clone(),
                            },
                            keywords: Vec::new(),
                            summary: fi.summary.unwrap_or_default(),
                            published_at: fi.published_at,
                            url: fi.link,
                            has_artifact: false,
                            artifact_id: None,
                            status: None,
                            is_new: is_new(fi.published_at.unwrap_or(now), now),
                        });
                    }
                }
                Err(e) => warn!(source = %source.name, error = %e, "Live feed fetch failed"),
            }
        }
        entries.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        self.live_cache
            .write()
            .await
            .insert(key, (entries.clone(), Instant::now()));
        Ok(entries)
    }
}

fn is_new(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - timestamp < ChronoDuration::hours(NEW_WINDOW_HOURS)
}

fn artifact_view(artifact: &Artifact, now: DateTime<Utc>) -> FeedEntryView {
    FeedEntryView {
        id: artifact.id.to_string(),
        entry_type: FeedEntryType::Artifact,
        title: artifact.title.clone(),
        source: FeedEntrySource {
            source_id: artifact.source_id,
            source_name: artifact.source_name.clone().unwrap_or_default(),
            site_url: String::new(),
        },
        keywords: artifact.keywords.clone(),
        summary: artifact.summary.clone().unwrap_or_default(),
        published_at: Some(artifact.published_at.unwrap_or(artifact.created_at)),
        url: artifact.source_url.clone(),
        has_artifact: true,
        artifact_id: Some(artifact.id),
        status: Some(artifact.status),
        is_new: is_new(artifact.published_at.unwrap_or(artifact.created_at), now),
    }
}

fn item_view(item: &ContentItem, now: DateTime<Utc>) -> FeedEntryView {
    FeedEntryView {
        id: item.id.clone(),
        entry_type: FeedEntryType::RawItem,
        title: item.title.clone(),
        source: FeedEntrySource {
            source_id: Some(item.source_id),
            source_name: item.source_name.clone(),
            site_url: String::new(),
        },
        keywords: item.keywords.clone(),
        summary: item.summary.clone(),
        published_at: Some(item.published_at),
        url: item.url.clone(),
        has_artifact: item.has_artifact,
        artifact_id: item.artifact_id,
        status: None,
        is_new: is_new(item.published_at, now),
    }
}
