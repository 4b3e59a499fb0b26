use crate::types::{
    Artifact, ArtifactSourceType, ArtifactStatus, ContentItem, CrawlRun, Result, Section, Source,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub source_id: Option<Uuid>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// `"YYYY-MM"` bucket on the publish timestamp.
    pub year_month: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ArtifactFilter {
    pub source_type: Option<ArtifactSourceType>,
    pub source_id: Option<Uuid>,
    pub status: Option<ArtifactStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Persistence contract the core relies on. Per-document updates are atomic;
/// no cross-entity transactions are assumed.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_source(&self, source: &Source) -> Result<()>;
    async fn get_source(&self, id: Uuid) -> Result<Option<Source>>;
    async fn update_source(&self, source: &Source) -> Result<()>;
    async fn delete_source(&self, id: Uuid) -> Result<()>;
    async fn list_sources(&self) -> Result<Vec<Source>>;

    /// Insert the item if its URL hash is unseen, otherwise apply enrichment
    /// updates to the stored copy. Returns true only for a fresh insert.
    async fn upsert_item(&self, item: &ContentItem) -> Result<bool>;
    async fn get_item(&self, id: &str) -> Result<Option<ContentItem>>;
    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<ContentItem>>;
    /// Mark the item as having produced an artifact.
    async fn link_artifact(&self, item_id: &str, artifact_id: Uuid) -> Result<()>;

    async fn create_artifact(&self, artifact: &Artifact) -> Result<()>;
    async fn get_artifact(&self, id: Uuid) -> Result<Option<Artifact>>;
    async fn update_artifact(&self, artifact: &Artifact) -> Result<()>;
    async fn list_artifacts(&self, filter: &ArtifactFilter) -> Result<Vec<Artifact>>;
    async fn replace_sections(&self, artifact_id: Uuid, sections: &[Section]) -> Result<()>;
    async fn get_sections(&self, artifact_id: Uuid) -> Result<Vec<Section>>;

    async fn create_run(&self, run: &CrawlRun) -> Result<()>;
    async fn update_run(&self, run: &CrawlRun) -> Result<()>;
    async fn list_runs(&self, source_id: Option<Uuid>, limit: usize) -> Result<Vec<CrawlRun>>;
}

fn item_matches(item: &ContentItem, filter: &ItemFilter) -> bool {
    if let Some(sid) = filter.source_id {
        if item.source_id != sid {
            return false;
        }
    }
    if let Some(start) = filter.start_date {
        if item.published_at < start {
            return false;
        }
    }
    if let Some(end) = filter.end_date {
        if item.published_at > end {
            return false;
        }
    }
    if let Some(ym) = &filter.year_month {
        if item.published_at.format("%Y-%m").to_string() != *ym {
            return false;
        }
    }
    true
}

fn artifact_matches(artifact: &Artifact, filter: &ArtifactFilter) -> bool {
    if let Some(st) = filter.source_type {
        if artifact.source_type != st {
            return false;
        }
    }
    if let Some(sid) = filter.source_id {
        if artifact.source_id != Some(sid) {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if artifact.status != status {
            return false;
        }
    }
    let reference = artifact.published_at.unwrap_or(artifact.created_at);
    if let Some(start) = filter.start_date {
        if reference < start {
            return false;
        }
    }
    if let Some(end) = filter.end_date {
        if reference > end {
            return false;
        }
    }
    true
}

/// In-process store. Data does not survive a restart; intended for tests
/// and development.
#[derive(Default)]
pub struct MemoryStore {
    sources: RwLock<HashMap<Uuid, Source>>,
    items: RwLock<HashMap<String, ContentItem>>,
    artifacts: RwLock<HashMap<Uuid, Artifact>>,
    sections: RwLock<HashMap<Uuid, Vec<Section>>>,
    runs: RwLock<HashMap<Uuid, CrawlRun>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_source(&self, source: &Source) -> Result<()> {
        self.sources.write().await.insert(source.id, source.clone());
        Ok(())
    }

    async fn get_source(&self, id: Uuid) -> Result<Option<Source>> {
        Ok(self.sources.read().await.get(&id).cloned())
    }

    async fn update_source(&self, source: &Source) -> Result<()> {
        self.sources.write().await.insert(source.id, source.clone());
        Ok(())
    }

    async fn delete_source(&self, id: Uuid) -> Result<()> {
        self.sources.write().await.remove(&id);
        Ok(())
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let mut sources: Vec<Source> = self.sources.read().await.values().cloned().collect();
        sources.sort_by_key(|s| s.created_at);
        Ok(sources)
    }

    async fn upsert_item(&self, item: &ContentItem) -> Result<bool> {
        let mut items = self.items.write().await;
        match items.get_mut(&item.id) {
            Some(existing) => {
                // Enrichment only: identity, first-crawl time, and any
                // artifact link are preserved.
                existing.title = item.title.clone();
                existing.title_original = item.title_original.clone();
                existing.content = item.content.clone();
                existing.summary = item.summary.clone();
                existing.keywords = item.keywords.clone();
                existing.author = item.author.clone();
                Ok(false)
            }
            None => {
                items.insert(item.id.clone(), item.clone());
                Ok(true)
            }
        }
    }

    async fn get_item(&self, id: &str) -> Result<Option<ContentItem>> {
        Ok(self.items.read().await.get(id).cloned())
    }

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<ContentItem>> {
        let items = self.items.read().await;
        let mut out: Vec<ContentItem> = items
            .values()
            .filter(|i| item_matches(i, filter))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn link_artifact(&self, item_id: &str, artifact_id: Uuid) -> Result<()> {
        if let Some(item) = self.items.write().await.get_mut(item_id) {
            item.artifact_id = Some(artifact_id);
            item.has_artifact = true;
        }
        Ok(())
    }

    async fn create_artifact(&self, artifact: &Artifact) -> Result<()> {
        self.artifacts
            .write()
            .await
            .insert(artifact.id, artifact.clone());
        Ok(())
    }

    async fn get_artifact(&self, id: Uuid) -> Result<Option<Artifact>> {
        Ok(self.artifacts.read().await.get(&id).cloned())
    }

    async fn update_artifact(&self, artifact: &Artifact) -> Result<()> {
        self.artifacts
            .write()
            .await
            .insert(artifact.id, artifact.clone());
        Ok(())
    }

    async fn list_artifacts(&self, filter: &ArtifactFilter) -> Result<Vec<Artifact>> {
        let artifacts = self.artifacts.read().await;
        let mut out: Vec<Artifact> = artifacts
            .values()
            .filter(|a| artifact_matches(a, filter))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            let ka = a.published_at.unwrap_or(a.created_at);
            let kb = b.published_at.unwrap_or(b.created_at);
            kb.cmp(&ka)
        });
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn replace_sections(&self, artifact_id: Uuid, sections: &[Section]) -> Result<()> {
        self.sections
            .write()
            .await
            .insert(artifact_id, sections.to_vec());
        Ok(())
    }

    async fn get_sections(&self, artifact_id: Uuid) -> Result<Vec<Section>> {
        Ok(self
            .sections
            .read()
            .await
            .get(&artifact_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_run(&self, run: &CrawlRun) -> Result<()> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn update_run(&self, run: &CrawlRun) -> Result<()> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn list_runs(&self, source_id: Option<Uuid>, limit: usize) -> Result<Vec<CrawlRun>> {
        let runs = self.runs.read().await;
        let mut out: Vec<CrawlRun> = runs
            .values()
            .filter(|r| source_id.map_or(true, |sid| r.source_id == sid))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out.truncate(limit);
        Ok(out)
    }
}

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sources (
        id TEXT PRIMARY KEY,
        body TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS content_items (
        id TEXT PRIMARY KEY,
        source_id TEXT NOT NULL,
        published_at TEXT NOT NULL,
        body TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS artifacts (
        id TEXT PRIMARY KEY,
        source_id TEXT,
        sort_key TEXT NOT NULL,
        body TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sections (
        artifact_id TEXT PRIMARY KEY,
        body TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS crawl_runs (
        id TEXT PRIMARY KEY,
        source_id TEXT NOT NULL,
        started_at TEXT NOT NULL,
        body TEXT NOT NULL
    )
    "#,
];

/// Document-style sqlite store: one row per entity with a serialized body,
/// plus the columns needed for lookups and ordering.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        // A pooled in-memory database is one database per connection; cap
        // the pool so every query sees the same one.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        for migration in MIGRATIONS {
            sqlx::query(migration).execute(&pool).await?;
        }
        info!("Connected to sqlite store");
        Ok(Self { pool })
    }

    fn decode<T: serde::de::DeserializeOwned>(row: &sqlx::sqlite::SqliteRow) -> Result<T> {
        let body: String = row.get("body");
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_source(&self, source: &Source) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO sources (id, body, created_at) VALUES (?, ?, ?)")
            .bind(source.id.to_string())
            .bind(serde_json::to_string(source)?)
            .bind(source.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_source(&self, id: Uuid) -> Result<Option<Source>> {
        let row = sqlx::query("SELECT body FROM sources WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::decode(&r)).transpose()
    }

    async fn update_source(&self, source: &Source) -> Result<()> {
        self.create_source(source).await
    }

    async fn delete_source(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query("SELECT body FROM sources ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::decode).collect()
    }

    async fn upsert_item(&self, item: &ContentItem) -> Result<bool> {
        let existing = self.get_item(&item.id).await?;
        match existing {
            Some(mut stored) => {
                stored.title = item.title.clone();
                stored.title_original = item.title_original.clone();
                stored.content = item.content.clone();
                stored.summary = item.summary.clone();
                stored.keywords = item.keywords.clone();
                stored.author = item.author.clone();
                sqlx::query("UPDATE content_items SET body = ? WHERE id = ?")
                    .bind(serde_json::to_string(&stored)?)
                    .bind(stored.id.as_str())
                    .execute(&self.pool)
                    .await?;
                Ok(false)
            }
            None => {
                sqlx::query(
                    "INSERT INTO content_items (id, source_id, published_at, body) VALUES (?, ?, ?, ?)",
                )
                .bind(item.id.as_str())
                .bind(item.source_id.to_string())
                .bind(item.published_at.to_rfc3339())
                .bind(serde_json::to_string(item)?)
                .execute(&self.pool)
                .await?;
                debug!("Stored new content item {}", item.id);
                Ok(true)
            }
        }
    }

    async fn get_item(&self, id: &str) -> Result<Option<ContentItem>> {
        let row = sqlx::query("SELECT body FROM content_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::decode(&r)).transpose()
    }

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<ContentItem>> {
        // Lookup columns narrow by source; remaining filters are applied to
        // the decoded bodies.
        let rows = match filter.source_id {
            Some(sid) => {
                sqlx::query(
                    "SELECT body FROM content_items WHERE source_id = ? ORDER BY published_at DESC",
                )
                .bind(sid.to_string())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT body FROM content_items ORDER BY published_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut out = Vec::new();
        for row in &rows {
            let item: ContentItem = Self::decode(row)?;
            if item_matches(&item, filter) {
                out.push(item);
            }
        }
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn link_artifact(&self, item_id: &str, artifact_id: Uuid) -> Result<()> {
        if let Some(mut item) = self.get_item(item_id).await? {
            item.artifact_id = Some(artifact_id);
            item.has_artifact = true;
            sqlx::query("UPDATE content_items SET body = ? WHERE id = ?")
                .bind(serde_json::to_string(&item)?)
                .bind(item_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn create_artifact(&self, artifact: &Artifact) -> Result<()> {
        let sort_key = artifact.published_at.unwrap_or(artifact.created_at);
        sqlx::query(
            "INSERT OR REPLACE INTO artifacts (id, source_id, sort_key, body) VALUES (?, ?, ?, ?)",
        )
        .bind(artifact.id.to_string())
        .bind(artifact.source_id.map(|s| s.to_string()))
        .bind(sort_key.to_rfc3339())
        .bind(serde_json::to_string(artifact)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_artifact(&self, id: Uuid) -> Result<Option<Artifact>> {
        let row = sqlx::query("SELECT body FROM artifacts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::decode(&r)).transpose()
    }

    async fn update_artifact(&self, artifact: &Artifact) -> Result<()> {
        self.create_artifact(artifact).await
    }

    async fn list_artifacts(&self, filter: &ArtifactFilter) -> Result<Vec<Artifact>> {
        let rows = sqlx::query("SELECT body FROM artifacts ORDER BY sort_key DESC")
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::new();
        for row in &rows {
            let artifact: Artifact = Self::decode(row)?;
            if artifact_matches(&artifact, filter) {
                out.push(artifact);
            }
        }
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn replace_sections(&self, artifact_id: Uuid, sections: &[Section]) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO sections (artifact_id, body) VALUES (?, ?)")
            .bind(artifact_id.to_string())
            .bind(serde_json::to_string(sections)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_sections(&self, artifact_id: Uuid) -> Result<Vec<Section>> {
        let row = sqlx::query("SELECT body FROM sections WHERE artifact_id = ?")
            .bind(artifact_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Self::decode(&r),
            None => Ok(Vec::new()),
        }
    }

    async fn create_run(&self, run: &CrawlRun) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO crawl_runs (id, source_id, started_at, body) VALUES (?, ?, ?, ?)",
        )
        .bind(run.id.to_string())
        .bind(run.source_id.to_string())
        .bind(run.started_at.to_rfc3339())
        .bind(serde_json::to_string(run)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_run(&self, run: &CrawlRun) -> Result<()> {
        self.create_run(run).await
    }

    async fn list_runs(&self, source_id: Option<Uuid>, limit: usize) -> Result<Vec<CrawlRun>> {
        let rows = match source_id {
            Some(sid) => {
                sqlx::query(
                    "SELECT body FROM crawl_runs WHERE source_id = ? ORDER BY started_at DESC LIMIT ?",
                )
                .bind(sid.to_string())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT body FROM crawl_runs ORDER BY started_at DESC LIMIT ?")
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(Self::decode).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::url_hash;

    fn item(source_id: Uuid, url: &str) -> ContentItem {
        ContentItem {
            id: url_hash(url),
            source_id,
            source_name: "Test".into(),
            title: "title".into(),
            title_original: "title".into(),
            url: url.to_string(),
            content: "content".into(),
            summary: "summary".into(),
            keywords: vec![],
            author: None,
            published_at: Utc::now(),
            crawled_at: Utc::now(),
            artifact_id: None,
            has_artifact: false,
        }
    }

    #[tokio::test]
    async fn memory_upsert_is_idempotent_and_preserves_link() {
        let store = MemoryStore::new();
        let sid = Uuid::new_v4();
        let first = item(sid, "https://example.com/a");

        assert!(store.upsert_item(&first).await.unwrap());
        let artifact_id = Uuid::new_v4();
        store.link_artifact(&first.id, artifact_id).await.unwrap();

        let mut enriched = first.clone();
        enriched.summary = "better summary".into();
        assert!(!store.upsert_item(&enriched).await.unwrap());

        let stored = store.get_item(&first.id).await.unwrap().unwrap();
        assert_eq!(stored.summary, "better summary");
        assert_eq!(stored.artifact_id, Some(artifact_id));
        assert!(stored.has_artifact);
    }

    #[tokio::test]
    async fn year_month_filter_buckets_by_publish_time() {
        let store = MemoryStore::new();
        let sid = Uuid::new_v4();

        let mut july = item(sid, "https://example.com/july");
        july.published_at = "2026-07-15T12:00:00Z".parse().unwrap();
        let mut august = item(sid, "https://example.com/august");
        august.published_at = "2026-08-01T09:00:00Z".parse().unwrap();
        store.upsert_item(&july).await.unwrap();
        store.upsert_item(&august).await.unwrap();

        let filtered = store
            .list_items(&ItemFilter {
                year_month: Some("2026-07".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].url, "https://example.com/july");
    }

    #[tokio::test]
    async fn sqlite_file_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("cardpress.db").display());

        let store = SqliteStore::connect(&url).await.unwrap();
        let source = Source::new(
            "Persisted".into(),
            "https://p.example".into(),
            "https://p.example/feed".into(),
            15,
        );
        store.create_source(&source).await.unwrap();
        drop(store);

        let reopened = SqliteStore::connect(&url).await.unwrap();
        let loaded = reopened.get_source(source.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Persisted");
    }

    #[tokio::test]
    async fn sqlite_round_trip() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let source = Source::new(
            "Blog".into(),
            "https://blog.example".into(),
            "https://blog.example/feed".into(),
            30,
        );
        store.create_source(&source).await.unwrap();

        let loaded = store.get_source(source.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Blog");

        let it = item(source.id, "https://blog.example/post/1");
        assert!(store.upsert_item(&it).await.unwrap());
        assert!(!store.upsert_item(&it).await.unwrap());

        let listed = store
            .list_items(&ItemFilter {
                source_id: Some(source.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }
}
