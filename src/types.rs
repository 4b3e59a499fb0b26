use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Stable identity of a content item: lowercase hex SHA-256 of its canonical URL.
pub fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Active,
    Inactive,
    Errored,
}

/// A registered feed being monitored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub site_url: String,
    pub feed_url: String,
    pub crawl_interval_minutes: u32,
    pub status: SourceStatus,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub next_crawl_at: Option<DateTime<Utc>>,
    pub total_crawls: u32,
    pub success_count: u32,
    pub error_count: u32,
    /// Failures since the last successful run; drives the 5-strikes auto-deactivation.
    pub consecutive_failures: u32,
    pub total_items_found: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    /// New sources start inactive and must be activated explicitly.
    pub fn new(name: String, site_url: String, feed_url: String, crawl_interval_minutes: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            site_url,
            feed_url,
            crawl_interval_minutes: crawl_interval_minutes.max(1),
            status: SourceStatus::Inactive,
            last_crawled_at: None,
            next_crawl_at: None,
            total_crawls: 0,
            success_count: 0,
            error_count: 0,
            consecutive_failures: 0,
            total_items_found: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One normalized entry as read from a syndication feed, in feed order.
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub id: String,
    pub title: String,
    pub link: String,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
}

/// Result of a side-effect-free feed validation at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedValidation {
    pub valid: bool,
    pub title: Option<String>,
    pub description: Option<String>,
    pub entry_count: usize,
    pub link: Option<String>,
    pub error: Option<String>,
}

/// One persisted feed entry, deduplicated by URL hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    /// `url_hash(url)`.
    pub id: String,
    pub source_id: Uuid,
    pub source_name: String,
    pub title: String,
    pub title_original: String,
    pub url: String,
    pub content: String,
    pub summary: String,
    pub keywords: Vec<String>,
    pub author: Option<String>,
    pub published_at: DateTime<Utc>,
    pub crawled_at: DateTime<Utc>,
    pub artifact_id: Option<Uuid>,
    pub has_artifact: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactSourceType {
    Url,
    Text,
    Feed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Draft,
    Summarized,
    Completed,
}

/// A generated multi-section work product derived from a content item or
/// manual input. Sections are stored alongside, keyed by artifact id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub title: String,
    pub source_type: ArtifactSourceType,
    pub source_id: Option<Uuid>,
    pub source_name: Option<String>,
    pub source_url: String,
    pub source_text: String,
    pub summary: Option<String>,
    pub keywords: Vec<String>,
    pub recommended_sections: Option<usize>,
    pub status: ArtifactStatus,
    pub version: u32,
    pub auto_generated: bool,
    pub model: String,
    pub opening_kind: SectionKind,
    pub last_error: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Artifact {
    /// Move to `next` only if it is a forward transition. A downstream-stage
    /// failure freezes the artifact in place instead of moving it backward.
    pub fn advance_to(&mut self, next: ArtifactStatus) -> bool {
        if next > self.status {
            self.status = next;
            self.updated_at = Utc::now();
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    Title,
    Content,
    Closing,
}

/// Display configuration carried by every section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionDesign {
    pub background_color: String,
    pub font_family: String,
    pub font_size: u32,
}

impl Default for SectionDesign {
    fn default() -> Self {
        Self {
            background_color: "#FFFFFF".to_string(),
            font_family: "Pretendard".to_string(),
            font_size: 16,
        }
    }
}

/// One ordered content block within an artifact. Positions are 0-based and
/// contiguous; reordering re-assigns all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub position: usize,
    pub kind: SectionKind,
    pub title: String,
    pub body: String,
    pub design: SectionDesign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlStatus {
    Running,
    Success,
    Partial,
    Failed,
}

/// One execution record of a scheduled or manual crawl. Created at run
/// start, finalized once at run end, immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlRun {
    pub id: Uuid,
    pub source_id: Uuid,
    pub source_name: String,
    pub status: CrawlStatus,
    pub items_found: u32,
    pub new_items: u32,
    pub artifacts_created: u32,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub sample_titles: Vec<String>,
}

impl CrawlRun {
    pub fn begin(source_id: Uuid, source_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id,
            source_name,
            status: CrawlStatus::Running,
            items_found: 0,
            new_items: 0,
            artifacts_created: 0,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: None,
            sample_titles: Vec::new(),
        }
    }
}

/// Caller-facing result of one crawl run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlOutcome {
    pub run_id: Uuid,
    pub status: CrawlStatus,
    pub items_found: u32,
    pub new_items: u32,
    pub artifacts_created: u32,
    pub duration_seconds: f64,
    pub error: Option<String>,
}

/// Result of a bounded batch of pipeline invocations.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub artifact_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedEntryType {
    Artifact,
    RawItem,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEntrySource {
    pub source_id: Option<Uuid>,
    pub source_name: String,
    pub site_url: String,
}

/// The merged, deduplicated view combining artifacts and raw content items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEntryView {
    pub id: String,
    pub entry_type: FeedEntryType,
    pub title: String,
    pub source: FeedEntrySource,
    pub keywords: Vec<String>,
    pub summary: String,
    pub published_at: Option<DateTime<Utc>>,
    pub url: String,
    pub has_artifact: bool,
    pub artifact_id: Option<Uuid>,
    pub status: Option<ArtifactStatus>,
    pub is_new: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedPage {
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub items: Vec<FeedEntryView>,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("source not found: {id}")]
    SourceNotFound { id: Uuid },

    #[error("artifact not found: {id}")]
    ArtifactNotFound { id: Uuid },

    #[error("feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("summarization failed: {0}")]
    SummarizationFailed(String),

    #[error("section generation failed: {0}")]
    SectionGenerationFailed(String),

    #[error("content too short: {chars} chars")]
    ContentTooShort { chars: usize },

    #[error("crawl already in flight for source {id}")]
    CrawlInFlight { id: Uuid },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;
