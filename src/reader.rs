use crate::config::FetchConfig;
use crate::text::{strip_html_tags, truncate_chars};
use crate::types::{FeedItem, FeedValidation, IngestError, Result};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::exponential::ExponentialBackoff;
use chrono::Utc;
use feed_rs::parser;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Read access to one syndication feed. `read` is a pure function of the
/// feed URL; entries come back newest-first as published by the source, with
/// no re-sorting.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn read(&self, feed_url: &str) -> Result<Vec<FeedItem>>;

    /// One fetch+parse with no retries and no side effects, for source
    /// registration.
    async fn validate(&self, feed_url: &str) -> Result<FeedValidation>;
}

pub struct HttpFeedReader {
    client: Client,
    config: FetchConfig,
}

impl HttpFeedReader {
    pub fn new(config: FetchConfig) -> Self {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    async fn fetch_and_parse(&self, feed_url: &str) -> Result<feed_rs::model::Feed> {
        let response = self
            .client
            .get(feed_url)
            .send()
            .await
            .map_err(|e| IngestError::FeedUnavailable(format!("{}: {}", feed_url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::FeedUnavailable(format!(
                "{}: HTTP {}",
                feed_url, status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| IngestError::FeedUnavailable(format!("{}: {}", feed_url, e)))?;

        parser::parse(body.as_bytes())
            .map_err(|e| IngestError::FeedUnavailable(format!("{}: parse error: {}", feed_url, e)))
    }

    fn map_entry(entry: feed_rs::model::Entry) -> Option<FeedItem> {
        let link = entry.links.first()?.href.clone();
        let id = if entry.id.is_empty() {
            link.clone()
        } else {
            entry.id.clone()
        };

        let title = entry
            .title
            .map(|t| t.content)
            .unwrap_or_else(|| "Untitled".to_string());

        let summary = entry
            .summary
            .map(|s| truncate_chars(&strip_html_tags(&s.content), 500));

        let content = entry
            .content
            .and_then(|c| c.body)
            .map(|body| strip_html_tags(&body))
            .or_else(|| summary.clone());

        let published_at = entry
            .published
            .or(entry.updated)
            .map(|dt| dt.with_timezone(&Utc));

        let author = entry.authors.first().map(|a| a.name.clone());

        Some(FeedItem {
            id,
            title,
            link,
            summary,
            content,
            published_at,
            author,
        })
    }
}

#[async_trait]
impl FeedSource for HttpFeedReader {
    async fn read(&self, feed_url: &str) -> Result<Vec<FeedItem>> {
        debug!("Reading feed: {}", feed_url);

        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.initial_backoff_seconds),
            initial_interval: Duration::from_secs(self.config.initial_backoff_seconds),
            max_interval: Duration::from_secs(self.config.max_backoff_seconds),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut last_error = None;
        for attempt in 0..self.config.max_retries {
            match self.fetch_and_parse(feed_url).await {
                Ok(feed) => {
                    let items: Vec<FeedItem> =
                        feed.entries.into_iter().filter_map(Self::map_entry).collect();
                    info!("Read {} entries from {}", items.len(), feed_url);
                    return Ok(items);
                }
                Err(e) => {
                    warn!("Attempt {} failed for {}: {}", attempt + 1, feed_url, e);
                    last_error = Some(e);
                    if attempt + 1 < self.config.max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| IngestError::FeedUnavailable(format!("{}: no attempts made", feed_url))))
    }

    async fn validate(&self, feed_url: &str) -> Result<FeedValidation> {
        info!("Validating feed URL: {}", feed_url);

        let parsed = match url::Url::parse(feed_url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") && u.host().is_some() => u,
            _ => {
                return Ok(FeedValidation {
                    valid: false,
                    title: None,
                    description: None,
                    entry_count: 0,
                    link: None,
                    error: Some("Invalid URL format".to_string()),
                })
            }
        };

        match self.fetch_and_parse(parsed.as_str()).await {
            Ok(feed) => {
                if feed.entries.is_empty() {
                    return Ok(FeedValidation {
                        valid: false,
                        title: feed.title.map(|t| t.content),
                        description: feed.description.map(|d| d.content),
                        entry_count: 0,
                        link: None,
                        error: Some("No entries found in feed".to_string()),
                    });
                }
                Ok(FeedValidation {
                    valid: true,
                    title: feed.title.map(|t| t.content),
                    description: feed.description.map(|d| d.content),
                    entry_count: feed.entries.len(),
                    link: feed.links.first().map(|l| l.href.clone()),
                    error: None,
                })
            }
            Err(e) => Ok(FeedValidation {
                valid: false,
                title: None,
                description: None,
                entry_count: 0,
                link: None,
                error: Some(e.to_string()),
            }),
        }
    }
}
