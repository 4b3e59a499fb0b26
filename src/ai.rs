use crate::config::{AiConfig, FetchConfig};
use crate::text::{hangul_ratio, has_latin_run, strip_html_tags, take_chars};
use crate::types::{IngestError, Result, SectionKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Output of one summarization call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryOutcome {
    pub summary: String,
    pub keywords: Vec<String>,
}

/// A generated section before it gets positions and design attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionDraft {
    pub kind: SectionKind,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct ExtractedPage {
    pub title: Option<String>,
    pub text: String,
}

/// Produces summaries and keyword lists, and translates titles.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        text: &str,
        max_length: Option<usize>,
        extra_instructions: Option<&str>,
    ) -> Result<SummaryOutcome>;

    async fn translate_title(&self, title: &str) -> Result<String>;
}

/// Turns a summary plus the source text into an ordered list of section drafts.
#[async_trait]
pub trait SectionWriter: Send + Sync {
    async fn generate_sections(
        &self,
        summary: &str,
        text: &str,
        count: usize,
    ) -> Result<Vec<SectionDraft>>;
}

/// Fetches a page and reduces it to readable text.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<ExtractedPage>;
}

/// Coarse script-level language tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageTag {
    Korean,
    Latin,
    Unknown,
}

/// Decides which language a short text is in, for translation gating.
/// Deliberately a seam: the default is a crude character-ratio heuristic.
pub trait LanguageDetector: Send + Sync {
    fn detect(&self, text: &str) -> LanguageTag;
}

/// Character-ratio heuristic: mostly-hangul text is Korean; a run of three
/// or more latin letters marks a latin-script title.
pub struct ScriptRatioDetector;

impl LanguageDetector for ScriptRatioDetector {
    fn detect(&self, text: &str) -> LanguageTag {
        if hangul_ratio(text) > 0.3 {
            LanguageTag::Korean
        } else if has_latin_run(text, 3) {
            LanguageTag::Latin
        } else {
            LanguageTag::Unknown
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct SummaryPayload {
    summary: String,
    #[serde(default)]
    keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SectionPayload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

/// Models sometimes wrap JSON answers in a markdown code fence; strip it
/// before parsing.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

fn parse_section_kind(raw: &str) -> SectionKind {
    match raw {
        "title" | "cover" => SectionKind::Title,
        "closing" | "outro" => SectionKind::Closing,
        _ => SectionKind::Content,
    }
}

/// Adapter for any OpenAI-compatible chat completion endpoint.
pub struct OpenAiCompat {
    client: reqwest::Client,
    config: AiConfig,
}

impl OpenAiCompat {
    pub fn new(config: AiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");
        Self { client, config }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0.3,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(IngestError::General(format!(
                "chat completion returned {}: {}",
                status,
                take_chars(&detail, 200)
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| IngestError::General("chat completion had no choices".to_string()))?;
        debug!("Chat completion returned {} chars", content.chars().count());
        Ok(content)
    }
}

#[async_trait]
impl Summarizer for OpenAiCompat {
    async fn summarize(
        &self,
        text: &str,
        max_length: Option<usize>,
        extra_instructions: Option<&str>,
    ) -> Result<SummaryOutcome> {
        let max_length = max_length.unwrap_or(500);
        let mut system = format!(
            "You summarize articles. Reply with JSON: {{\"summary\": string (at most {} characters), \"keywords\": [up to 5 strings]}}.",
            max_length
        );
        if let Some(extra) = extra_instructions {
            system.push(' ');
            system.push_str(extra);
        }

        // Long inputs are truncated on our side; the model does not need
        // the full body to summarize.
        let raw = self
            .chat(&system, take_chars(text, 8000))
            .await
            .map_err(|e| IngestError::SummarizationFailed(e.to_string()))?;

        let payload: SummaryPayload = serde_json::from_str(strip_code_fence(&raw))
            .map_err(|e| IngestError::SummarizationFailed(format!("bad summary JSON: {e}")))?;
        Ok(SummaryOutcome {
            summary: payload.summary,
            keywords: payload.keywords,
        })
    }

    async fn translate_title(&self, title: &str) -> Result<String> {
        let raw = self
            .chat(
                "Translate the given article title to Korean. Reply with the translated title only, no quotes.",
                title,
            )
            .await
            .map_err(|e| IngestError::SummarizationFailed(e.to_string()))?;
        let translated = raw.trim().trim_matches('"').to_string();
        if translated.is_empty() {
            warn!("Title translation came back empty, keeping original");
            return Ok(title.to_string());
        }
        Ok(translated)
    }
}

#[async_trait]
impl SectionWriter for OpenAiCompat {
    async fn generate_sections(
        &self,
        summary: &str,
        text: &str,
        count: usize,
    ) -> Result<Vec<SectionDraft>> {
        let system = format!(
            "You write card-style section plans for articles. Reply with a JSON array of exactly {} objects: \
             {{\"type\": \"title\"|\"content\"|\"closing\", \"title\": string, \"content\": string}}. \
             The first object must be type \"title\" and the last type \"closing\".",
            count
        );
        let user = format!("Summary:\n{}\n\nSource text:\n{}", summary, take_chars(text, 6000));

        let raw = self
            .chat(&system, &user)
            .await
            .map_err(|e| IngestError::SectionGenerationFailed(e.to_string()))?;
        Ok(parse_section_reply(&raw))
    }
}

/// Decode a section-plan reply. A reply that is not valid JSON yields an
/// empty plan, which downstream replaces with the deterministic fallback
/// structure instead of failing the stage.
fn parse_section_reply(raw: &str) -> Vec<SectionDraft> {
    let payload: Vec<SectionPayload> = match serde_json::from_str(strip_code_fence(raw)) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Section reply was not valid JSON, using empty plan");
            return Vec::new();
        }
    };
    payload
        .into_iter()
        .map(|s| SectionDraft {
            kind: parse_section_kind(&s.kind),
            title: s.title,
            body: s.content,
        })
        .collect()
}

/// Plain HTTP extractor: fetch the page and strip it down to text.
pub struct HttpExtractor {
    client: reqwest::Client,
}

impl HttpExtractor {
    pub fn new(config: &FetchConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract(&self, url: &str) -> Result<ExtractedPage> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IngestError::ExtractionFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(IngestError::ExtractionFailed(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| IngestError::ExtractionFailed(e.to_string()))?;
        let title = html
            .find("<title>")
            .and_then(|start| {
                let rest = &html[start + 7..];
                rest.find("</title>").map(|end| rest[..end].trim().to_string())
            })
            .filter(|t| !t.is_empty());

        let text = strip_html_tags(&html);
        if text.trim().is_empty() {
            return Err(IngestError::ExtractionFailed(format!("{url} had no text")));
        }
        Ok(ExtractedPage { title, text })
    }
}

/// Mock summarizer for tests: echoes a truncated input back and can be
/// told to fail on matching inputs.
pub struct MockSummarizer {
    fail_when_contains: Option<String>,
    calls: AtomicUsize,
}

impl MockSummarizer {
    pub fn new() -> Self {
        Self {
            fail_when_contains: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_when_contains: Some(marker.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(
        &self,
        text: &str,
        max_length: Option<usize>,
        _extra_instructions: Option<&str>,
    ) -> Result<SummaryOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_when_contains {
            if text.contains(marker.as_str()) {
                return Err(IngestError::SummarizationFailed(format!(
                    "mock failure on '{marker}'"
                )));
            }
        }
        Ok(SummaryOutcome {
            summary: take_chars(text, max_length.unwrap_or(500)).to_string(),
            keywords: vec!["mock".to_string()],
        })
    }

    async fn translate_title(&self, title: &str) -> Result<String> {
        if let Some(marker) = &self.fail_when_contains {
            if title.contains(marker.as_str()) {
                return Err(IngestError::SummarizationFailed(format!(
                    "mock failure on '{marker}'"
                )));
            }
        }
        Ok(format!("[ko] {title}"))
    }
}

/// Mock section writer producing a well-formed plan, with knobs to fail or
/// to return a malformed shape.
pub struct MockSectionWriter {
    fail_when_contains: Option<String>,
    malformed: bool,
    empty: bool,
}

impl MockSectionWriter {
    pub fn new() -> Self {
        Self {
            fail_when_contains: None,
            malformed: false,
            empty: false,
        }
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_when_contains: Some(marker.to_string()),
            malformed: false,
            empty: false,
        }
    }

    /// Returns content-only drafts with no title or closing.
    pub fn malformed() -> Self {
        Self {
            fail_when_contains: None,
            malformed: true,
            empty: false,
        }
    }

    /// Returns an empty plan, as the live adapter does when the model's
    /// reply cannot be decoded.
    pub fn empty_reply() -> Self {
        Self {
            fail_when_contains: None,
            malformed: false,
            empty: true,
        }
    }
}

impl Default for MockSectionWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SectionWriter for MockSectionWriter {
    async fn generate_sections(
        &self,
        summary: &str,
        text: &str,
        count: usize,
    ) -> Result<Vec<SectionDraft>> {
        if let Some(marker) = &self.fail_when_contains {
            if summary.contains(marker.as_str()) || text.contains(marker.as_str()) {
                return Err(IngestError::SectionGenerationFailed(format!(
                    "mock failure on '{marker}'"
                )));
            }
        }

        if self.empty {
            return Ok(Vec::new());
        }

        if self.malformed {
            return Ok((0..count)
                .map(|i| SectionDraft {
                    kind: SectionKind::Content,
                    title: format!("Part {}", i + 1),
                    body: take_chars(summary, 120).to_string(),
                })
                .collect());
        }

        let mut drafts = vec![SectionDraft {
            kind: SectionKind::Title,
            title: take_chars(summary, 40).to_string(),
            body: String::new(),
        }];
        for i in 0..count.saturating_sub(2) {
            drafts.push(SectionDraft {
                kind: SectionKind::Content,
                title: format!("Point {}", i + 1),
                body: take_chars(text, 120).to_string(),
            });
        }
        drafts.push(SectionDraft {
            kind: SectionKind::Closing,
            title: "Wrap-up".to_string(),
            body: take_chars(summary, 80).to_string(),
        });
        Ok(drafts)
    }
}

/// Mock extractor serving canned page text per URL substring.
pub struct MockExtractor {
    pages: Vec<(String, String)>,
    fail_when_contains: Option<String>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self {
            pages: Vec::new(),
            fail_when_contains: None,
        }
    }

    pub fn with_page(mut self, url_fragment: &str, text: &str) -> Self {
        self.pages.push((url_fragment.to_string(), text.to_string()));
        self
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            pages: Vec::new(),
            fail_when_contains: Some(marker.to_string()),
        }
    }
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(&self, url: &str) -> Result<ExtractedPage> {
        if let Some(marker) = &self.fail_when_contains {
            if url.contains(marker.as_str()) {
                return Err(IngestError::ExtractionFailed(format!(
                    "mock failure on '{marker}'"
                )));
            }
        }
        for (fragment, text) in &self.pages {
            if url.contains(fragment.as_str()) {
                return Ok(ExtractedPage {
                    title: None,
                    text: text.clone(),
                });
            }
        }
        Err(IngestError::ExtractionFailed(format!("no mock page for {url}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_fence_is_stripped() {
        let fenced = "```json\n{\"summary\": \"s\", \"keywords\": []}\n```";
        let payload: SummaryPayload = serde_json::from_str(strip_code_fence(fenced)).unwrap();
        assert_eq!(payload.summary, "s");

        let bare = "{\"summary\": \"t\", \"keywords\": [\"k\"]}";
        let payload: SummaryPayload = serde_json::from_str(strip_code_fence(bare)).unwrap();
        assert_eq!(payload.keywords, vec!["k"]);
    }

    #[test]
    fn non_json_section_reply_yields_an_empty_plan() {
        let drafts = parse_section_reply("Sure! Here are the sections you asked for.");
        assert!(drafts.is_empty());

        let good = r#"[{"type": "title", "title": "T", "content": ""},
                       {"type": "closing", "title": "C", "content": "bye"}]"#;
        let drafts = parse_section_reply(good);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].kind, SectionKind::Title);
        assert_eq!(drafts[1].kind, SectionKind::Closing);
    }

    #[tokio::test]
    async fn mock_writer_produces_title_and_closing() {
        let writer = MockSectionWriter::new();
        let drafts = writer.generate_sections("summary", "text", 5).await.unwrap();
        assert_eq!(drafts.len(), 5);
        assert_eq!(drafts.first().unwrap().kind, SectionKind::Title);
        assert_eq!(drafts.last().unwrap().kind, SectionKind::Closing);
    }

    #[test]
    fn script_ratio_detector_tags_titles() {
        let detector = ScriptRatioDetector;
        assert_eq!(detector.detect("오늘의 뉴스 요약"), LanguageTag::Korean);
        assert_eq!(detector.detect("Breaking news today"), LanguageTag::Latin);
        // Short latin runs inside hangul do not flip the tag.
        assert_eq!(detector.detect("AI 분야 소식 정리"), LanguageTag::Korean);
    }

    #[tokio::test]
    async fn mock_summarizer_fails_on_marker() {
        let summarizer = MockSummarizer::failing_on("poison");
        assert!(summarizer.summarize("clean text", None, None).await.is_ok());
        assert!(summarizer
            .summarize("this has poison in it", None, None)
            .await
            .is_err());
    }
}
