use crate::ai::{Extractor, SectionDraft, SectionWriter, Summarizer};
use crate::store::Store;
use crate::text::{recommended_section_count, take_chars, truncate_chars};
use crate::types::{
    Artifact, ArtifactSourceType, ArtifactStatus, BatchResult, ContentItem, IngestError, Result,
    Section, SectionDesign, SectionKind,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Below this the item is unusable and no artifact is created.
const MIN_USABLE_CHARS: usize = 10;
/// Below this the artifact is kept as a draft for manual completion.
const MIN_GENERATION_CHARS: usize = 200;
/// Source text handed to the section writer is capped at this many chars.
const SECTION_INPUT_CHARS: usize = 3000;

/// Multi-stage artifact generation: extract, summarize, write sections.
/// A stage failure freezes the artifact at the last completed stage rather
/// than discarding it.
pub struct GenerationPipeline {
    store: Arc<dyn Store>,
    extractor: Arc<dyn Extractor>,
    summarizer: Arc<dyn Summarizer>,
    writer: Arc<dyn SectionWriter>,
    model: String,
}

impl GenerationPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        extractor: Arc<dyn Extractor>,
        summarizer: Arc<dyn Summarizer>,
        writer: Arc<dyn SectionWriter>,
        model: String,
    ) -> Self {
        Self {
            store,
            extractor,
            summarizer,
            writer,
            model,
        }
    }

    /// Generate an artifact for one content item. Returns `None` when the
    /// acquired text is unusable; any created artifact id is a success even
    /// if a later stage froze it short of `completed`.
    pub async fn generate(&self, item: &ContentItem) -> Result<Option<Uuid>> {
        let text = self.acquire_text(item).await;
        if text.chars().count() < MIN_USABLE_CHARS {
            debug!(item_id = %item.id, "Skipping item with unusable text");
            return Ok(None);
        }

        let mut artifact = self.base_artifact(
            item.title.clone(),
            ArtifactSourceType::Feed,
            item.url.clone(),
            text.clone(),
        );
        artifact.source_id = Some(item.source_id);
        artifact.source_name = Some(item.source_name.clone());
        artifact.published_at = Some(item.published_at);

        self.store.create_artifact(&artifact).await?;
        self.store.link_artifact(&item.id, artifact.id).await?;
        self.run_stages(&mut artifact, &text).await?;
        Ok(Some(artifact.id))
    }

    /// Manual generation from a page URL. Extraction failure is surfaced to
    /// the caller here, unlike the crawl path where it degrades silently.
    pub async fn generate_from_url(&self, url: &str) -> Result<Uuid> {
        let page = self.extractor.extract(url).await?;
        let chars = page.text.chars().count();
        if chars < MIN_USABLE_CHARS {
            return Err(IngestError::ContentTooShort { chars });
        }

        let title = page.title.unwrap_or_else(|| url.to_string());
        let mut artifact =
            self.base_artifact(title, ArtifactSourceType::Url, url.to_string(), page.text.clone());
        artifact.auto_generated = false;
        self.store.create_artifact(&artifact).await?;
        self.run_stages(&mut artifact, &page.text).await?;
        Ok(artifact.id)
    }

    /// Manual generation from pasted text.
    pub async fn generate_from_text(&self, title: &str, text: &str) -> Result<Uuid> {
        let chars = text.chars().count();
        if chars < MIN_USABLE_CHARS {
            return Err(IngestError::ContentTooShort { chars });
        }

        let mut artifact = self.base_artifact(
            title.to_string(),
            ArtifactSourceType::Text,
            String::new(),
            text.to_string(),
        );
        artifact.auto_generated = false;
        self.store.create_artifact(&artifact).await?;
        self.run_stages(&mut artifact, text).await?;
        Ok(artifact.id)
    }

    fn base_artifact(
        &self,
        title: String,
        source_type: ArtifactSourceType,
        source_url: String,
        source_text: String,
    ) -> Artifact {
        Artifact {
            id: Uuid::new_v4(),
            title,
            source_type,
            source_id: None,
            source_name: None,
            source_url,
            source_text,
            summary: None,
            keywords: Vec::new(),
            recommended_sections: None,
            status: ArtifactStatus::Draft,
            version: 1,
            auto_generated: true,
            model: self.model.clone(),
            opening_kind: SectionKind::Title,
            last_error: None,
            published_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Summarize-then-sections over an already persisted draft. A stage
    /// failure leaves the artifact frozen where it stands with `last_error`
    /// set; only persistence errors bubble up.
    async fn run_stages(&self, artifact: &mut Artifact, text: &str) -> Result<()> {
        let chars = text.chars().count();
        if chars < MIN_GENERATION_CHARS {
            artifact.summary = Some(format!(
                "Source text was only {chars} characters, too short for automatic generation. \
                 Complete this draft manually."
            ));
            artifact.last_error = Some("content too short".to_string());
            artifact.updated_at = Utc::now();
            self.store.update_artifact(artifact).await?;
            info!(artifact_id = %artifact.id, chars, "Kept short-content artifact as draft");
            return Ok(());
        }

        match self.summarizer.summarize(text, Some(200), None).await {
            Ok(outcome) => {
                artifact.summary = Some(outcome.summary);
                artifact.keywords = outcome.keywords;
                artifact.recommended_sections = Some(recommended_section_count(chars));
                artifact.advance_to(ArtifactStatus::Summarized);
                self.store.update_artifact(artifact).await?;
            }
            Err(e) => {
                warn!(artifact_id = %artifact.id, error = %e, "Summarization failed, freezing draft");
                artifact.last_error = Some(e.to_string());
                artifact.updated_at = Utc::now();
                self.store.update_artifact(artifact).await?;
                return Ok(());
            }
        }

        let summary = artifact.summary.clone().unwrap_or_default();
        let count = artifact.recommended_sections.unwrap_or(3);
        match self
            .writer
            .generate_sections(&summary, take_chars(text, SECTION_INPUT_CHARS), count)
            .await
        {
            Ok(drafts) => {
                let drafts = if section_shape_is_valid(&drafts) {
                    drafts
                } else {
                    warn!(artifact_id = %artifact.id, "Section reply malformed, using fallback structure");
                    fallback_sections(&summary, count)
                };
                let sections = attach_positions(drafts);
                self.store.replace_sections(artifact.id, &sections).await?;
                artifact.advance_to(ArtifactStatus::Completed);
                artifact.last_error = None;
                self.store.update_artifact(artifact).await?;
                info!(artifact_id = %artifact.id, sections = sections.len(), "Artifact completed");
            }
            Err(e) => {
                warn!(artifact_id = %artifact.id, error = %e, "Section generation failed, freezing at summarized");
                artifact.last_error = Some(e.to_string());
                artifact.updated_at = Utc::now();
                self.store.update_artifact(artifact).await?;
            }
        }

        Ok(())
    }

    /// Run the pipeline over at most `max_count` items, isolating failures
    /// per item. A `None` return or an error counts as a failure; a frozen
    /// artifact still counts as a success.
    pub async fn generate_batch(&self, items: &[ContentItem], max_count: usize) -> BatchResult {
        let mut result = BatchResult::default();
        for item in items.iter().take(max_count) {
            result.total += 1;
            match self.generate(item).await {
                Ok(Some(artifact_id)) => {
                    result.success += 1;
                    result.artifact_ids.push(artifact_id);
                }
                Ok(None) => result.failed += 1,
                Err(e) => {
                    warn!(item_id = %item.id, error = %e, "Pipeline call failed");
                    result.failed += 1;
                }
            }
        }
        result
    }

    /// Extracted page text wins when substantial; otherwise the feed's own
    /// content, then summary.
    async fn acquire_text(&self, item: &ContentItem) -> String {
        match self.extractor.extract(&item.url).await {
            Ok(page) if page.text.chars().count() >= MIN_GENERATION_CHARS => page.text,
            Ok(_) | Err(_) => {
                if !item.content.trim().is_empty() {
                    item.content.clone()
                } else {
                    item.summary.clone()
                }
            }
        }
    }
}

fn section_shape_is_valid(drafts: &[SectionDraft]) -> bool {
    match (drafts.first(), drafts.last()) {
        (Some(first), Some(last)) => {
            first.kind == SectionKind::Title && last.kind == SectionKind::Closing
        }
        _ => false,
    }
}

fn attach_positions(drafts: Vec<SectionDraft>) -> Vec<Section> {
    drafts
        .into_iter()
        .enumerate()
        .map(|(position, draft)| Section {
            position,
            kind: draft.kind,
            title: draft.title,
            body: draft.body,
            design: SectionDesign::default(),
        })
        .collect()
}

/// Deterministic minimal section structure used when the writer's reply is
/// malformed: one title, `count-2` content sections, one closing.
pub fn fallback_sections(summary: &str, count: usize) -> Vec<SectionDraft> {
    let count = count.max(3);
    let mut drafts = vec![SectionDraft {
        kind: SectionKind::Title,
        title: truncate_chars(summary, 100),
        body: String::new(),
    }];
    for i in 0..count - 2 {
        drafts.push(SectionDraft {
            kind: SectionKind::Content,
            title: format!("내용 {}", i + 1),
            body: summary.to_string(),
        });
    }
    drafts.push(SectionDraft {
        kind: SectionKind::Closing,
        title: "마무리".to_string(),
        body: "읽어주셔서 감사합니다.".to_string(),
    });
    drafts
}
