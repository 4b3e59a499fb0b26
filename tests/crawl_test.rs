mod common;

use cardpress::ai::{MockSectionWriter, MockSummarizer};
use cardpress::{
    url_hash, ArtifactStatus, CrawlStatus, ItemFilter, SectionKind, Source, SourceStatus, Store,
};
use common::{entry, entry_with_content, harness, harness_with, init_tracing, undated_entry};
use std::sync::Arc;

async fn register_source(h: &common::Harness) -> Source {
    let mut source = Source::new(
        "Test Blog".to_string(),
        "https://blog.example".to_string(),
        "https://blog.example/feed".to_string(),
        30,
    );
    source.status = SourceStatus::Active;
    h.store.create_source(&source).await.unwrap();
    source
}

#[tokio::test]
async fn second_crawl_creates_no_duplicates_and_no_new_items() {
    init_tracing();
    let entries: Vec<_> = (0..5)
        .map(|i| entry(&format!("https://blog.example/p{i}"), &format!("Post {i}"), i * 10))
        .collect();
    let h = harness(entries);
    let source = register_source(&h).await;

    let first = h.orchestrator.run_crawl(source.id).await.unwrap();
    assert_eq!(first.items_found, 5);
    assert_eq!(first.new_items, 3);

    let second = h.orchestrator.run_crawl(source.id).await.unwrap();
    assert_eq!(second.status, CrawlStatus::Success);
    assert_eq!(second.new_items, 0);
    assert_eq!(second.artifacts_created, 0);

    let items = h.store.list_items(&ItemFilter::default()).await.unwrap();
    assert_eq!(items.len(), 5);
}

#[tokio::test]
async fn first_crawl_bootstraps_only_three_most_recent() {
    init_tracing();
    let entries: Vec<_> = (0..20)
        .map(|i| entry(&format!("https://blog.example/p{i}"), &format!("Post {i}"), i * 10))
        .collect();
    let h = harness(entries);
    let source = register_source(&h).await;

    let outcome = h.orchestrator.run_crawl(source.id).await.unwrap();
    assert_eq!(outcome.items_found, 20);
    assert_eq!(outcome.new_items, 3);
    assert_eq!(outcome.artifacts_created, 3);

    // Every fetched entry is still persisted, new or not.
    let items = h.store.list_items(&ItemFilter::default()).await.unwrap();
    assert_eq!(items.len(), 20);
}

#[tokio::test]
async fn batch_cap_limits_pipeline_invocations() {
    init_tracing();
    let h = harness(Vec::new());
    let source = register_source(&h).await;

    let items: Vec<_> = (0..10)
        .map(|i| {
            let link = format!("https://blog.example/b{i}");
            let fi = entry(&link, &format!("Batch {i}"), i);
            cardpress::ContentItem {
                id: url_hash(&link),
                source_id: source.id,
                source_name: source.name.clone(),
                title: fi.title.clone(),
                title_original: fi.title,
                url: link,
                content: fi.content.unwrap(),
                summary: String::new(),
                keywords: Vec::new(),
                author: None,
                published_at: fi.published_at.unwrap(),
                crawled_at: fi.published_at.unwrap(),
                artifact_id: None,
                has_artifact: false,
            }
        })
        .collect();
    for item in &items {
        h.store.upsert_item(item).await.unwrap();
    }

    let result = h.pipeline.generate_batch(&items, 3).await;
    assert_eq!(result.total, 3);
    assert_eq!(result.success, 3);
    assert_eq!(result.artifact_ids.len(), 3);
    assert_eq!(h.summarizer.call_count(), 3);
}

#[tokio::test]
async fn summarization_failure_freezes_one_item_without_aborting_the_rest() {
    init_tracing();
    let good = "News sentence goes here. ".repeat(12);
    let bad = format!("{} poison", "News sentence goes here. ".repeat(12));
    let entries = vec![
        entry_with_content("https://blog.example/a", "A", 3, &good),
        entry_with_content("https://blog.example/b", "B", 2, &bad),
        entry_with_content("https://blog.example/c", "C", 1, &good),
    ];
    let h = harness_with(
        entries,
        Arc::new(MockSummarizer::failing_on("poison")),
        Arc::new(MockSectionWriter::new()),
    );
    let source = register_source(&h).await;

    let outcome = h.orchestrator.run_crawl(source.id).await.unwrap();
    assert_eq!(outcome.new_items, 3);
    assert_eq!(outcome.artifacts_created, 3);
    assert_eq!(outcome.status, CrawlStatus::Success);

    for (url, expected) in [
        ("https://blog.example/a", ArtifactStatus::Completed),
        ("https://blog.example/b", ArtifactStatus::Draft),
        ("https://blog.example/c", ArtifactStatus::Completed),
    ] {
        let item = h.store.get_item(&url_hash(url)).await.unwrap().unwrap();
        let artifact = h
            .store
            .get_artifact(item.artifact_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(artifact.status, expected, "unexpected status for {url}");
        if expected == ArtifactStatus::Draft {
            assert!(artifact.last_error.is_some());
        } else {
            assert!(artifact.last_error.is_none());
        }
    }
}

#[tokio::test]
async fn writer_failure_freezes_at_summarized() {
    init_tracing();
    let entries = vec![entry("https://blog.example/w", "W", 1)];
    let h = harness_with(
        entries,
        Arc::new(MockSummarizer::new()),
        Arc::new(MockSectionWriter::failing_on("News")),
    );
    let source = register_source(&h).await;

    h.orchestrator.run_crawl(source.id).await.unwrap();

    let item = h
        .store
        .get_item(&url_hash("https://blog.example/w"))
        .await
        .unwrap()
        .unwrap();
    let artifact = h
        .store
        .get_artifact(item.artifact_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(artifact.status, ArtifactStatus::Summarized);
    assert!(artifact.last_error.is_some());
    assert!(artifact.summary.is_some());
}

#[tokio::test]
async fn malformed_section_reply_falls_back_to_deterministic_structure() {
    init_tracing();
    let entries = vec![entry("https://blog.example/m", "M", 1)];
    let h = harness_with(
        entries,
        Arc::new(MockSummarizer::new()),
        Arc::new(MockSectionWriter::malformed()),
    );
    let source = register_source(&h).await;

    h.orchestrator.run_crawl(source.id).await.unwrap();

    let item = h
        .store
        .get_item(&url_hash("https://blog.example/m"))
        .await
        .unwrap()
        .unwrap();
    let artifact = h
        .store
        .get_artifact(item.artifact_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(artifact.status, ArtifactStatus::Completed);

    let sections = h.store.get_sections(artifact.id).await.unwrap();
    assert!(sections.len() >= 3);
    assert_eq!(sections.first().unwrap().kind, SectionKind::Title);
    assert_eq!(sections.last().unwrap().kind, SectionKind::Closing);
    for (i, s) in sections.iter().enumerate() {
        assert_eq!(s.position, i);
    }
}

#[tokio::test]
async fn undecodable_section_reply_still_completes_with_fallback() {
    init_tracing();
    let entries = vec![entry("https://blog.example/u", "U", 1)];
    let h = harness_with(
        entries,
        Arc::new(MockSummarizer::new()),
        Arc::new(MockSectionWriter::empty_reply()),
    );
    let source = register_source(&h).await;

    h.orchestrator.run_crawl(source.id).await.unwrap();

    let item = h
        .store
        .get_item(&url_hash("https://blog.example/u"))
        .await
        .unwrap()
        .unwrap();
    let artifact = h
        .store
        .get_artifact(item.artifact_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(artifact.status, ArtifactStatus::Completed);
    assert!(artifact.last_error.is_none());

    let sections = h.store.get_sections(artifact.id).await.unwrap();
    assert!(sections.len() >= 3);
    assert_eq!(sections.first().unwrap().kind, SectionKind::Title);
    assert_eq!(sections.last().unwrap().kind, SectionKind::Closing);
}

#[tokio::test]
async fn undated_entries_stop_counting_as_new_after_the_first_crawl() {
    init_tracing();
    let entries = vec![
        undated_entry("https://blog.example/nodate", "No date"),
        entry("https://blog.example/dated", "Dated", 5),
    ];
    let h = harness(entries);
    let source = register_source(&h).await;

    let first = h.orchestrator.run_crawl(source.id).await.unwrap();
    assert_eq!(first.new_items, 2);

    // Same feed again: nothing new, and the undated entry is not re-minted.
    let second = h.orchestrator.run_crawl(source.id).await.unwrap();
    assert_eq!(second.new_items, 0);
    assert_eq!(second.artifacts_created, 0);

    let item = h
        .store
        .get_item(&url_hash("https://blog.example/nodate"))
        .await
        .unwrap()
        .unwrap();
    let first_artifact = item.artifact_id.unwrap();

    let third = h.orchestrator.run_crawl(source.id).await.unwrap();
    assert_eq!(third.new_items, 0);
    let item = h
        .store
        .get_item(&url_hash("https://blog.example/nodate"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.artifact_id, Some(first_artifact));
}

#[tokio::test]
async fn short_content_is_kept_as_draft_for_manual_completion() {
    init_tracing();
    let entries = vec![entry_with_content(
        "https://blog.example/s",
        "S",
        1,
        "Only a few words here.",
    )];
    let h = harness(entries);
    let source = register_source(&h).await;

    let outcome = h.orchestrator.run_crawl(source.id).await.unwrap();
    assert_eq!(outcome.artifacts_created, 1);

    let item = h
        .store
        .get_item(&url_hash("https://blog.example/s"))
        .await
        .unwrap()
        .unwrap();
    let artifact = h
        .store
        .get_artifact(item.artifact_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(artifact.status, ArtifactStatus::Draft);
    assert_eq!(artifact.last_error.as_deref(), Some("content too short"));
    assert!(artifact.summary.is_some());
}

#[tokio::test]
async fn unusable_text_creates_no_artifact_but_run_still_succeeds() {
    init_tracing();
    let entries = vec![entry_with_content("https://blog.example/e", "E", 1, "hi")];
    let h = harness(entries);
    let source = register_source(&h).await;

    let outcome = h.orchestrator.run_crawl(source.id).await.unwrap();
    assert_eq!(outcome.new_items, 1);
    assert_eq!(outcome.artifacts_created, 0);
    assert_eq!(outcome.status, CrawlStatus::Success);

    let item = h
        .store
        .get_item(&url_hash("https://blog.example/e"))
        .await
        .unwrap()
        .unwrap();
    assert!(item.artifact_id.is_none());
}

#[tokio::test]
async fn fifth_consecutive_failure_flips_source_to_errored() {
    init_tracing();
    let h = harness(vec![entry("https://blog.example/x", "X", 1)]);
    let source = register_source(&h).await;
    h.feed.set_failing(true);

    for attempt in 1..=5u32 {
        let outcome = h.orchestrator.run_crawl(source.id).await.unwrap();
        assert_eq!(outcome.status, CrawlStatus::Failed);

        let stored = h.store.get_source(source.id).await.unwrap().unwrap();
        assert_eq!(stored.consecutive_failures, attempt);
        if attempt < 5 {
            assert_eq!(stored.status, SourceStatus::Active, "flipped too early");
        } else {
            assert_eq!(stored.status, SourceStatus::Errored);
        }
    }
}

#[tokio::test]
async fn success_resets_the_failure_streak() {
    init_tracing();
    let h = harness(vec![entry("https://blog.example/y", "Y", 1)]);
    let source = register_source(&h).await;

    h.feed.set_failing(true);
    for _ in 0..4 {
        h.orchestrator.run_crawl(source.id).await.unwrap();
    }
    h.feed.set_failing(false);
    h.orchestrator.run_crawl(source.id).await.unwrap();

    let stored = h.store.get_source(source.id).await.unwrap().unwrap();
    assert_eq!(stored.consecutive_failures, 0);
    assert_eq!(stored.status, SourceStatus::Active);
    assert_eq!(stored.error_count, 4);
    assert_eq!(stored.success_count, 1);
    assert!(stored.last_crawled_at.is_some());
    assert!(stored.next_crawl_at.is_some());
}

#[tokio::test]
async fn manual_text_generation_runs_the_full_pipeline() {
    init_tracing();
    let h = harness(Vec::new());
    let text = "Editorial draft sentence. ".repeat(12);

    let artifact_id = h
        .pipeline
        .generate_from_text("Hand-written piece", &text)
        .await
        .unwrap();
    let artifact = h.store.get_artifact(artifact_id).await.unwrap().unwrap();
    assert_eq!(artifact.source_type, cardpress::ArtifactSourceType::Text);
    assert_eq!(artifact.status, ArtifactStatus::Completed);
    assert!(!artifact.auto_generated);
    assert!(!h.store.get_sections(artifact_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn manual_generation_rejects_unusable_text() {
    init_tracing();
    let h = harness(Vec::new());
    let err = h.pipeline.generate_from_text("t", "hi").await.unwrap_err();
    assert!(matches!(err, cardpress::IngestError::ContentTooShort { chars: 2 }));
}

#[tokio::test]
async fn only_latin_titles_are_translated() {
    init_tracing();
    let entries = vec![
        entry("https://blog.example/en", "Latest framework release", 2),
        entry("https://blog.example/ko", "오늘의 개발 소식", 1),
    ];
    let h = harness(entries);
    let source = register_source(&h).await;

    h.orchestrator.run_crawl(source.id).await.unwrap();

    let latin = h
        .store
        .get_item(&url_hash("https://blog.example/en"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latin.title, "[ko] Latest framework release");
    assert_eq!(latin.title_original, "Latest framework release");

    let korean = h
        .store
        .get_item(&url_hash("https://blog.example/ko"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(korean.title, "오늘의 개발 소식");
}

#[tokio::test]
async fn crawl_of_unknown_source_fails_fast() {
    init_tracing();
    let h = harness(Vec::new());
    let missing = uuid::Uuid::new_v4();
    let err = h.orchestrator.run_crawl(missing).await.unwrap_err();
    assert!(matches!(err, cardpress::IngestError::SourceNotFound { id } if id == missing));
}
