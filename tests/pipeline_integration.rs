//! End-to-end pipeline runs against in-memory stores and a fake feed source

mod common;

use async_trait::async_trait;
use bytes::Bytes;
use common::*;
use epg_ingest::{
    config::Config,
    errors::{AppError, AppResult},
    models::{Category, DayKey},
    pipeline::{Pipeline, PipelineState},
    storage::{ByteStream, DocumentStore, MemoryDocumentStore, MemoryObjectStore, ObjectStore},
    utils::FeedSource,
};
use std::sync::Arc;
use tokio::sync::Notify;

fn day(s: &str) -> DayKey {
    DayKey::parse(s).unwrap()
}

#[tokio::test]
async fn test_scenario_day_with_programmes() {
    let h = harness(FakeFeedSource::serving(SCENARIO_FEED));

    let report = h.pipeline.refresh_day(day("20240601")).await.unwrap();
    assert!(report.succeeded());
    assert_eq!(report.parse.as_ref().unwrap().programs_kept, 1);
    // UnknownChan has nothing scheduled that day
    assert_eq!(report.channels.as_ref().unwrap().created.len(), 1);

    let schedule = h.pipeline.programs_for_day(day("20240601")).await.unwrap();
    assert!(!schedule.refreshed);
    assert_eq!(schedule.program_count(), 1);
    assert_eq!(schedule.channels.len(), 1);

    let la1 = schedule.channel("La 1").unwrap();
    assert_eq!(la1.channel.category, Category::Tdt);
    assert!(la1.channel.region.is_none());

    let view = &la1.programs[0];
    assert_eq!(view.program.title, "Noticias");
    assert_eq!(view.program.channel_id, la1.channel_id);
    assert_eq!(view.program.start.to_rfc3339(), "2024-06-01T00:00:00+00:00");
    assert_eq!(view.detail.duration_minutes, 60);
    assert_eq!(view.detail.year, "2023");
    assert_eq!(view.detail.age_rating, "16");
    assert_eq!(view.detail.votes, "8/10");
    assert_eq!(view.detail.genre, "Drama");
    assert_eq!(view.detail.subgenre, "Thriller");
    assert_eq!(view.detail.synopsis, "A gripping tale");
    assert_eq!(view.detail.detail_map["reparto"], "Ana, Luis");
    assert_eq!(view.detail.detail_map["pais"], "España");
}

#[tokio::test]
async fn test_scenario_day_without_programmes() {
    let h = harness(FakeFeedSource::serving(SCENARIO_FEED));

    let report = h.pipeline.refresh_day(day("20240602")).await.unwrap();
    assert!(report.succeeded());
    let parse = report.parse.unwrap();
    assert_eq!(parse.programs_kept, 0);
    assert_eq!(parse.other_day, 1);
    assert!(report.channels.unwrap().created.is_empty());
    assert_eq!(h.documents.count("channels").await, 0);

    let schedule = h.pipeline.programs_for_day(day("20240602")).await.unwrap();
    assert!(schedule.refreshed);
    assert_eq!(schedule.program_count(), 0);
}

#[tokio::test]
async fn test_read_through_refreshes_missing_day() {
    let h = harness(FakeFeedSource::serving(SCENARIO_FEED));

    let schedule = h.pipeline.programs_for_day(day("20240601")).await.unwrap();
    assert!(schedule.refreshed);
    assert_eq!(schedule.program_count(), 1);

    let again = h.pipeline.programs_for_day(day("20240601")).await.unwrap();
    assert!(!again.refreshed);
    assert_eq!(h.source.requests(), 1);
}

#[tokio::test]
async fn test_second_refresh_is_idempotent() {
    let h = harness(FakeFeedSource::serving(SCENARIO_FEED));

    h.pipeline.refresh_day(day("20240601")).await.unwrap();
    let second = h.pipeline.refresh_day(day("20240601")).await.unwrap();

    let channels = second.channels.unwrap();
    assert!(channels.created.is_empty());
    assert_eq!(channels.existing.len(), 1);
    assert_eq!(h.documents.count("channels").await, 1);
    assert_eq!(
        second.acquire.unwrap().origin,
        epg_ingest::ingestor::FeedOrigin::Cache
    );
    assert_eq!(h.source.requests(), 1);

    let schedule = h.pipeline.read_day(day("20240601")).await.unwrap();
    assert_eq!(schedule.program_count(), 1);
}

#[tokio::test]
async fn test_refresh_clears_buckets_of_channels_no_longer_scheduled() {
    let h = harness(FakeFeedSource::serving(SCENARIO_FEED));
    h.pipeline.refresh_day(day("20240601")).await.unwrap();

    // Force a fresh download carrying a different lineup
    h.objects
        .delete(&h.pipeline.acquirer().cache_path(day("20240601")))
        .await
        .unwrap();
    h.source.set_body(
        r#"<tv>
<channel id="c1"><display-name>La 1</display-name></channel>
<channel id="c3"><display-name>TV3</display-name></channel>
<programme channel="c3" start="20240601100000" stop="20240601110000"><title>Telenotícies</title></programme>
</tv>"#,
    );

    let report = h.pipeline.refresh_day(day("20240601")).await.unwrap();
    assert!(report.succeeded());
    assert_eq!(report.programs.as_ref().unwrap().buckets_cleared, 1);

    let schedule = h.pipeline.read_day(day("20240601")).await.unwrap();
    assert!(schedule.channel("La 1").is_none());
    assert_eq!(schedule.channel("TV3").unwrap().programs.len(), 1);
    assert_eq!(schedule.program_count(), 1);
}

#[tokio::test]
async fn test_cache_upload_failure_does_not_fail_run() {
    let h = harness(FakeFeedSource::serving(SCENARIO_FEED));
    h.objects.set_fail_uploads(true);

    let report = h.pipeline.refresh_day(day("20240601")).await.unwrap();
    assert!(report.succeeded());
    assert!(report.acquire.unwrap().upload_error.is_some());
    assert_eq!(h.pipeline.read_day(day("20240601")).await.unwrap().program_count(), 1);
}

#[tokio::test]
async fn test_source_unavailable_fails_run_without_writes() {
    let h = harness(FakeFeedSource::offline());

    let err = h.pipeline.refresh_day(day("20240601")).await.unwrap_err();
    assert!(matches!(err, AppError::SourceUnavailable { .. }));
    assert_eq!(h.documents.count("channels").await, 0);

    let report = h.pipeline.last_report().await.unwrap();
    assert_eq!(report.state, PipelineState::Failed);
    assert!(report.error.unwrap().contains("connection refused"));
    let last = report.history.last().unwrap();
    assert_eq!(last.from, PipelineState::Acquiring);
}

#[tokio::test]
async fn test_malformed_feed_fails_before_any_write() {
    let h = harness(FakeFeedSource::serving("<tv><channel id=\"c1\"><display-name>La 1</tv>"));

    let err = h.pipeline.refresh_day(day("20240601")).await.unwrap_err();
    assert!(matches!(err, AppError::MalformedFeed { .. }));
    assert!(h.documents.commit_sizes().is_empty());

    let report = h.pipeline.last_report().await.unwrap();
    assert_eq!(report.history.last().unwrap().from, PipelineState::Parsing);
}

#[tokio::test]
async fn test_wide_feed_respects_commit_cap() {
    let h = harness(FakeFeedSource::serving(wide_feed(1200)));

    let report = h.pipeline.refresh_day(day("20240601")).await.unwrap();
    assert!(report.succeeded());
    assert_eq!(report.channels.unwrap().created.len(), 1200);
    assert_eq!(report.programs.unwrap().channels_written, 1200);
    assert_eq!(h.documents.count("channels").await, 1200);
    assert!(h.documents.commit_sizes().iter().all(|&size| size <= 500));
    assert_eq!(&h.documents.commit_sizes()[..3], &[500, 500, 200]);
}

#[tokio::test]
async fn test_failed_commit_is_reported_and_run_continues() {
    let h = harness(FakeFeedSource::serving(wide_feed(1200)));
    // Second channel chunk
    h.documents.fail_commit(2);

    let report = h.pipeline.refresh_day(day("20240601")).await.unwrap();
    assert!(report.succeeded());
    assert_eq!(report.failed_commits(), 1);

    let channels = report.channels.as_ref().unwrap();
    assert_eq!(channels.created.len(), 700);
    let programs = report.programs.as_ref().unwrap();
    assert_eq!(programs.unresolved_channels.len(), 500);
    assert_eq!(programs.channels_written, 700);
}

#[tokio::test]
async fn test_rebuild_from_gzip_canonical_feed() {
    let source = FakeFeedSource::serving(
        "<tv><channel id=\"old\"><display-name>Stale</display-name></channel>\
         <programme channel=\"old\" start=\"20240601000000\" stop=\"20240601010000\"><title>x</title></programme></tv>",
    );
    let h = harness(source);
    h.pipeline.refresh_day(day("20240601")).await.unwrap();
    assert_eq!(h.documents.count("channels").await, 1);

    let feed = SCENARIO_FEED.replace(
        "</tv>",
        r#"<channel id="c3"><display-name>TV3</display-name></channel>
<programme channel="c3" start="20240602100000" stop="20240602110000"><title>Telenotícies</title></programme>
</tv>"#,
    );
    h.source.set_body(gzip(feed.as_bytes()));

    let report = h.pipeline.rebuild().await.unwrap();
    assert!(report.succeeded());
    assert_eq!(report.purged["channels"], 1);
    assert_eq!(report.days, vec![day("20240601"), day("20240602")]);
    assert_eq!(report.parse.as_ref().unwrap().programs_kept, 2);

    assert_eq!(h.documents.count("channels").await, 3);
    assert!(h.objects.exists("epg/guide.xml").await.unwrap());

    let curated = report.curated.unwrap();
    assert_eq!(curated.channels_copied, 2);
    assert_eq!(curated.skipped_unknown, 1);
    assert_eq!(curated.program_documents_copied, 2);
    assert_eq!(h.documents.count("curated_channels").await, 2);

    let schedule = h.pipeline.read_day(day("20240602")).await.unwrap();
    let tv3 = schedule.channel("TV3").unwrap();
    assert_eq!(tv3.channel.category, Category::Autonomic);
    assert_eq!(tv3.channel.region.as_deref(), Some("Cataluña"));
    assert!(schedule.channel("Stale").is_none());
}

#[tokio::test]
async fn test_rebuild_skips_curation_when_disabled() {
    let mut config = Config::default();
    config.pipeline.curate_after_rebuild = false;
    let h = harness_with_config(FakeFeedSource::serving(SCENARIO_FEED), config);

    let report = h.pipeline.rebuild().await.unwrap();
    assert!(report.curated.is_none());
    assert_eq!(h.documents.count("curated_channels").await, 0);
}

#[tokio::test]
async fn test_transitions_are_broadcast_in_order() {
    let h = harness(FakeFeedSource::serving(SCENARIO_FEED));
    let mut rx = h.pipeline.subscribe();

    let report = h.pipeline.refresh_day(day("20240601")).await.unwrap();

    let mut states = Vec::new();
    while let Ok(progress) = rx.try_recv() {
        assert_eq!(progress.run_id, report.run_id);
        states.push(progress.state);
    }
    assert_eq!(
        states,
        vec![
            PipelineState::Acquiring,
            PipelineState::Parsing,
            PipelineState::Classifying,
            PipelineState::Writing,
            PipelineState::Done,
        ]
    );
    assert_eq!(report.history.len(), 5);
    assert_eq!(report.history[0].from, PipelineState::Idle);
}

/// Feed source that holds every fetch until released
struct GatedFeedSource {
    gate: Notify,
}

#[async_trait]
impl FeedSource for GatedFeedSource {
    async fn fetch(&self, _url: &str) -> AppResult<Bytes> {
        self.gate.notified().await;
        Ok(Bytes::from_static(SCENARIO_FEED.as_bytes()))
    }

    async fn open_stream(&self, _url: &str) -> AppResult<ByteStream> {
        Err(AppError::source_unavailable("streaming not supported"))
    }
}

#[tokio::test]
async fn test_concurrent_run_is_rejected() {
    let source = Arc::new(GatedFeedSource {
        gate: Notify::new(),
    });
    let objects: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    let documents: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
    let pipeline = Pipeline::new(Config::default(), objects, documents, source.clone());

    let first = pipeline.refresh_day(day("20240601"));
    let second = async {
        tokio::task::yield_now().await;
        assert!(pipeline.is_running());
        let result = pipeline.rebuild().await;
        source.gate.notify_one();
        result
    };
    let (first, second) = tokio::join!(first, second);

    assert!(first.unwrap().succeeded());
    assert!(matches!(
        second.unwrap_err(),
        AppError::OperationInProgress { .. }
    ));
}
