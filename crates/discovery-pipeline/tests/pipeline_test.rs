//! End-to-end tests for the discovery pipeline.
//!
//! Every external service is an in-memory double from `common`, so these
//! tests never touch the network.

mod common;

use std::sync::Arc;

use common::{fast_policy, now, plays, FakeCatalog, FakeHistory, FakeNeighbours};
use discovery_core::{Listener, OrderBy, TrackKey};
use discovery_pipeline::sources::CatalogService;
use discovery_pipeline::{
    DiscoveryPipeline, DiscoverySettings, PipelineError, PipelineEvent, RunReport, Stage,
};
use tokio_util::sync::CancellationToken;

fn settings(neighbours: usize) -> DiscoverySettings {
    let mut settings = DiscoverySettings::new(Listener::new("rj").unwrap(), now());
    settings.neighbour_count = neighbours;
    settings.playlist_name = "discovery-fm - test".to_string();
    settings
}

fn pipeline(
    history: FakeHistory,
    neighbours: FakeNeighbours,
    catalog: &Arc<FakeCatalog>,
) -> DiscoveryPipeline {
    let catalog = Arc::clone(catalog) as Arc<dyn CatalogService>;
    DiscoveryPipeline::new(Arc::new(history), Arc::new(neighbours), catalog, fast_policy())
}

/// The three-listener example: one shared track, one single-support track,
/// one track the listener already knows.
fn example_history() -> FakeHistory {
    FakeHistory::new(10)
        .with("rj", plays(&[("a", "x")]))
        .with("alice", plays(&[("a", "x"), ("b", "y")]))
        .with("bob", plays(&[("b", "y"), ("c", "z")]))
}

fn example_catalog() -> Arc<FakeCatalog> {
    Arc::new(FakeCatalog::with_tracks(&[
        ("sp:a", "a", "x"),
        ("sp:b", "b", "y"),
        ("sp:c", "c", "z"),
    ]))
}

fn supports(report: &RunReport) -> Vec<(TrackKey, u32)> {
    report
        .candidates
        .iter()
        .map(|c| (c.key().clone(), c.support_count()))
        .collect()
}

#[tokio::test]
async fn test_worked_example_end_to_end() {
    let catalog = example_catalog();
    let pipeline = pipeline(
        example_history(),
        FakeNeighbours::ranked(&["alice", "bob"]),
        &catalog,
    );

    let report = pipeline.run(&settings(2)).await.unwrap();

    assert_eq!(
        supports(&report),
        vec![(TrackKey::new("b", "y"), 2), (TrackKey::new("c", "z"), 1)]
    );
    assert_eq!(report.neighbours_used.len(), 2);
    assert!(report.neighbours_failed.is_empty());
    assert_eq!(report.own_plays, 1);
    assert_eq!(report.neighbour_plays, 4);
    assert_eq!(report.matched, 2);
    assert!(report.unmatched.is_empty());
    assert!(!report.cancelled);

    let playlist = report.playlist.as_ref().unwrap();
    assert_eq!(playlist.ordered_catalog_ids(), ["sp:b", "sp:c"]);
    assert!(playlist.description.contains("neighbours of rj"));
    assert_eq!(report.published_count(), 2);
    assert_eq!(
        catalog.playlist("discovery-fm - test").unwrap(),
        vec!["sp:b".to_string(), "sp:c".to_string()]
    );
}

#[tokio::test]
async fn test_max_tracks_keeps_best_supported() {
    let history = FakeHistory::new(10)
        .with("rj", Vec::new())
        .with("alice", plays(&[("c", "z"), ("b", "y")]))
        .with("bob", plays(&[("b", "y")]))
        .with("carol", plays(&[("b", "y")]));
    let catalog = example_catalog();
    let pipeline = pipeline(
        history,
        FakeNeighbours::ranked(&["alice", "bob", "carol"]),
        &catalog,
    );
    let mut settings = settings(3);
    settings.max_tracks = 1;

    let report = pipeline.run(&settings).await.unwrap();

    assert_eq!(report.candidates[0].support_count(), 3);
    assert_eq!(
        report.playlist.as_ref().unwrap().ordered_catalog_ids(),
        ["sp:b"]
    );
    assert_eq!(report.matched, 1);
    assert_eq!(report.not_searched, 1);
    assert_eq!(catalog.playlist("discovery-fm - test").unwrap(), vec!["sp:b"]);
}

#[tokio::test]
async fn test_rerun_with_no_ordering_is_idempotent() {
    let catalog = example_catalog();
    let mut settings = settings(2);
    settings.order_by = OrderBy::None;

    let first = pipeline(
        example_history(),
        FakeNeighbours::ranked(&["alice", "bob"]),
        &catalog,
    )
    .run(&settings)
    .await
    .unwrap();
    let second = pipeline(
        example_history(),
        FakeNeighbours::ranked(&["alice", "bob"]),
        &catalog,
    )
    .run(&settings)
    .await
    .unwrap();

    assert_eq!(supports(&first), supports(&second));
    assert_eq!(first.playlist, second.playlist);

    let first_publish = first.published.unwrap();
    let second_publish = second.published.unwrap();
    assert!(first_publish.created);
    assert!(!second_publish.created);
    assert_eq!(second_publish.playlist_id, first_publish.playlist_id);
    assert_eq!(second_publish.added, 0);
    assert_eq!(second_publish.already_present, 2);
    assert_eq!(catalog.playlist_count(), 1);
    assert_eq!(catalog.playlist("discovery-fm - test").unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_neighbour_is_skipped() {
    let history = example_history().failing("bob");
    let catalog = example_catalog();
    let pipeline = pipeline(history, FakeNeighbours::ranked(&["alice", "bob"]), &catalog);

    let report = pipeline.run(&settings(2)).await.unwrap();

    assert_eq!(report.neighbours_used.len(), 1);
    assert_eq!(report.neighbours_failed.len(), 1);
    assert_eq!(report.neighbours_failed[0].0.as_str(), "bob");
    assert_eq!(supports(&report), vec![(TrackKey::new("b", "y"), 1)]);
}

#[tokio::test]
async fn test_every_neighbour_failing_is_fatal() {
    let history = example_history().failing("alice").failing("bob");
    let catalog = example_catalog();
    let pipeline = pipeline(history, FakeNeighbours::ranked(&["alice", "bob"]), &catalog);

    let err = pipeline.run(&settings(2)).await.unwrap_err();
    assert!(matches!(err, PipelineError::NoNeighboursFound { .. }));
    assert_eq!(catalog.searches(), 0);
}

#[tokio::test]
async fn test_own_history_failure_is_fatal() {
    let history = example_history().failing("rj");
    let catalog = example_catalog();
    let pipeline = pipeline(history, FakeNeighbours::ranked(&["alice", "bob"]), &catalog);

    let err = pipeline.run(&settings(2)).await.unwrap_err();
    match err {
        PipelineError::FetchFailed {
            listener, attempts, ..
        } => {
            assert_eq!(listener.as_str(), "rj");
            assert_eq!(attempts, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_empty_neighbour_listing_is_fatal() {
    let catalog = example_catalog();
    let pipeline = pipeline(example_history(), FakeNeighbours(Vec::new()), &catalog);

    let err = pipeline.run(&settings(2)).await.unwrap_err();
    assert!(matches!(err, PipelineError::NoNeighboursFound { .. }));
}

#[tokio::test]
async fn test_dry_run_does_not_publish() {
    let catalog = example_catalog();
    let pipeline = pipeline(
        example_history(),
        FakeNeighbours::ranked(&["alice", "bob"]),
        &catalog,
    );
    let mut settings = settings(2);
    settings.dry_run = true;

    let report = pipeline.run(&settings).await.unwrap();

    assert_eq!(report.playlist.as_ref().unwrap().len(), 2);
    assert!(report.published.is_none());
    assert_eq!(report.published_count(), 0);
    assert_eq!(catalog.playlist_count(), 0);
}

#[tokio::test]
async fn test_cancelled_run_returns_partial_candidates() {
    let cancel = CancellationToken::new();
    // Own history is one page; the token fires as the first neighbour page
    // is served.
    let history = example_history().cancel_after(2, cancel.clone());
    let catalog = example_catalog();
    let pipeline = pipeline(history, FakeNeighbours::ranked(&["alice", "bob"]), &catalog)
        .with_cancellation(cancel);
    let mut settings = settings(2);
    settings.workers = 1;

    let report = pipeline.run(&settings).await.unwrap();

    assert!(report.cancelled);
    assert!(report.neighbours_used.len() <= 1);
    assert!(report.playlist.is_none());
    assert!(report.published.is_none());
    assert_eq!(catalog.searches(), 0);
    assert_eq!(catalog.playlist_count(), 0);
}

#[tokio::test]
async fn test_events_follow_stage_order() {
    let catalog = example_catalog();
    let pipeline = pipeline(
        example_history(),
        FakeNeighbours::ranked(&["alice", "bob"]),
        &catalog,
    );
    let mut events = pipeline.subscribe();
    let mut settings = settings(2);
    settings.dry_run = true;

    pipeline.run(&settings).await.unwrap();

    let mut started = Vec::new();
    let mut pages = 0;
    let mut skipped = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            PipelineEvent::StageStarted { stage } => started.push(stage),
            PipelineEvent::PageFetched(_) => pages += 1,
            PipelineEvent::StageSkipped { stage, .. } => skipped.push(stage),
            _ => {}
        }
    }

    assert_eq!(
        started,
        vec![
            Stage::Neighbours,
            Stage::OwnHistory,
            Stage::NeighbourHistories,
            Stage::Discover,
            Stage::Match,
        ]
    );
    assert_eq!(pages, 3);
    assert_eq!(skipped, vec![Stage::Publish]);
}

#[tokio::test]
async fn test_partial_publish_keeps_run_counts() {
    let catalog = Arc::new(
        FakeCatalog::with_tracks(&[("sp:a", "a", "x"), ("sp:b", "b", "y"), ("sp:c", "c", "z")])
            .with_batch_size(1)
            .failing_adds_after(1),
    );
    let pipeline = pipeline(
        example_history(),
        FakeNeighbours::ranked(&["alice", "bob"]),
        &catalog,
    );

    let report = pipeline.run(&settings(2)).await.unwrap();

    assert_eq!(report.neighbours_used.len(), 2);
    assert_eq!(report.candidates.len(), 2);
    assert_eq!(report.matched, 2);
    assert!(report.published.is_none());
    assert!(!report.is_complete());
    match report.publish_error.as_ref().unwrap() {
        PipelineError::PlaylistPublishPartial {
            playlist_id,
            added,
            total,
            ..
        } => {
            assert_eq!(playlist_id.as_deref(), Some("pl1"));
            assert_eq!(*added, 1);
            assert_eq!(*total, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(report.published_count(), 1);
    assert_eq!(catalog.playlist("discovery-fm - test").unwrap(), vec!["sp:b"]);
    assert_eq!(report.playlist.as_ref().unwrap().len(), 2);
}

#[tokio::test]
async fn test_neighbour_count_ties_break_by_rank_then_key() {
    let history = FakeHistory::new(10)
        .with("rj", Vec::new())
        .with("alice", plays(&[("z", "late"), ("a", "solo")]))
        .with("bob", plays(&[("c", "z"), ("b", "y")]))
        .with("carol", plays(&[("b", "y"), ("c", "z"), ("z", "late")]));
    let catalog = Arc::new(FakeCatalog::with_tracks(&[
        ("sp:late", "z", "late"),
        ("sp:solo", "a", "solo"),
        ("sp:y", "b", "y"),
        ("sp:z", "c", "z"),
    ]));
    let pipeline = pipeline(
        history,
        FakeNeighbours::ranked(&["alice", "bob", "carol"]),
        &catalog,
    );
    let mut settings = settings(3);
    settings.dry_run = true;

    let report = pipeline.run(&settings).await.unwrap();

    assert_eq!(
        supports(&report),
        vec![
            (TrackKey::new("z", "late"), 2),
            (TrackKey::new("b", "y"), 2),
            (TrackKey::new("c", "z"), 2),
            (TrackKey::new("a", "solo"), 1),
        ]
    );
    assert_eq!(
        report.playlist.as_ref().unwrap().ordered_catalog_ids(),
        ["sp:late", "sp:y", "sp:z", "sp:solo"]
    );
}

#[tokio::test]
async fn test_concurrent_fetches_keep_rank_order() {
    // The closest neighbour answers last; merging still follows rank.
    let history = FakeHistory::new(10)
        .with("rj", Vec::new())
        .with("alice", plays(&[("a", "1")]))
        .with("bob", plays(&[("b", "2")]))
        .with("carol", plays(&[("c", "3")]))
        .slow("alice", 60)
        .slow("bob", 30);
    let catalog = example_catalog();
    let pipeline = pipeline(
        history,
        FakeNeighbours::ranked(&["alice", "bob", "carol"]),
        &catalog,
    );
    let mut settings = settings(3);
    settings.order_by = OrderBy::None;
    settings.workers = 3;
    settings.dry_run = true;

    let report = pipeline.run(&settings).await.unwrap();

    let used: Vec<&str> = report
        .neighbours_used
        .iter()
        .map(|n| n.listener.as_str())
        .collect();
    assert_eq!(used, vec!["alice", "bob", "carol"]);
    let ranks: Vec<(TrackKey, u32)> = report
        .candidates
        .iter()
        .map(|c| (c.key().clone(), c.first_seen_rank()))
        .collect();
    assert_eq!(
        ranks,
        vec![
            (TrackKey::new("a", "1"), 1),
            (TrackKey::new("b", "2"), 2),
            (TrackKey::new("c", "3"), 3),
        ]
    );
}
