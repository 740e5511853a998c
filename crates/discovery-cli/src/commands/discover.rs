use anyhow::{Context, Result};
use chrono::Utc;
use discovery_core::Listener;
use discovery_pipeline::sources::{
    CatalogService, HistorySource, LastFmClient, NeighbourSource, SpotifyClient,
};
use discovery_pipeline::{
    default_playlist_name, months_ago, Config, DiscoveryPipeline, DiscoverySettings,
    PipelineError, PipelineEvent, RunReport, Stage,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::DiscoverArgs;

/// Unmatched tracks listed after a run.
const UNMATCHED_SHOWN: usize = 20;

fn stage_icon(stage: Stage) -> &'static str {
    match stage {
        Stage::Neighbours => "👥",
        Stage::OwnHistory => "📜",
        Stage::NeighbourHistories => "🎧",
        Stage::Discover => "🔍",
        Stage::Match => "🎯",
        Stage::Publish => "📝",
    }
}

fn stage_title(stage: Stage) -> &'static str {
    match stage {
        Stage::Neighbours => "Finding Last.fm neighbours",
        Stage::OwnHistory => "Collecting your listening history",
        Stage::NeighbourHistories => "Collecting neighbour histories",
        Stage::Discover => "Discovering new tracks",
        Stage::Match => "Matching tracks on Spotify",
        Stage::Publish => "Publishing playlist",
    }
}

fn settings_from(args: &DiscoverArgs, config: &Config) -> Result<DiscoverySettings> {
    let listener = Listener::new(args.username.as_str()).context("Invalid Last.fm username")?;
    let now = Utc::now();

    let mut settings = DiscoverySettings::new(listener, now);
    settings.neighbour_count = args.neighbours.unwrap_or(config.neighbours);
    settings.self_since = months_ago(now, args.user_months.unwrap_or(config.user_months));
    settings.neighbour_since = months_ago(
        now,
        args.neighbour_months.unwrap_or(config.neighbour_months),
    );
    settings.order_by = args.order_by.unwrap_or(config.order_by);
    settings.max_tracks = args.max_tracks.unwrap_or(config.max_tracks);
    settings.playlist_name = args
        .playlist_name
        .clone()
        .unwrap_or_else(|| default_playlist_name(now.date_naive()));
    settings.workers = args.workers.unwrap_or(config.workers);
    settings.search_workers = config.search_workers;
    settings.dry_run = args.dry_run;
    Ok(settings)
}

/// Run discovery for one listener and print a summary.
pub async fn run_discover(args: DiscoverArgs, config: &Config) -> Result<()> {
    let settings = settings_from(&args, config)?;

    let lastfm = Arc::new(
        LastFmClient::new(config.require_lastfm_api_key()?.to_string())
            .context("Failed to create Last.fm client")?,
    );
    let spotify = SpotifyClient::new(config.require_spotify_access_token()?.to_string())
        .context("Failed to create Spotify client")?;

    let history = Arc::clone(&lastfm) as Arc<dyn HistorySource>;
    let neighbours: Arc<dyn NeighbourSource> = lastfm;
    let catalog: Arc<dyn CatalogService> = Arc::new(spotify);

    let pipeline = DiscoveryPipeline::new(history, neighbours, catalog, config.retry.policy())
        .with_public_playlist(config.playlist_public && !args.private);

    println!("\n🎵 discovery-fm\n");
    println!("  Listener: {}", settings.listener);
    println!("  Neighbours: {}", settings.neighbour_count);
    println!("  Order: {}", settings.order_by);
    println!("  Max tracks: {}", settings.max_tracks);
    if settings.dry_run {
        println!("  Playlist: {} (dry run)", settings.playlist_name);
    } else {
        println!("  Playlist: {}", settings.playlist_name);
    }
    println!();

    // Subscribe to events for progress display
    let mut events = pipeline.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PipelineEvent::StageStarted { stage }) => {
                    println!(
                        "{} Step {}/{}: {}...",
                        stage_icon(stage),
                        stage.number(),
                        Stage::COUNT,
                        stage_title(stage)
                    );
                }
                Ok(PipelineEvent::StageCompleted { summary, .. }) => {
                    println!("  ✓ {summary}\n");
                }
                Ok(PipelineEvent::StageSkipped { stage, reason }) => {
                    println!(
                        "{} Step {}/{}: {} (skipped - {reason})\n",
                        stage_icon(stage),
                        stage.number(),
                        Stage::COUNT,
                        stage_title(stage)
                    );
                }
                Ok(PipelineEvent::StageFailed { error, .. }) => {
                    eprintln!("  ✗ {error}\n");
                }
                Ok(PipelineEvent::NeighbourFailed { listener, error }) => {
                    eprintln!("  ✗ {listener}: {error}");
                }
                Ok(PipelineEvent::PageFetched(_)) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    let cancel = pipeline.cancellation_token();
    let trigger = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted; stopping after the current request");
            cancel.cancel();
        }
    });

    let result = pipeline.run(&settings).await;
    trigger.abort();
    drop(pipeline);
    if let Err(e) = printer.await {
        log::debug!("Progress printer stopped: {}", e);
    }

    let report = result.context("Discovery failed")?;
    print_summary(&report);

    if let Some(PipelineError::PlaylistPublishPartial {
        playlist_id,
        added,
        total,
        message,
    }) = &report.publish_error
    {
        eprintln!("\n✗ Publishing stopped after {added} of {total} tracks: {message}");
        if let Some(id) = playlist_id {
            eprintln!("  Playlist: {}", SpotifyClient::playlist_url(id));
        }
        eprintln!(
            "  Re-run with --playlist-name \"{}\" to add the rest.",
            settings.playlist_name
        );
        anyhow::bail!("Playlist publish incomplete");
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    if report.cancelled {
        println!("⚠️  Run cancelled; nothing was published.\n");
    }

    println!("📊 Summary\n");
    println!(
        "  Neighbours used: {} of {}",
        report.neighbours_used.len(),
        report.neighbours_requested
    );
    for (listener, error) in &report.neighbours_failed {
        println!("    skipped {listener}: {error}");
    }
    println!("  Candidate tracks: {}", report.candidates.len());
    println!("  Matched on Spotify: {}", report.matched);
    println!("  Unmatched: {}", report.unmatched.len());
    if !report.failed_searches.is_empty() {
        println!("  Search failures: {}", report.failed_searches.len());
    }
    if report.not_searched > 0 {
        println!("  Not searched: {}", report.not_searched);
    }

    match (&report.published, &report.playlist) {
        (None, Some(playlist)) if report.publish_error.is_some() => {
            println!(
                "  Published: {} of {} (incomplete)",
                report.published_count(),
                playlist.len()
            );
        }
        (Some(outcome), _) => {
            println!("  Published: {}", report.published_count());
            let url = outcome
                .url
                .clone()
                .unwrap_or_else(|| SpotifyClient::playlist_url(&outcome.playlist_id));
            println!("\n✓ Playlist ready: {url}");
        }
        (None, Some(playlist)) => {
            println!("  Playlist tracks (not published): {}", playlist.len());
        }
        (None, None) => {}
    }

    if !report.unmatched.is_empty() {
        println!("\n❓ Unmatched tracks (first {}):", UNMATCHED_SHOWN.min(report.unmatched.len()));
        for candidate in report.unmatched.iter().take(UNMATCHED_SHOWN) {
            println!("  - {} - {}", candidate.artist(), candidate.title());
        }
        if report.unmatched.len() > UNMATCHED_SHOWN {
            println!("  ... and {} more", report.unmatched.len() - UNMATCHED_SHOWN);
        }
    }
}
