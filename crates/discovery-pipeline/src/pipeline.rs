//! End-to-end discovery run.
//!
//! [`DiscoveryPipeline::run`] resolves neighbours, collects histories,
//! aggregates candidates, matches them against the catalog and publishes
//! the playlist. Progress is broadcast as [`PipelineEvent`]s; the outcome
//! is a [`RunReport`] that always says how far the run got.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use discovery_core::{
    assemble, order_candidates, DiscoveryCandidate, DiscoveryEngine, Listener, Neighbour,
    OrderBy, PlaylistSpec, TrackKey,
};
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, PipelineResult};
use crate::history::{HistoryCollector, PageTick};
use crate::matcher::CatalogMatcher;
use crate::neighbours::NeighbourResolver;
use crate::publish::{PlaylistPublisher, PublishOutcome};
use crate::resilience::RetryPolicy;
use crate::sources::{CatalogService, HistorySource, NeighbourSource};

const EVENT_CAPACITY: usize = 256;

/// Cutoff `months` months before `now`, counting a month as 30 days.
pub fn months_ago(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(months) * 30)
}

/// Playlist name used when none is given.
pub fn default_playlist_name(date: NaiveDate) -> String {
    format!("discovery-fm - {}", date.format("%Y-%m-%d"))
}

/// Playlist description naming the listener and how many neighbours fed it.
pub fn playlist_description(listener: &Listener, neighbours_used: usize) -> String {
    format!(
        "Tracks from Last.fm neighbours of {listener}. \
         Generated from {neighbours_used} neighbours' listening history."
    )
}

/// Stages of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Neighbours,
    OwnHistory,
    NeighbourHistories,
    Discover,
    Match,
    Publish,
}

impl Stage {
    pub const COUNT: usize = 6;

    /// 1-based position of the stage.
    pub fn number(self) -> usize {
        match self {
            Self::Neighbours => 1,
            Self::OwnHistory => 2,
            Self::NeighbourHistories => 3,
            Self::Discover => 4,
            Self::Match => 5,
            Self::Publish => 6,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Neighbours => "neighbours",
            Self::OwnHistory => "own-history",
            Self::NeighbourHistories => "neighbour-histories",
            Self::Discover => "discover",
            Self::Match => "match",
            Self::Publish => "publish",
        })
    }
}

/// Progress notifications broadcast during a run.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StageStarted { stage: Stage },
    StageCompleted { stage: Stage, summary: String },
    StageSkipped { stage: Stage, reason: String },
    StageFailed { stage: Stage, error: String },
    PageFetched(PageTick),
    NeighbourFailed { listener: Listener, error: String },
}

/// Inputs for one run.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub listener: Listener,
    pub neighbour_count: usize,
    /// Own plays newer than this are excluded from discovery.
    pub self_since: DateTime<Utc>,
    /// Neighbour plays newer than this are considered.
    pub neighbour_since: DateTime<Utc>,
    pub order_by: OrderBy,
    pub max_tracks: usize,
    pub playlist_name: String,
    pub workers: usize,
    pub search_workers: usize,
    /// Discover and match, but leave the catalog untouched.
    pub dry_run: bool,
}

impl DiscoverySettings {
    /// Settings with the standard defaults relative to `now`.
    pub fn new(listener: Listener, now: DateTime<Utc>) -> Self {
        Self {
            listener,
            neighbour_count: 10,
            self_since: months_ago(now, 60),
            neighbour_since: months_ago(now, 12),
            order_by: OrderBy::NeighbourCount,
            max_tracks: 10_000,
            playlist_name: default_playlist_name(now.date_naive()),
            workers: 4,
            search_workers: 10,
            dry_run: false,
        }
    }
}

/// What a run did. Partial runs are reported, never hidden.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub listener: Listener,
    pub neighbours_requested: usize,
    /// Neighbours whose history was merged, closest first.
    pub neighbours_used: Vec<Neighbour>,
    pub neighbours_failed: Vec<(Listener, String)>,
    pub own_plays: usize,
    pub neighbour_plays: usize,
    /// Discovery candidates, in the order they were searched.
    pub candidates: Vec<DiscoveryCandidate>,
    pub matched: usize,
    /// Candidates the catalog had no acceptable track for.
    pub unmatched: Vec<DiscoveryCandidate>,
    pub failed_searches: Vec<(TrackKey, String)>,
    pub not_searched: usize,
    pub playlist: Option<PlaylistSpec>,
    pub published: Option<PublishOutcome>,
    /// Set when publishing stopped partway; always a
    /// [`PipelineError::PlaylistPublishPartial`].
    pub publish_error: Option<PipelineError>,
    pub cancelled: bool,
}

impl RunReport {
    fn new(settings: &DiscoverySettings) -> Self {
        Self {
            listener: settings.listener.clone(),
            neighbours_requested: settings.neighbour_count,
            neighbours_used: Vec::new(),
            neighbours_failed: Vec::new(),
            own_plays: 0,
            neighbour_plays: 0,
            candidates: Vec::new(),
            matched: 0,
            unmatched: Vec::new(),
            failed_searches: Vec::new(),
            not_searched: 0,
            playlist: None,
            published: None,
            publish_error: None,
            cancelled: false,
        }
    }

    /// Tracks that ended up in the catalog playlist. After a partial
    /// publish this is the number appended before it stopped.
    pub fn published_count(&self) -> usize {
        match (&self.published, &self.publish_error) {
            (Some(outcome), _) => outcome.added + outcome.already_present,
            (None, Some(PipelineError::PlaylistPublishPartial { added, .. })) => *added,
            (None, _) => 0,
        }
    }

    /// `false` when publishing stopped partway and a re-run is needed.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.publish_error.is_none()
    }
}

/// Wires the stages together over injected services.
pub struct DiscoveryPipeline {
    history: Arc<dyn HistorySource>,
    neighbours: Arc<dyn NeighbourSource>,
    catalog: Arc<dyn CatalogService>,
    policy: RetryPolicy,
    public: bool,
    cancel: CancellationToken,
    events: broadcast::Sender<PipelineEvent>,
}

impl fmt::Debug for DiscoveryPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryPipeline")
            .field("policy", &self.policy)
            .field("public", &self.public)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl DiscoveryPipeline {
    pub fn new(
        history: Arc<dyn HistorySource>,
        neighbours: Arc<dyn NeighbourSource>,
        catalog: Arc<dyn CatalogService>,
        policy: RetryPolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            history,
            neighbours,
            catalog,
            policy,
            public: true,
            cancel: CancellationToken::new(),
            events,
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_public_playlist(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    /// Token that aborts the run between pages, neighbours and searches.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Receive progress events. Subscribe before calling [`run`](Self::run).
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine.
        self.events.send(event).ok();
    }

    fn started(&self, stage: Stage) {
        log::info!("Stage {}/{}: {}", stage.number(), Stage::COUNT, stage);
        self.emit(PipelineEvent::StageStarted { stage });
    }

    fn completed(&self, stage: Stage, summary: String) {
        log::info!("Stage {} complete: {}", stage, summary);
        self.emit(PipelineEvent::StageCompleted { stage, summary });
    }

    fn skipped(&self, stage: Stage, reason: &str) {
        log::info!("Stage {} skipped: {}", stage, reason);
        self.emit(PipelineEvent::StageSkipped {
            stage,
            reason: reason.to_string(),
        });
    }

    fn collector(&self) -> HistoryCollector {
        let events = self.events.clone();
        HistoryCollector::new(Arc::clone(&self.history), self.policy)
            .with_cancellation(self.cancel.clone())
            .with_progress(move |tick| {
                events.send(PipelineEvent::PageFetched(tick.clone())).ok();
            })
    }

    /// Execute a full run.
    ///
    /// Fatal errors (no neighbours, rejected credentials, own history
    /// unavailable) are returned as `Err`. A neighbour whose history cannot
    /// be fetched is skipped and listed in the report. A publish that stops
    /// partway yields `Ok` with `publish_error` set, so the counts survive.
    /// Cancellation yields `Ok` with `cancelled` set and nothing published.
    pub async fn run(&self, settings: &DiscoverySettings) -> PipelineResult<RunReport> {
        let mut report = RunReport::new(settings);
        let listener = &settings.listener;

        // Neighbours
        self.started(Stage::Neighbours);
        let neighbours = NeighbourResolver::new(Arc::clone(&self.neighbours), self.policy)
            .resolve(listener, settings.neighbour_count)
            .await?;
        self.completed(
            Stage::Neighbours,
            format!("{} of {} neighbours", neighbours.len(), settings.neighbour_count),
        );
        if self.cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        // Own history
        self.started(Stage::OwnHistory);
        let collector = self.collector();
        let own = match collector.collect_all(listener, settings.self_since).await {
            Ok(records) => records,
            Err(PipelineError::Cancelled) => {
                report.cancelled = true;
                return Ok(report);
            }
            Err(e) => return Err(e),
        };
        report.own_plays = own.len();
        let exclusion: HashSet<TrackKey> = own.iter().map(|record| record.key()).collect();
        self.completed(
            Stage::OwnHistory,
            format!("{} plays, {} distinct tracks", own.len(), exclusion.len()),
        );
        drop(own);

        // Neighbour histories, merged one whole neighbour at a time
        self.started(Stage::NeighbourHistories);
        let mut engine = DiscoveryEngine::new(exclusion);
        let since = settings.neighbour_since;
        let collector = &collector;
        let mut fetches = stream::iter(neighbours)
            .map(|neighbour| async move {
                let history = collector.collect_all(&neighbour.listener, since).await;
                (neighbour, history)
            })
            .buffered(settings.workers.max(1));

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                next = fetches.next() => next,
            };
            let Some((neighbour, history)) = next else {
                break;
            };
            match history {
                Ok(records) => {
                    let added = engine.absorb(&neighbour, &records);
                    log::debug!(
                        "{} (rank {}): {} plays, {} new candidates",
                        neighbour.listener,
                        neighbour.rank,
                        records.len(),
                        added
                    );
                    report.neighbour_plays += records.len();
                    report.neighbours_used.push(neighbour);
                }
                Err(PipelineError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) if !e.is_fatal() => {
                    log::warn!("Skipping neighbour {}: {}", neighbour.listener, e);
                    self.emit(PipelineEvent::NeighbourFailed {
                        listener: neighbour.listener.clone(),
                        error: e.to_string(),
                    });
                    report.neighbours_failed.push((neighbour.listener, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }
        drop(fetches);
        self.completed(
            Stage::NeighbourHistories,
            format!(
                "{} used, {} failed, {} plays",
                report.neighbours_used.len(),
                report.neighbours_failed.len(),
                report.neighbour_plays
            ),
        );

        // Discover
        self.started(Stage::Discover);
        let mut candidates = engine.finish();
        order_candidates(&mut candidates, settings.order_by, &mut rand::thread_rng());
        self.completed(Stage::Discover, format!("{} candidates", candidates.len()));
        report.candidates = candidates;

        if report.cancelled {
            return Ok(report);
        }
        if report.neighbours_used.is_empty() {
            return Err(PipelineError::NoNeighboursFound {
                listener: listener.clone(),
                reason: "no neighbour history could be fetched".to_string(),
            });
        }

        // Match
        self.started(Stage::Match);
        let matcher = CatalogMatcher::new(Arc::clone(&self.catalog), self.policy);
        let matches = matcher
            .match_all(
                report.candidates.clone(),
                settings.max_tracks,
                settings.search_workers,
                &self.cancel,
            )
            .await?;
        report.matched = matches.matched_count();
        report.unmatched = matches.unmatched().cloned().collect();
        report.not_searched = matches.not_searched;
        report.cancelled = matches.cancelled;
        self.completed(
            Stage::Match,
            format!(
                "{} matched, {} unmatched, {} failed",
                report.matched,
                report.unmatched.len(),
                matches.failed.len()
            ),
        );
        report.failed_searches = matches.failed;
        if report.cancelled {
            return Ok(report);
        }

        let playlist = assemble(
            matches.tracks,
            settings.order_by,
            settings.max_tracks,
            settings.playlist_name.clone(),
        )
        .with_description(playlist_description(listener, report.neighbours_used.len()));

        // Publish
        if settings.dry_run {
            self.skipped(Stage::Publish, "dry run");
        } else if playlist.is_empty() {
            self.skipped(Stage::Publish, "no matched tracks");
        } else {
            self.started(Stage::Publish);
            let publisher = PlaylistPublisher::new(Arc::clone(&self.catalog), self.policy)
                .with_public(self.public);
            match publisher.publish(&playlist).await {
                Ok(outcome) => {
                    self.completed(
                        Stage::Publish,
                        format!(
                            "{} added, {} already present",
                            outcome.added, outcome.already_present
                        ),
                    );
                    report.published = Some(outcome);
                }
                Err(e @ PipelineError::PlaylistPublishPartial { .. }) => {
                    log::error!("Stage {} failed: {}", Stage::Publish, e);
                    self.emit(PipelineEvent::StageFailed {
                        stage: Stage::Publish,
                        error: e.to_string(),
                    });
                    report.publish_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        report.playlist = Some(playlist);

        Ok(report)
    }
}
