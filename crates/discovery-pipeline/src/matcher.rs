//! Catalog matching.
//!
//! Resolves discovery candidates against the target catalog's search index.
//! A candidate either matches with high confidence, is reported as an
//! explicit no-match, or is reported as failed when the catalog kept
//! erroring. Low-confidence hits are never substituted.

use std::collections::HashSet;
use std::sync::Arc;

use discovery_core::model::normalize;
use discovery_core::{DiscoveryCandidate, MatchedTrack, TrackKey};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, PipelineResult};
use crate::resilience::RetryPolicy;
use crate::sources::{CatalogService, CatalogTrack, SearchQuery};

/// Results requested per search query.
pub const DEFAULT_SEARCH_LIMIT: u32 = 10;

/// Result of matching a single candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Catalog id of the accepted track.
    Matched(String),
    /// The catalog has nothing acceptable for this candidate.
    NoMatch,
    /// Searching kept failing; carries the last error.
    Failed(String),
}

/// Everything [`CatalogMatcher::match_all`] learned, in candidate order.
#[derive(Debug, Clone, Default)]
pub struct MatchReport {
    /// Every searched candidate, with `catalog_id` set when matched.
    pub tracks: Vec<MatchedTrack>,
    /// Candidates whose search failed, with the reason.
    pub failed: Vec<(TrackKey, String)>,
    /// Candidates never searched because the limit was reached or the run
    /// was cancelled.
    pub not_searched: usize,
    pub cancelled: bool,
}

impl MatchReport {
    pub fn matched_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_matched()).count()
    }

    /// Candidates that were searched and explicitly did not match.
    pub fn unmatched(&self) -> impl Iterator<Item = &DiscoveryCandidate> {
        self.tracks
            .iter()
            .filter(|t| !t.is_matched())
            .map(|t| &t.candidate)
    }

    pub fn unmatched_count(&self) -> usize {
        self.unmatched().count()
    }
}

/// Picks the best acceptable track from one result list.
///
/// An exact artist and title match anywhere in the list wins. Failing that,
/// the top result is accepted when its title matches, tolerating credit
/// differences such as featured artists.
pub fn select_match<'a>(
    results: &'a [CatalogTrack],
    artist: &str,
    title: &str,
) -> Option<&'a CatalogTrack> {
    let want_artist = normalize(artist);
    let want_title = normalize(title);

    results
        .iter()
        .find(|track| {
            normalize(&track.title) == want_title
                && track.artists.iter().any(|a| normalize(a) == want_artist)
        })
        .or_else(|| {
            results
                .first()
                .filter(|top| normalize(&top.title) == want_title)
        })
}

/// Matches candidates against a [`CatalogService`].
#[derive(Clone)]
pub struct CatalogMatcher {
    catalog: Arc<dyn CatalogService>,
    policy: RetryPolicy,
    search_limit: u32,
}

impl std::fmt::Debug for CatalogMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogMatcher")
            .field("policy", &self.policy)
            .field("search_limit", &self.search_limit)
            .finish_non_exhaustive()
    }
}

impl CatalogMatcher {
    pub fn new(catalog: Arc<dyn CatalogService>, policy: RetryPolicy) -> Self {
        Self {
            catalog,
            policy,
            search_limit: DEFAULT_SEARCH_LIMIT,
        }
    }

    #[must_use]
    pub fn with_search_limit(mut self, limit: u32) -> Self {
        self.search_limit = limit.max(1);
        self
    }

    /// Runs one query. The inner `Err` carries the last error once retries
    /// are exhausted; not-found reads as an empty result list.
    async fn search(
        &self,
        query: &SearchQuery,
        key: &TrackKey,
    ) -> PipelineResult<Result<Vec<CatalogTrack>, String>> {
        let operation = format!("catalog search '{query}'");
        match self
            .policy
            .run(&operation, || self.catalog.search_tracks(query, self.search_limit))
            .await
        {
            Ok(results) => Ok(Ok(results)),
            Err(failure) if failure.error.is_not_found() => Ok(Ok(Vec::new())),
            Err(failure) if failure.error.is_auth() => Err(PipelineError::CatalogAuthExpired {
                context: format!("searching for {key}"),
            }),
            Err(failure) => Ok(Err(format!(
                "{} (after {} attempt(s))",
                failure.error, failure.attempts
            ))),
        }
    }

    /// Match a single candidate.
    ///
    /// Tries a field-qualified query first and falls back to free text.
    /// Only [`PipelineError::CatalogAuthExpired`] is returned as an error.
    pub async fn match_candidate(
        &self,
        candidate: &DiscoveryCandidate,
    ) -> PipelineResult<MatchOutcome> {
        let artist = candidate.artist();
        let title = candidate.title();
        let queries = [
            SearchQuery::Fielded {
                artist: artist.to_string(),
                title: title.to_string(),
            },
            SearchQuery::FreeText(format!("{artist} {title}")),
        ];

        let mut last_failure = None;
        for query in &queries {
            match self.search(query, candidate.key()).await? {
                Ok(results) => {
                    if let Some(track) = select_match(&results, artist, title) {
                        log::debug!("Matched {} to {}", candidate.key(), track.id);
                        return Ok(MatchOutcome::Matched(track.id.clone()));
                    }
                }
                Err(message) => last_failure = Some(message),
            }
        }

        Ok(match last_failure {
            Some(message) => {
                log::warn!("Search for {} failed: {}", candidate.key(), message);
                MatchOutcome::Failed(message)
            }
            None => MatchOutcome::NoMatch,
        })
    }

    /// Match candidates in order with up to `workers` searches in flight.
    ///
    /// Stops once `limit` distinct catalog ids have matched or `cancel`
    /// fires; the remainder is counted as not searched. An expired catalog
    /// authorization aborts the whole batch.
    pub async fn match_all(
        &self,
        candidates: Vec<DiscoveryCandidate>,
        limit: usize,
        workers: usize,
        cancel: &CancellationToken,
    ) -> PipelineResult<MatchReport> {
        let total = candidates.len();
        let mut report = MatchReport::default();
        let mut distinct_ids = HashSet::new();

        if limit == 0 {
            report.not_searched = total;
            return Ok(report);
        }

        let mut searches = stream::iter(candidates)
            .map(|candidate| async move {
                let outcome = self.match_candidate(&candidate).await;
                (candidate, outcome)
            })
            .buffered(workers.max(1));

        let mut processed = 0;
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                next = searches.next() => next,
            };
            let Some((candidate, outcome)) = next else {
                break;
            };
            processed += 1;

            match outcome? {
                MatchOutcome::Matched(id) => {
                    distinct_ids.insert(id.clone());
                    report.tracks.push(MatchedTrack::new(candidate, Some(id)));
                }
                MatchOutcome::NoMatch => report.tracks.push(MatchedTrack::unmatched(candidate)),
                MatchOutcome::Failed(message) => {
                    report.failed.push((candidate.key().clone(), message));
                }
            }

            if processed % 100 == 0 {
                log::info!(
                    "Searched {}/{} candidates, {} matched",
                    processed,
                    total,
                    distinct_ids.len()
                );
            }
            if distinct_ids.len() >= limit {
                log::info!("Reached {} matched tracks; stopping search", limit);
                break;
            }
        }

        report.not_searched = total - processed;
        Ok(report)
    }
}
