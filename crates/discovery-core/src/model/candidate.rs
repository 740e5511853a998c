use serde::{Deserialize, Serialize};

use crate::model::track::TrackKey;

/// A track heard by at least one neighbour but not by the target listener.
///
/// Only [`DiscoveryEngine`](crate::engine::DiscoveryEngine) creates or
/// updates candidates; everything downstream reads them through accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryCandidate {
    key: TrackKey,
    artist: String,
    title: String,
    support_count: u32,
    first_seen_rank: u32,
}

impl DiscoveryCandidate {
    pub(crate) fn new(key: TrackKey, artist: &str, title: &str, rank: u32) -> Self {
        Self {
            key,
            artist: artist.trim().to_string(),
            title: title.trim().to_string(),
            support_count: 1,
            first_seen_rank: rank,
        }
    }

    pub(crate) fn add_support(&mut self, rank: u32) {
        self.support_count += 1;
        self.first_seen_rank = self.first_seen_rank.min(rank);
    }

    #[must_use]
    pub fn key(&self) -> &TrackKey {
        &self.key
    }

    /// Artist as first spelled by a neighbour (used for catalog queries).
    #[must_use]
    pub fn artist(&self) -> &str {
        &self.artist
    }

    /// Title as first spelled by a neighbour (used for catalog queries).
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Number of distinct neighbours whose history contains this track.
    #[must_use]
    pub fn support_count(&self) -> u32 {
        self.support_count
    }

    /// Best (lowest) rank among the neighbours that contributed.
    #[must_use]
    pub fn first_seen_rank(&self) -> u32 {
        self.first_seen_rank
    }
}

/// A candidate paired with the catalog result it resolved to, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedTrack {
    pub candidate: DiscoveryCandidate,
    pub catalog_id: Option<String>,
}

impl MatchedTrack {
    #[must_use]
    pub fn new(candidate: DiscoveryCandidate, catalog_id: Option<String>) -> Self {
        Self {
            candidate,
            catalog_id,
        }
    }

    #[must_use]
    pub fn unmatched(candidate: DiscoveryCandidate) -> Self {
        Self::new(candidate, None)
    }

    #[must_use]
    pub fn is_matched(&self) -> bool {
        self.catalog_id.is_some()
    }
}
