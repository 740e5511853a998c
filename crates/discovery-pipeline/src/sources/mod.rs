//! External service interfaces.
//!
//! Each backing service is modelled as an explicit trait with the handful
//! of operations the pipeline needs. The real implementations live in
//! [`lastfm`] and [`spotify`]; tests inject in-memory doubles.

pub mod lastfm;
pub mod spotify;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use discovery_core::{Listener, PlayRecord};

use crate::error::SourceResult;

pub use lastfm::LastFmClient;
pub use spotify::SpotifyClient;

/// One page of a listener's history, most recent plays first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryPage {
    pub records: Vec<PlayRecord>,
    /// 1-based page number this page answers.
    pub page: u32,
    /// Total pages for the requested window, when the source reports it.
    /// `None` means keep paging until an empty page.
    pub total_pages: Option<u32>,
}

/// Paginated read access to listening histories.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetch page `page` (1-based) of plays newer than `since`.
    ///
    /// `since` is a hint to the source; the collector enforces it.
    async fn fetch_page(
        &self,
        listener: &Listener,
        since: DateTime<Utc>,
        page: u32,
    ) -> SourceResult<HistoryPage>;
}

/// A neighbour entry as found in the raw listing, before clean-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNeighbour {
    pub name: String,
    pub rank: u32,
}

impl RawNeighbour {
    pub fn new(name: impl Into<String>, rank: u32) -> Self {
        Self {
            name: name.into(),
            rank,
        }
    }
}

/// A listing of taste-similar listeners.
#[async_trait]
pub trait NeighbourSource: Send + Sync {
    /// Raw neighbour entries for `listener`. May contain duplicates and the
    /// listener themselves.
    async fn raw_neighbours(&self, listener: &Listener) -> SourceResult<Vec<RawNeighbour>>;
}

/// A catalog search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    /// Field-qualified search on artist and track title.
    Fielded { artist: String, title: String },
    /// Unqualified text search.
    FreeText(String),
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fielded { artist, title } => write!(f, "artist:{artist} track:{title}"),
            Self::FreeText(text) => f.write_str(text),
        }
    }
}

/// A track as returned by the catalog's search index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTrack {
    /// Identifier accepted by [`CatalogService::add_tracks`].
    pub id: String,
    pub title: String,
    pub artists: Vec<String>,
}

/// A playlist that exists in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistHandle {
    pub id: String,
    pub url: Option<String>,
    /// `false` when an existing playlist with the same name was reused.
    pub created: bool,
}

/// Search and playlist operations on the target catalog.
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Search for tracks, best results first.
    async fn search_tracks(&self, query: &SearchQuery, limit: u32)
        -> SourceResult<Vec<CatalogTrack>>;

    /// Return the user's playlist called `name`, creating it if needed.
    async fn ensure_playlist(
        &self,
        name: &str,
        description: &str,
        public: bool,
    ) -> SourceResult<PlaylistHandle>;

    /// Track ids already in the playlist.
    async fn playlist_track_ids(&self, playlist_id: &str) -> SourceResult<Vec<String>>;

    /// Append `ids` to the playlist. `ids.len()` never exceeds
    /// [`max_batch_size`](CatalogService::max_batch_size).
    async fn add_tracks(&self, playlist_id: &str, ids: &[String]) -> SourceResult<()>;

    fn max_batch_size(&self) -> usize {
        100
    }
}
