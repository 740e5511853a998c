//! In-memory service doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use discovery_core::model::normalize;
use discovery_core::{Listener, PlayRecord};
use discovery_pipeline::sources::{
    CatalogService, CatalogTrack, HistoryPage, HistorySource, NeighbourSource, PlaylistHandle,
    RawNeighbour, SearchQuery,
};
use discovery_pipeline::{RetryPolicy, SourceError, SourceResult};
use tokio_util::sync::CancellationToken;

/// Fixed "now" so histories and cutoffs are reproducible.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Fast policy for tests: two attempts, millisecond backoff.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        min_delay: std::time::Duration::from_millis(1),
        max_delay: std::time::Duration::from_millis(2),
        factor: 2.0,
        timeout: std::time::Duration::from_secs(2),
    }
}

/// Plays of `(artist, title)`, most recent first, one hour apart.
pub fn plays(tracks: &[(&str, &str)]) -> Vec<PlayRecord> {
    tracks
        .iter()
        .enumerate()
        .map(|(i, (artist, title))| {
            PlayRecord::new(*artist, *title, now() - Duration::hours(i as i64 + 1))
        })
        .collect()
}

/// Paged listening histories keyed by lower-cased listener name.
pub struct FakeHistory {
    histories: HashMap<String, Vec<PlayRecord>>,
    failing: HashSet<String>,
    latency: HashMap<String, std::time::Duration>,
    page_size: usize,
    pages_served: AtomicUsize,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl FakeHistory {
    pub fn new(page_size: usize) -> Self {
        Self {
            histories: HashMap::new(),
            failing: HashSet::new(),
            latency: HashMap::new(),
            page_size,
            pages_served: AtomicUsize::new(0),
            cancel_after: None,
        }
    }

    pub fn with(mut self, listener: &str, records: Vec<PlayRecord>) -> Self {
        self.histories.insert(listener.to_lowercase(), records);
        self
    }

    /// Every page request for `listener` fails with a transient error.
    pub fn failing(mut self, listener: &str) -> Self {
        self.failing.insert(listener.to_lowercase());
        self
    }

    /// Every page for `listener` takes `millis` to arrive.
    pub fn slow(mut self, listener: &str, millis: u64) -> Self {
        self.latency
            .insert(listener.to_lowercase(), std::time::Duration::from_millis(millis));
        self
    }

    /// Fire `token` once `pages` pages have been served.
    pub fn cancel_after(mut self, pages: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((pages, token));
        self
    }

    pub fn pages_served(&self) -> usize {
        self.pages_served.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistorySource for FakeHistory {
    async fn fetch_page(
        &self,
        listener: &Listener,
        _since: DateTime<Utc>,
        page: u32,
    ) -> SourceResult<HistoryPage> {
        let key = listener.as_str().to_lowercase();
        if let Some(latency) = self.latency.get(&key) {
            tokio::time::sleep(*latency).await;
        }
        if self.failing.contains(&key) {
            return Err(SourceError::Http {
                source_name: "fake history".to_string(),
                message: "503 Service Unavailable".to_string(),
            });
        }

        let records = self.histories.get(&key).cloned().unwrap_or_default();
        let total_pages = records.len().div_ceil(self.page_size).max(1) as u32;
        let start = (page as usize - 1) * self.page_size;
        let records = records
            .into_iter()
            .skip(start)
            .take(self.page_size)
            .collect();

        let served = self.pages_served.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if served >= *after {
                token.cancel();
            }
        }

        Ok(HistoryPage {
            records,
            page,
            total_pages: Some(total_pages),
        })
    }
}

/// A fixed neighbour listing.
pub struct FakeNeighbours(pub Vec<RawNeighbour>);

impl FakeNeighbours {
    /// Neighbours ranked in the order given.
    pub fn ranked(names: &[&str]) -> Self {
        Self(
            names
                .iter()
                .enumerate()
                .map(|(i, name)| RawNeighbour::new(*name, i as u32 + 1))
                .collect(),
        )
    }
}

#[async_trait]
impl NeighbourSource for FakeNeighbours {
    async fn raw_neighbours(&self, _listener: &Listener) -> SourceResult<Vec<RawNeighbour>> {
        Ok(self.0.clone())
    }
}

/// A deterministic catalog with one user's playlists.
#[derive(Default)]
pub struct FakeCatalog {
    tracks: Vec<CatalogTrack>,
    playlists: Mutex<HashMap<String, (String, Vec<String>)>>,
    searches: AtomicUsize,
    batch_size: Option<usize>,
    /// Number of append calls accepted before appends start failing.
    adds_before_failure: Option<usize>,
    adds: AtomicUsize,
}

impl FakeCatalog {
    /// Catalog where every `(artist, title)` resolves to `id`.
    pub fn with_tracks(tracks: &[(&str, &str, &str)]) -> Self {
        Self {
            tracks: tracks
                .iter()
                .map(|(id, artist, title)| CatalogTrack {
                    id: (*id).to_string(),
                    title: (*title).to_string(),
                    artists: vec![(*artist).to_string()],
                })
                .collect(),
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Accept `batches` append calls, then fail every later one with a 500.
    pub fn failing_adds_after(mut self, batches: usize) -> Self {
        self.adds_before_failure = Some(batches);
        self
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    /// Track ids of the playlist called `name`, if it exists.
    pub fn playlist(&self, name: &str) -> Option<Vec<String>> {
        self.playlists
            .lock()
            .unwrap()
            .get(name)
            .map(|(_, ids)| ids.clone())
    }

    pub fn playlist_count(&self) -> usize {
        self.playlists.lock().unwrap().len()
    }
}

#[async_trait]
impl CatalogService for FakeCatalog {
    async fn search_tracks(
        &self,
        query: &SearchQuery,
        _limit: u32,
    ) -> SourceResult<Vec<CatalogTrack>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let SearchQuery::Fielded { artist, title } = query else {
            return Ok(Vec::new());
        };
        Ok(self
            .tracks
            .iter()
            .filter(|t| {
                normalize(&t.title) == normalize(title)
                    && t.artists.iter().any(|a| normalize(a) == normalize(artist))
            })
            .cloned()
            .collect())
    }

    async fn ensure_playlist(
        &self,
        name: &str,
        _description: &str,
        _public: bool,
    ) -> SourceResult<PlaylistHandle> {
        let mut playlists = self.playlists.lock().unwrap();
        let next_id = format!("pl{}", playlists.len() + 1);
        let created = !playlists.contains_key(name);
        let (id, _) = playlists
            .entry(name.to_string())
            .or_insert_with(|| (next_id, Vec::new()));
        Ok(PlaylistHandle {
            id: id.clone(),
            url: None,
            created,
        })
    }

    async fn playlist_track_ids(&self, playlist_id: &str) -> SourceResult<Vec<String>> {
        let playlists = self.playlists.lock().unwrap();
        playlists
            .values()
            .find(|(id, _)| id == playlist_id)
            .map(|(_, ids)| ids.clone())
            .ok_or_else(|| SourceError::NotFound {
                entity: playlist_id.to_string(),
                source_name: "fake catalog".to_string(),
            })
    }

    async fn add_tracks(&self, playlist_id: &str, ids: &[String]) -> SourceResult<()> {
        let call = self.adds.fetch_add(1, Ordering::SeqCst);
        if self.adds_before_failure.is_some_and(|allowed| call >= allowed) {
            return Err(SourceError::Http {
                source_name: "fake catalog".to_string(),
                message: "500 Internal Server Error".to_string(),
            });
        }
        let mut playlists = self.playlists.lock().unwrap();
        let entry = playlists
            .values_mut()
            .find(|(id, _)| id == playlist_id)
            .ok_or_else(|| SourceError::NotFound {
                entity: playlist_id.to_string(),
                source_name: "fake catalog".to_string(),
            })?;
        entry.1.extend_from_slice(ids);
        Ok(())
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size.unwrap_or(100)
    }
}
