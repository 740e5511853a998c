//! Last.fm listening-history and neighbour source.
//!
//! Scrobble history comes from the `user.getRecentTracks` API method.
//! Neighbours are no longer exposed by the API, so they are scraped from
//! the public `/user/<name>/neighbours` page.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use serde::Deserialize;

use discovery_core::{Listener, PlayRecord};

use crate::error::{SourceError, SourceResult};
use crate::resilience::RateLimiter;
use crate::sources::{HistoryPage, HistorySource, NeighbourSource, RawNeighbour};

const LASTFM_API_BASE: &str = "https://ws.audioscrobbler.com/2.0/";
const LASTFM_WEB_BASE: &str = "https://www.last.fm";
const SOURCE_NAME: &str = "Last.fm";

/// Maximum page size accepted by `user.getRecentTracks`.
const PAGE_SIZE: u32 = 200;

// ---------------------------------------------------------------------------
// API response types (private -- Last.fm nests JSON awkwardly)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RecentTracksResponse {
    recenttracks: RecentTracks,
}

#[derive(Debug, Deserialize)]
struct RecentTracks {
    #[serde(default)]
    track: OneOrMany<RecentTrack>,
    #[serde(rename = "@attr")]
    attr: Option<PageAttr>,
}

/// Last.fm collapses single-element arrays into a bare object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Many(items) => items,
            Self::One(item) => vec![item],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageAttr {
    #[serde(default)]
    page: String,
    #[serde(default)]
    total_pages: String,
}

#[derive(Debug, Deserialize)]
struct RecentTrack {
    artist: TextField,
    name: String,
    date: Option<UtsDate>,
    #[serde(rename = "@attr")]
    attr: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct TextField {
    #[serde(rename = "#text", default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct UtsDate {
    uts: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: u32,
    #[serde(default)]
    message: String,
}

impl RecentTrack {
    fn is_now_playing(&self) -> bool {
        self.attr
            .as_ref()
            .and_then(|attr| attr.get("nowplaying"))
            .is_some_and(|value| value == "true")
    }

    /// Convert to a play record; the "now playing" entry has no timestamp
    /// and is skipped.
    fn into_record(self) -> Option<PlayRecord> {
        if self.is_now_playing() {
            return None;
        }
        let secs: i64 = self.date?.uts.parse().ok()?;
        let timestamp = DateTime::<Utc>::from_timestamp(secs, 0)?;
        let artist = self.artist.text.trim();
        let title = self.name.trim();
        if artist.is_empty() || title.is_empty() {
            return None;
        }
        Some(PlayRecord::new(artist, title, timestamp))
    }
}

fn parse_recent_tracks(body: &str, requested_page: u32) -> SourceResult<HistoryPage> {
    let response: RecentTracksResponse =
        serde_json::from_str(body).map_err(|e| SourceError::Parse {
            source_name: SOURCE_NAME.to_string(),
            message: e.to_string(),
        })?;

    let (page, reported_total) = response
        .recenttracks
        .attr
        .map(|attr| {
            (
                attr.page.parse().unwrap_or(requested_page),
                attr.total_pages.parse().ok(),
            )
        })
        .unwrap_or((requested_page, None));

    let tracks = response.recenttracks.track.into_vec();
    let scrobbles = tracks.iter().filter(|t| !t.is_now_playing()).count();
    // Without a page count, a short page is the last one.
    let total_pages = reported_total.or_else(|| (scrobbles < PAGE_SIZE as usize).then_some(page));

    let records = tracks
        .into_iter()
        .filter_map(RecentTrack::into_record)
        .collect();

    Ok(HistoryPage {
        records,
        page,
        total_pages,
    })
}

/// Map a Last.fm API error code onto our taxonomy.
fn classify_api_error(code: u32, message: String, entity: &str) -> SourceError {
    let source_name = SOURCE_NAME.to_string();
    match code {
        // Invalid parameters: almost always an unknown user.
        6 => SourceError::NotFound {
            entity: entity.to_string(),
            source_name,
        },
        // Authentication failed, invalid session, invalid API key, token
        // errors, suspended key.
        4 | 9 | 10 | 14 | 26 => SourceError::Unauthorized {
            source_name,
            message,
        },
        // Operation failed, service offline, temporarily unavailable.
        8 | 11 | 16 => SourceError::Http {
            source_name,
            message,
        },
        29 => SourceError::RateLimited {
            source_name,
            retry_after: None,
        },
        _ => SourceError::Rejected {
            source_name,
            message: format!("error {code}: {message}"),
        },
    }
}

fn classify_status(status: StatusCode, entity: &str) -> SourceError {
    let source_name = SOURCE_NAME.to_string();
    match status {
        StatusCode::NOT_FOUND => SourceError::NotFound {
            entity: entity.to_string(),
            source_name,
        },
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited {
            source_name,
            retry_after: None,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Unauthorized {
            source_name,
            message: status.to_string(),
        },
        s if s.is_server_error() => SourceError::Http {
            source_name,
            message: s.to_string(),
        },
        s => SourceError::Rejected {
            source_name,
            message: s.to_string(),
        },
    }
}

/// Extract neighbour user names from the neighbours page.
///
/// Any anchor pointing at a bare profile (`/user/<name>`) counts. Ranks are
/// assigned by first appearance, so repeated links to the same profile
/// (avatar plus name) share a rank.
pub fn parse_neighbours(html: &str) -> SourceResult<Vec<RawNeighbour>> {
    let profile = Regex::new(r"^/user/([^/?#]+)/?$").map_err(|e| SourceError::Parse {
        source_name: SOURCE_NAME.to_string(),
        message: e.to_string(),
    })?;
    let anchors = Selector::parse("a[href]").map_err(|e| SourceError::Parse {
        source_name: SOURCE_NAME.to_string(),
        message: format!("{e:?}"),
    })?;

    let document = Html::parse_document(html);
    let mut ranks: HashMap<String, u32> = HashMap::new();
    let mut found = Vec::new();

    for anchor in document.select(&anchors) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(name) = profile.captures(href).and_then(|c| c.get(1)) else {
            continue;
        };
        let name = name.as_str().to_string();
        let next_rank = u32::try_from(ranks.len() + 1).unwrap_or(u32::MAX);
        let rank = *ranks.entry(name.to_lowercase()).or_insert(next_rank);
        found.push(RawNeighbour::new(name, rank));
    }

    Ok(found)
}

/// Last.fm client.
///
/// Wraps an HTTP client, an API key, and a rate limiter. The Last.fm API
/// allows up to 5 requests per second for non-commercial use; the limiter
/// is shared by clones so parallel neighbour fetches stay within it.
#[derive(Debug, Clone)]
pub struct LastFmClient {
    http: Client,
    api_key: String,
    api_base: String,
    web_base: String,
    rate_limiter: RateLimiter,
}

impl LastFmClient {
    /// Create a new Last.fm client.
    ///
    /// The `api_key` must be a valid Last.fm API key obtained from
    /// <https://www.last.fm/api/account/create>.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_key: String) -> SourceResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("discovery-fm/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            api_key,
            api_base: LASTFM_API_BASE.to_string(),
            web_base: LASTFM_WEB_BASE.to_string(),
            rate_limiter: RateLimiter::new(5),
        })
    }

    /// Point the client at different API and website hosts.
    #[must_use]
    pub fn with_base_urls(
        mut self,
        api_base: impl Into<String>,
        web_base: impl Into<String>,
    ) -> Self {
        self.api_base = api_base.into();
        self.web_base = web_base.into();
        self
    }

    /// Fetch one page of `user.getRecentTracks`.
    pub async fn get_recent_tracks(
        &self,
        user: &str,
        from: DateTime<Utc>,
        page: u32,
    ) -> SourceResult<HistoryPage> {
        self.rate_limiter.acquire().await;

        let from = from.timestamp().max(0).to_string();
        let page_str = page.to_string();
        let limit = PAGE_SIZE.to_string();

        let response = self
            .http
            .get(&self.api_base)
            .query(&[
                ("method", "user.getRecentTracks"),
                ("user", user),
                ("from", from.as_str()),
                ("page", page_str.as_str()),
                ("limit", limit.as_str()),
                ("api_key", self.api_key.as_str()),
                ("format", "json"),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let entity = format!("user {user}");

        // Last.fm reports errors in the body, sometimes with a 200 status.
        if let Ok(err) = serde_json::from_str::<ApiErrorBody>(&body) {
            return Err(classify_api_error(err.error, err.message, &entity));
        }
        if !status.is_success() {
            return Err(classify_status(status, &entity));
        }

        parse_recent_tracks(&body, page)
    }

    /// Fetch and parse the neighbours page for `user`.
    pub async fn get_neighbours(&self, user: &str) -> SourceResult<Vec<RawNeighbour>> {
        self.rate_limiter.acquire().await;

        let url = format!("{}/user/{}/neighbours", self.web_base.trim_end_matches('/'), user);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, &format!("neighbours of {user}")));
        }

        let body = response.text().await?;
        parse_neighbours(&body)
    }
}

#[async_trait]
impl HistorySource for LastFmClient {
    async fn fetch_page(
        &self,
        listener: &Listener,
        since: DateTime<Utc>,
        page: u32,
    ) -> SourceResult<HistoryPage> {
        self.get_recent_tracks(listener.as_str(), since, page).await
    }
}

#[async_trait]
impl NeighbourSource for LastFmClient {
    async fn raw_neighbours(&self, listener: &Listener) -> SourceResult<Vec<RawNeighbour>> {
        self.get_neighbours(listener.as_str()).await
    }
}
