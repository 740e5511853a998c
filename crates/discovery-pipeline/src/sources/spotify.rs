//! Spotify Web API catalog.
//!
//! Implements [`CatalogService`] on top of the search, user-playlist and
//! playlist-items endpoints. The client is handed an already-issued bearer
//! token; an expired token surfaces as [`SourceError::Unauthorized`] and is
//! never refreshed here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::error::{SourceError, SourceResult};
use crate::resilience::RateLimiter;
use crate::sources::{CatalogService, CatalogTrack, PlaylistHandle, SearchQuery};

const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";
const SOURCE_NAME: &str = "Spotify";

/// Spotify accepts at most 100 URIs per add-items call.
const MAX_BATCH: usize = 100;

/// Upper bound on playlist listing pages walked when looking for an
/// existing playlist (50 playlists per page).
const MAX_PLAYLIST_PAGES: usize = 40;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CurrentUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: Option<Paging<SpotifyTrack>>,
}

#[derive(Debug, Deserialize)]
struct Paging<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    uri: String,
    name: String,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SimplifiedPlaylist {
    id: String,
    name: String,
    owner: PlaylistOwner,
    #[serde(default)]
    external_urls: ExternalUrls,
}

#[derive(Debug, Deserialize)]
struct PlaylistOwner {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedPlaylist {
    id: String,
    #[serde(default)]
    external_urls: ExternalUrls,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<ItemTrack>,
}

#[derive(Debug, Deserialize)]
struct ItemTrack {
    uri: Option<String>,
}

impl From<SpotifyTrack> for CatalogTrack {
    fn from(track: SpotifyTrack) -> Self {
        Self {
            id: track.uri,
            title: track.name,
            artists: track.artists.into_iter().map(|a| a.name).collect(),
        }
    }
}

fn parse_error(e: &impl std::fmt::Display) -> SourceError {
    SourceError::Parse {
        source_name: SOURCE_NAME.to_string(),
        message: e.to_string(),
    }
}

/// Map a non-success response onto our taxonomy.
async fn classify(response: Response, entity: &str) -> SourceError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    let source_name = SOURCE_NAME.to_string();

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Unauthorized {
            source_name,
            message: format!("{status}: {body}"),
        },
        StatusCode::NOT_FOUND => SourceError::NotFound {
            entity: entity.to_string(),
            source_name,
        },
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited {
            source_name,
            retry_after,
        },
        s if s.is_server_error() => SourceError::Http {
            source_name,
            message: s.to_string(),
        },
        s => SourceError::Rejected {
            source_name,
            message: format!("{s}: {body}"),
        },
    }
}

/// Spotify Web API client.
///
/// Requests are paced by a shared [`RateLimiter`] (15 req/sec, well under
/// Spotify's rolling limit). The current user's id is looked up once and
/// cached for playlist creation.
#[derive(Debug, Clone)]
pub struct SpotifyClient {
    http: Client,
    access_token: String,
    api_base: String,
    rate_limiter: RateLimiter,
    user_id: Arc<OnceCell<String>>,
}

impl SpotifyClient {
    /// Create a client from an OAuth access token with the
    /// `playlist-modify-public` and `playlist-modify-private` scopes.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(access_token: String) -> SourceResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("discovery-fm/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            access_token,
            api_base: SPOTIFY_API_BASE.to_string(),
            rate_limiter: RateLimiter::new(15),
            user_id: Arc::new(OnceCell::new()),
        })
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Public web URL for a playlist id.
    #[must_use]
    pub fn playlist_url(playlist_id: &str) -> String {
        format!("https://open.spotify.com/playlist/{playlist_id}")
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    async fn send(&self, request: RequestBuilder, entity: &str) -> SourceResult<Response> {
        self.rate_limiter.acquire().await;
        let response = request.bearer_auth(&self.access_token).send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(classify(response, entity).await)
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        entity: &str,
    ) -> SourceResult<T> {
        let response = self.send(request, entity).await?;
        response.json::<T>().await.map_err(|e| parse_error(&e))
    }

    /// The id of the user owning the access token.
    pub async fn current_user_id(&self) -> SourceResult<String> {
        let id = self
            .user_id
            .get_or_try_init(|| async {
                let user: CurrentUser = self
                    .send_json(self.http.get(self.url("me")), "current user")
                    .await?;
                Ok::<_, SourceError>(user.id)
            })
            .await?;
        Ok(id.clone())
    }

    async fn find_owned_playlist(
        &self,
        user_id: &str,
        name: &str,
    ) -> SourceResult<Option<PlaylistHandle>> {
        let mut next = Some(self.url("me/playlists?limit=50"));
        let mut pages = 0;

        while let Some(url) = next.take() {
            if pages >= MAX_PLAYLIST_PAGES {
                log::warn!("Stopped scanning playlists after {} pages", pages);
                break;
            }
            pages += 1;

            let page: Paging<SimplifiedPlaylist> =
                self.send_json(self.http.get(&url), "playlists").await?;
            if let Some(found) = page
                .items
                .into_iter()
                .find(|p| p.owner.id == user_id && p.name == name)
            {
                return Ok(Some(PlaylistHandle {
                    url: found
                        .external_urls
                        .spotify
                        .or_else(|| Some(Self::playlist_url(&found.id))),
                    id: found.id,
                    created: false,
                }));
            }
            next = page.next;
        }

        Ok(None)
    }
}

#[async_trait]
impl CatalogService for SpotifyClient {
    async fn search_tracks(
        &self,
        query: &SearchQuery,
        limit: u32,
    ) -> SourceResult<Vec<CatalogTrack>> {
        let q = query.to_string();
        let limit = limit.clamp(1, 50).to_string();
        let request = self
            .http
            .get(self.url("search"))
            .query(&[("q", q.as_str()), ("type", "track"), ("limit", limit.as_str())]);

        let response: SearchResponse = self.send_json(request, &format!("search {q}")).await?;
        Ok(response
            .tracks
            .map(|page| page.items.into_iter().map(CatalogTrack::from).collect())
            .unwrap_or_default())
    }

    async fn ensure_playlist(
        &self,
        name: &str,
        description: &str,
        public: bool,
    ) -> SourceResult<PlaylistHandle> {
        let user_id = self.current_user_id().await?;
        if let Some(existing) = self.find_owned_playlist(&user_id, name).await? {
            log::debug!("Found existing playlist {:?} ({})", name, existing.id);
            return Ok(existing);
        }

        let body = serde_json::json!({
            "name": name,
            "description": description,
            "public": public,
        });
        let request = self
            .http
            .post(self.url(&format!("users/{user_id}/playlists")))
            .json(&body);
        let created: CreatedPlaylist = self.send_json(request, "playlist").await?;

        log::debug!("Created playlist {:?} ({})", name, created.id);
        Ok(PlaylistHandle {
            url: created
                .external_urls
                .spotify
                .or_else(|| Some(Self::playlist_url(&created.id))),
            id: created.id,
            created: true,
        })
    }

    async fn playlist_track_ids(&self, playlist_id: &str) -> SourceResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut next = Some(self.url(&format!(
            "playlists/{playlist_id}/tracks?fields=items(track(uri)),next&limit=100"
        )));

        while let Some(url) = next.take() {
            let page: Paging<PlaylistItem> = self
                .send_json(self.http.get(&url), &format!("playlist {playlist_id}"))
                .await?;
            ids.extend(
                page.items
                    .into_iter()
                    .filter_map(|item| item.track.and_then(|t| t.uri)),
            );
            next = page.next;
        }

        Ok(ids)
    }

    async fn add_tracks(&self, playlist_id: &str, ids: &[String]) -> SourceResult<()> {
        let body = serde_json::json!({ "uris": ids });
        let request = self
            .http
            .post(self.url(&format!("playlists/{playlist_id}/tracks")))
            .json(&body);
        self.send(request, &format!("playlist {playlist_id}")).await?;
        Ok(())
    }

    fn max_batch_size(&self) -> usize {
        MAX_BATCH
    }
}
