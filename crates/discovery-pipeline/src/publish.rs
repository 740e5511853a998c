//! Playlist publishing.

use std::collections::HashSet;
use std::sync::Arc;

use discovery_core::PlaylistSpec;

use crate::error::{PipelineError, PipelineResult};
use crate::resilience::RetryPolicy;
use crate::sources::CatalogService;

/// What a publish did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub playlist_id: String,
    pub url: Option<String>,
    /// `false` when an existing playlist with the same name was reused.
    pub created: bool,
    /// Tracks appended by this publish.
    pub added: usize,
    /// Tracks skipped because the reused playlist already held them.
    pub already_present: usize,
}

/// Writes a [`PlaylistSpec`] to the catalog.
///
/// Publishing is resumable: the playlist is looked up by name before being
/// created, and ids it already holds are skipped, so re-running after a
/// partial failure only appends what is missing. Reads are retried under the
/// configured policy; appends are attempted once because they are not
/// idempotent.
#[derive(Clone)]
pub struct PlaylistPublisher {
    catalog: Arc<dyn CatalogService>,
    policy: RetryPolicy,
    public: bool,
}

impl std::fmt::Debug for PlaylistPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaylistPublisher")
            .field("policy", &self.policy)
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl PlaylistPublisher {
    pub fn new(catalog: Arc<dyn CatalogService>, policy: RetryPolicy) -> Self {
        Self {
            catalog,
            policy,
            public: true,
        }
    }

    #[must_use]
    pub fn with_public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    pub async fn publish(&self, spec: &PlaylistSpec) -> PipelineResult<PublishOutcome> {
        let total = spec.len();
        let partial = |playlist_id: Option<String>, added: usize, message: String| {
            PipelineError::PlaylistPublishPartial {
                playlist_id,
                added,
                total,
                message,
            }
        };

        let handle = self
            .policy
            .run("ensure playlist", || {
                self.catalog
                    .ensure_playlist(&spec.name, &spec.description, self.public)
            })
            .await
            .map_err(|failure| {
                if failure.error.is_auth() {
                    PipelineError::CatalogAuthExpired {
                        context: format!("creating playlist '{}'", spec.name),
                    }
                } else {
                    partial(None, 0, failure.error.to_string())
                }
            })?;

        if handle.created {
            log::info!("Created playlist '{}' ({})", spec.name, handle.id);
        } else {
            log::info!("Reusing existing playlist '{}' ({})", spec.name, handle.id);
        }

        let existing: HashSet<String> = if handle.created {
            HashSet::new()
        } else {
            self.policy
                .run("list playlist tracks", || {
                    self.catalog.playlist_track_ids(&handle.id)
                })
                .await
                .map_err(|failure| partial(Some(handle.id.clone()), 0, failure.error.to_string()))?
                .into_iter()
                .collect()
        };

        let pending: Vec<String> = spec
            .ordered_catalog_ids()
            .iter()
            .filter(|id| !existing.contains(*id))
            .cloned()
            .collect();
        let already_present = total - pending.len();
        if already_present > 0 {
            log::info!("{} tracks already in playlist; skipping them", already_present);
        }

        let append = RetryPolicy::no_retry(self.policy.timeout);
        let batch_size = self.catalog.max_batch_size().max(1);
        let mut added = 0;
        for batch in pending.chunks(batch_size) {
            append
                .run("add playlist tracks", || self.catalog.add_tracks(&handle.id, batch))
                .await
                .map_err(|failure| {
                    log::error!(
                        "Adding tracks to {} failed after {} of {}: {}",
                        handle.id,
                        added,
                        pending.len(),
                        failure.error
                    );
                    partial(Some(handle.id.clone()), added, failure.error.to_string())
                })?;
            added += batch.len();
            log::debug!("Added {}/{} tracks", added, pending.len());
        }

        Ok(PublishOutcome {
            playlist_id: handle.id,
            url: handle.url,
            created: handle.created,
            added,
            already_present,
        })
    }
}
