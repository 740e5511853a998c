//! Neighbour resolution.
//!
//! Turns the raw, possibly messy listing from a [`NeighbourSource`] into a
//! clean rank-ordered list. Page brittleness stays here: a missing or
//! restructured page yields fewer (or zero) neighbours, never a panic.

use std::collections::HashMap;
use std::sync::Arc;

use discovery_core::{Listener, Neighbour};

use crate::error::{PipelineError, PipelineResult};
use crate::resilience::RetryPolicy;
use crate::sources::{NeighbourSource, RawNeighbour};

/// Resolves the closest taste-neighbours of a listener.
#[derive(Clone)]
pub struct NeighbourResolver {
    source: Arc<dyn NeighbourSource>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for NeighbourResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeighbourResolver")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Collapse duplicates (best rank wins), drop the listener themselves and
/// invalid names, then sort by rank and keep at most `count`.
fn clean(listener: &Listener, raw: Vec<RawNeighbour>, count: usize) -> Vec<Neighbour> {
    let mut best: HashMap<String, Neighbour> = HashMap::new();

    for entry in raw {
        if listener.is_same_user(&entry.name) {
            continue;
        }
        let Ok(candidate) = Listener::new(entry.name) else {
            continue;
        };
        best.entry(candidate.as_str().to_lowercase())
            .and_modify(|existing| existing.rank = existing.rank.min(entry.rank))
            .or_insert_with(|| Neighbour::new(candidate, entry.rank));
    }

    let mut neighbours: Vec<Neighbour> = best.into_values().collect();
    neighbours.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.listener.cmp(&b.listener)));
    neighbours.truncate(count);
    neighbours
}

impl NeighbourResolver {
    pub fn new(source: Arc<dyn NeighbourSource>, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    /// Resolve up to `count` neighbours of `listener`, closest first.
    ///
    /// Returns whatever was found when it is fewer than `count`. Signals
    /// [`PipelineError::NoNeighboursFound`] when nothing usable was found,
    /// including when the listing could not be fetched at all.
    pub async fn resolve(
        &self,
        listener: &Listener,
        count: usize,
    ) -> PipelineResult<Vec<Neighbour>> {
        let raw = match self
            .policy
            .run("neighbour listing", || self.source.raw_neighbours(listener))
            .await
        {
            Ok(raw) => raw,
            Err(failure) => {
                log::warn!(
                    "Could not fetch neighbours for {} after {} attempt(s): {}",
                    listener,
                    failure.attempts,
                    failure.error
                );
                return Err(PipelineError::NoNeighboursFound {
                    listener: listener.clone(),
                    reason: failure.error.to_string(),
                });
            }
        };

        let raw_len = raw.len();
        let neighbours = clean(listener, raw, count);
        if neighbours.is_empty() {
            return Err(PipelineError::NoNeighboursFound {
                listener: listener.clone(),
                reason: format!("listing had {raw_len} usable entries"),
            });
        }
        if neighbours.len() < count {
            log::info!(
                "Found {} of {} requested neighbours for {}",
                neighbours.len(),
                count,
                listener
            );
        }
        Ok(neighbours)
    }
}
