//! Cross-neighbour aggregation.
//!
//! The engine starts from the target listener's own tracks (the exclusion
//! set) and absorbs one neighbour history at a time. A neighbour adds at
//! most one unit of support to any track, however many times they played
//! it: `support_count` counts distinct contributing neighbours, not plays.

use std::collections::{HashMap, HashSet};

use crate::model::{DiscoveryCandidate, Listener, Neighbour, PlayRecord, TrackKey};

/// Incremental discovery aggregator.
///
/// The engine is the single writer of its candidate map; callers that fetch
/// histories concurrently hand each complete history to [`absorb`] from one
/// task.
///
/// [`absorb`]: DiscoveryEngine::absorb
#[derive(Debug, Default)]
pub struct DiscoveryEngine {
    exclusion: HashSet<TrackKey>,
    candidates: Vec<DiscoveryCandidate>,
    index: HashMap<TrackKey, usize>,
    contributors: HashSet<Listener>,
}

impl DiscoveryEngine {
    #[must_use]
    pub fn new(self_history: HashSet<TrackKey>) -> Self {
        Self {
            exclusion: self_history,
            ..Self::default()
        }
    }

    /// Merge a neighbour's whole history.
    ///
    /// Returns the number of distinct non-excluded tracks that neighbour
    /// contributed. A neighbour that was already absorbed contributes
    /// nothing the second time.
    pub fn absorb(&mut self, neighbour: &Neighbour, history: &[PlayRecord]) -> usize {
        if !self.contributors.insert(neighbour.listener.clone()) {
            log::warn!(
                "Neighbour {} was already absorbed; ignoring duplicate history",
                neighbour.listener
            );
            return 0;
        }

        let mut seen: HashSet<TrackKey> = HashSet::new();
        for record in history {
            let key = record.key();
            if self.exclusion.contains(&key) || !seen.insert(key.clone()) {
                continue;
            }
            match self.index.get(&key) {
                Some(&position) => self.candidates[position].add_support(neighbour.rank),
                None => {
                    self.index.insert(key.clone(), self.candidates.len());
                    self.candidates.push(DiscoveryCandidate::new(
                        key,
                        &record.artist,
                        &record.title,
                        neighbour.rank,
                    ));
                }
            }
        }

        log::debug!(
            "Neighbour {} (rank {}) contributed {} tracks",
            neighbour.listener,
            neighbour.rank,
            seen.len()
        );
        seen.len()
    }

    /// Number of neighbours absorbed so far.
    #[must_use]
    pub fn neighbour_count(&self) -> usize {
        self.contributors.len()
    }

    /// Number of candidates found so far.
    #[must_use]
    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    /// Finish aggregation, yielding candidates in emission order.
    #[must_use]
    pub fn finish(self) -> Vec<DiscoveryCandidate> {
        self.candidates
    }
}

/// One-shot discovery over already collected histories.
///
/// Neighbours are absorbed in ascending rank order regardless of the order
/// they are supplied in.
#[must_use]
pub fn discover(
    self_history: HashSet<TrackKey>,
    neighbour_histories: Vec<(Neighbour, Vec<PlayRecord>)>,
) -> Vec<DiscoveryCandidate> {
    let mut histories = neighbour_histories;
    histories.sort_by_key(|(neighbour, _)| neighbour.rank);

    let mut engine = DiscoveryEngine::new(self_history);
    for (neighbour, history) in &histories {
        engine.absorb(neighbour, history);
    }
    engine.finish()
}
