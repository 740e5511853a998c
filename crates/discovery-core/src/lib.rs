//! Core domain model for discovery-fm.
//!
//! This crate defines the listening-history model (listeners, plays,
//! neighbours), the discovery engine that aggregates neighbour histories
//! into candidates, and the pure playlist assembly step.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod assemble;
pub mod engine;
pub mod error;
pub mod model;

pub use assemble::{assemble, assemble_with_rng, order_candidates};
pub use engine::{discover, DiscoveryEngine};
pub use error::{Error, Result};
pub use model::{
    DiscoveryCandidate, Listener, MatchedTrack, Neighbour, OrderBy, PlayRecord, PlaylistSpec,
    TrackKey,
};
