//! Discovery pipeline for discovery-fm.
//!
//! Collects listening histories, resolves taste-neighbours, runs the
//! discovery engine, matches candidates against the target catalog and
//! publishes the resulting playlist. External services sit behind the
//! traits in [`sources`] so every stage can be driven by test doubles.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod history;
pub mod matcher;
pub mod neighbours;
pub mod pipeline;
pub mod publish;
pub mod resilience;
pub mod sources;

pub use config::{Config, RetrySettings};
pub use error::{PipelineError, PipelineResult, SourceError, SourceResult};
pub use history::{HistoryCollector, PageTick};
pub use matcher::{CatalogMatcher, MatchOutcome, MatchReport};
pub use neighbours::NeighbourResolver;
pub use pipeline::{
    default_playlist_name, months_ago, playlist_description, DiscoveryPipeline, DiscoverySettings,
    PipelineEvent, RunReport, Stage,
};
pub use publish::{PlaylistPublisher, PublishOutcome};
pub use resilience::{RateLimiter, RetryFailure, RetryPolicy};
