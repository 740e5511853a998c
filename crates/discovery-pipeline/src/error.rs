//! Error types for the discovery pipeline.
//!
//! [`SourceError`] describes a single failed call to an external service and
//! knows whether it is worth retrying. [`PipelineError`] is what a stage
//! reports once local recovery has been exhausted.

use std::time::Duration;

use discovery_core::Listener;
use thiserror::Error;

/// Errors from a single request to an external service.
#[derive(Debug, Error)]
pub enum SourceError {
    /// A transient upstream failure (5xx, "service temporarily unavailable").
    #[error("HTTP error from {source_name}: {message}")]
    Http {
        source_name: String,
        message: String,
    },

    /// The external source returned a rate-limit response.
    #[error("rate limited by {source_name}")]
    RateLimited {
        source_name: String,
        retry_after: Option<Duration>,
    },

    /// The call did not complete within the configured timeout.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// The requested entity was not found at the external source.
    #[error("not found: {entity} at {source_name}")]
    NotFound { entity: String, source_name: String },

    /// Credentials were rejected or have expired.
    #[error("unauthorized by {source_name}: {message}")]
    Unauthorized {
        source_name: String,
        message: String,
    },

    /// The request was refused for a reason retrying will not fix.
    #[error("request rejected by {source_name}: {message}")]
    Rejected {
        source_name: String,
        message: String,
    },

    /// A response from an external source could not be parsed.
    #[error("parse error from {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    /// An error propagated from `reqwest`.
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
}

impl SourceError {
    /// Returns `true` when the error is transient and the operation may
    /// succeed if retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { .. } | Self::RateLimited { .. } | Self::Timeout { .. } => true,
            Self::Request(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// How long the source asked us to wait before trying again.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Returns `true` when the error indicates the entity was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` when the credentials were rejected.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

/// Convenience alias for single-call results.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Errors surfaced by pipeline stages.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// A listener's history could not be collected. Recoverable for
    /// neighbours: the run continues without them.
    #[error("failed to fetch history for {listener} after {attempts} attempt(s): {message}")]
    FetchFailed {
        listener: Listener,
        attempts: u32,
        message: String,
    },

    /// Nothing to discover from.
    #[error("no neighbours found for {listener}: {reason}")]
    NoNeighboursFound { listener: Listener, reason: String },

    /// The catalog rejected our credentials.
    #[error("catalog authorization expired while {context}")]
    CatalogAuthExpired { context: String },

    /// The listening-history service rejected our credentials.
    #[error("{service} rejected credentials: {message}")]
    UpstreamAuth { service: String, message: String },

    /// Publishing stopped partway through.
    #[error("playlist publish stopped after adding {added} of {total} tracks: {message}")]
    PlaylistPublishPartial {
        playlist_id: Option<String>,
        added: usize,
        total: usize,
        message: String,
    },

    /// The run was cancelled by the caller.
    #[error("cancelled")]
    Cancelled,

    /// A client could not be built from the configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    /// Returns `true` when the whole run must stop.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::FetchFailed { .. })
    }
}

/// Convenience alias for stage results.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
