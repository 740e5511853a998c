use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalise a free-text field for equality checks: trim, lower-case, and
/// collapse internal whitespace runs to a single space.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// The identity of a track across services and plays.
///
/// Two plays are "the same track" iff their keys are equal. Ordering is
/// lexicographic on `(artist, title)` and is used as the final tie-break
/// when ranking candidates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackKey {
    artist: String,
    title: String,
}

impl TrackKey {
    #[must_use]
    pub fn new(artist: &str, title: &str) -> Self {
        Self {
            artist: normalize(artist),
            title: normalize(title),
        }
    }

    #[must_use]
    pub fn artist(&self) -> &str {
        &self.artist
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.artist, self.title)
    }
}

/// A single scrobble.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayRecord {
    pub artist: String,
    pub title: String,
    pub timestamp: DateTime<Utc>,
}

impl PlayRecord {
    #[must_use]
    pub fn new(
        artist: impl Into<String>,
        title: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
            timestamp,
        }
    }

    #[must_use]
    pub fn key(&self) -> TrackKey {
        TrackKey::new(&self.artist, &self.title)
    }
}
