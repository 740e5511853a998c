use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// How matched tracks are ordered before the playlist is capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderBy {
    /// Most-supported first, closer neighbours first among ties.
    #[default]
    NeighbourCount,
    /// Uniformly random permutation.
    Shuffle,
    /// Discovery emission order.
    None,
}

impl OrderBy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NeighbourCount => "neighbour-count",
            Self::Shuffle => "shuffle",
            Self::None => "none",
        }
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "neighbour-count" | "neighbor-count" => Ok(Self::NeighbourCount),
            "shuffle" => Ok(Self::Shuffle),
            "none" => Ok(Self::None),
            _ => Err(Error::UnknownOrdering(s.to_string())),
        }
    }
}

/// A fully assembled playlist, ready to publish.
///
/// Invariants: at most `max_size` ids, and no id appears twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistSpec {
    pub name: String,
    pub description: String,
    ordered_catalog_ids: Vec<String>,
    max_size: usize,
}

impl PlaylistSpec {
    pub(crate) fn new(name: String, ordered_catalog_ids: Vec<String>, max_size: usize) -> Self {
        Self {
            name,
            description: String::new(),
            ordered_catalog_ids,
            max_size,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn ordered_catalog_ids(&self) -> &[String] {
        &self.ordered_catalog_ids
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered_catalog_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered_catalog_ids.is_empty()
    }
}
