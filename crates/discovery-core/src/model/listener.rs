use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// A user identifier in the listening-history service's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Listener(String);

impl Listener {
    /// Create a listener from a user name.
    ///
    /// # Errors
    /// Returns [`Error::InvalidListener`] when the name is blank.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidListener(name));
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive identity, used to keep a listener out of their own
    /// neighbour list.
    #[must_use]
    pub fn is_same_user(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Listener {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
