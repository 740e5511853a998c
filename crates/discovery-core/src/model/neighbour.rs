use serde::{Deserialize, Serialize};

use crate::model::listener::Listener;

/// A taste-neighbour of some target listener. Rank 1 is the closest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Neighbour {
    pub listener: Listener,
    pub rank: u32,
}

impl Neighbour {
    #[must_use]
    pub fn new(listener: Listener, rank: u32) -> Self {
        Self { listener, rank }
    }
}
