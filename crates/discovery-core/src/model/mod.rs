pub mod candidate;
pub mod listener;
pub mod neighbour;
pub mod playlist;
pub mod track;

pub use candidate::{DiscoveryCandidate, MatchedTrack};
pub use listener::Listener;
pub use neighbour::Neighbour;
pub use playlist::{OrderBy, PlaylistSpec};
pub use track::{normalize, PlayRecord, TrackKey};
