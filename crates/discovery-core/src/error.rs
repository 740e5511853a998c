use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid listener identifier: {0:?}")]
    InvalidListener(String),

    #[error("unknown ordering {0:?} (expected neighbour-count, shuffle or none)")]
    UnknownOrdering(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, Error>;
