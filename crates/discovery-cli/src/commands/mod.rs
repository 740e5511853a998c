pub mod config;
pub mod discover;

pub use discover::run_discover;
