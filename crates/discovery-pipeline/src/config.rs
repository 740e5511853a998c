use anyhow::{Context, Result};
use confyg::{env, Confygery};
use discovery_core::OrderBy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::resilience::RetryPolicy;

/// Configuration for discovery-fm.
///
/// Configuration is loaded from multiple sources with the following priority:
/// 1. CLI arguments (highest priority)
/// 2. Environment variables (DISCOVERY_* prefix)
/// 3. Config file (~/.config/discovery-fm/config.toml)
/// 4. Built-in defaults (lowest priority)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Last.fm API key (required for history collection).
    ///
    /// Can be set via:
    /// - ENV: DISCOVERY_LASTFM_API_KEY
    /// - Config: lastfm_api_key = "..."
    #[serde(default)]
    pub lastfm_api_key: Option<String>,

    /// Spotify bearer token with playlist-modify scopes.
    ///
    /// Can be set via:
    /// - ENV: DISCOVERY_SPOTIFY_ACCESS_TOKEN
    /// - Config: spotify_access_token = "..."
    #[serde(default)]
    pub spotify_access_token: Option<String>,

    /// Number of neighbours to draw from.
    #[serde(default = "default_neighbours")]
    pub neighbours: usize,

    /// How far back the listener's own history reaches, in months.
    #[serde(default = "default_user_months")]
    pub user_months: u32,

    /// How far back each neighbour's history reaches, in months.
    #[serde(default = "default_neighbour_months")]
    pub neighbour_months: u32,

    /// Playlist size cap.
    #[serde(default = "default_max_tracks")]
    pub max_tracks: usize,

    #[serde(default)]
    pub order_by: OrderBy,

    /// Neighbour histories fetched concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Catalog searches in flight at once.
    #[serde(default = "default_search_workers")]
    pub search_workers: usize,

    #[serde(default = "default_playlist_public")]
    pub playlist_public: bool,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub logging: twyg::Opts,
}

/// Retry and timeout settings for every external call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            min_delay: Duration::from_millis(self.min_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.min_delay_ms)),
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            ..RetryPolicy::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lastfm_api_key: None,
            spotify_access_token: None,
            neighbours: default_neighbours(),
            user_months: default_user_months(),
            neighbour_months: default_neighbour_months(),
            max_tracks: default_max_tracks(),
            order_by: OrderBy::default(),
            workers: default_workers(),
            search_workers: default_search_workers(),
            playlist_public: default_playlist_public(),
            retry: RetrySettings::default(),
            logging: twyg::Opts::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Searches for config file at: ~/.config/discovery-fm/config.toml
    /// Reads environment variables with DISCOVERY_ prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from an explicit file path plus the environment.
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let mut builder = Confygery::new().context("Failed to create config builder")?;

        if config_path.exists() {
            let path_str = config_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Config path contains invalid UTF-8"))?;
            builder
                .add_file(path_str)
                .context("Failed to load config file")?;
        }

        let env_opts = env::Options::with_top_level("discovery");
        builder
            .add_env(env_opts)
            .context("Failed to load environment variables")?;

        let config: Self = builder.build().context("Failed to build configuration")?;

        Ok(config)
    }

    /// The Last.fm API key, or an error naming where to set it.
    pub fn require_lastfm_api_key(&self) -> Result<&str> {
        self.lastfm_api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "No Last.fm API key configured. Set DISCOVERY_LASTFM_API_KEY or \
                     lastfm_api_key in {}",
                    config_file_path().display()
                )
            })
    }

    /// The Spotify access token, or an error naming where to set it.
    pub fn require_spotify_access_token(&self) -> Result<&str> {
        self.spotify_access_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "No Spotify access token configured. Set DISCOVERY_SPOTIFY_ACCESS_TOKEN \
                     or spotify_access_token in {}",
                    config_file_path().display()
                )
            })
    }
}

fn default_neighbours() -> usize {
    10
}

fn default_user_months() -> u32 {
    60
}

fn default_neighbour_months() -> u32 {
    12
}

fn default_max_tracks() -> usize {
    10_000
}

fn default_workers() -> usize {
    4
}

fn default_search_workers() -> usize {
    10
}

fn default_playlist_public() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    4
}

fn default_min_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

fn default_timeout_secs() -> u64 {
    30
}

/// Get the config file path.
///
/// Returns:
/// - Linux: ~/.config/discovery-fm/config.toml
/// - macOS: ~/Library/Application Support/discovery-fm/config.toml
/// - Windows: %APPDATA%\discovery-fm\config.toml
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("discovery-fm")
        .join("config.toml")
}

/// Get the example config file content.
pub fn example_config() -> &'static str {
    r#"# discovery-fm Configuration File
#
# Configuration is loaded from multiple sources with the following priority:
# 1. CLI arguments (highest priority)
# 2. Environment variables (DISCOVERY_* prefix)
# 3. This config file
# 4. Built-in defaults (lowest priority)

# Last.fm API key, used to read listening histories
#
# Create one at: https://www.last.fm/api/account/create
#
# Can also be set via:
# - Environment: DISCOVERY_LASTFM_API_KEY=your-key-here
lastfm_api_key = "your-lastfm-api-key-here"

# Spotify access token with playlist-modify-public and
# playlist-modify-private scopes
#
# Can also be set via:
# - Environment: DISCOVERY_SPOTIFY_ACCESS_TOKEN=your-token-here
spotify_access_token = "your-spotify-access-token-here"

# Number of Last.fm neighbours to draw tracks from (CLI: --neighbours)
neighbours = 10

# Months of your own history to exclude (CLI: --user-months)
user_months = 60

# Months of each neighbour's history to consider (CLI: --neighbour-months)
neighbour_months = 12

# Maximum playlist size (CLI: --max-tracks)
max_tracks = 10000

# Track order: "neighbour-count", "shuffle" or "none" (CLI: --order-by)
order_by = "neighbour-count"

# Neighbour histories fetched concurrently (CLI: --workers)
workers = 4

# Spotify searches in flight at once
search_workers = 10

# Create playlists as public (CLI: --private overrides)
playlist_public = true

[retry]
max_attempts = 4
min_delay_ms = 500
max_delay_ms = 8000
timeout_secs = 30

# Log output (see the twyg crate for all options)
#[logging]
#coloured = true
#level = "info"
"#
}

/// Create default config file if it doesn't exist.
///
/// Returns true if a new file was created, false if it already existed.
pub fn ensure_config_file() -> Result<bool> {
    ensure_config_file_at(&config_file_path())
}

/// Create the example config at `config_path` unless a file is already there.
pub fn ensure_config_file_at(config_path: &Path) -> Result<bool> {
    if config_path.exists() {
        return Ok(false);
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
    }

    std::fs::write(config_path, example_config()).context("Failed to write config file")?;

    Ok(true)
}
