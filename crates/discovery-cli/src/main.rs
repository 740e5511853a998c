use anyhow::Result;
use clap::Parser;
use discovery_core::OrderBy;
use discovery_pipeline::Config;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "discovery-fm", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Build a playlist from your Last.fm neighbours' listening
    ///
    /// Finds the listeners Last.fm considers closest to your taste, collects
    /// their recent scrobbles, removes everything you have played yourself,
    /// and ranks what is left by how many neighbours play it. Each track is
    /// then looked up on Spotify and the matches are written to a playlist.
    ///
    /// Re-running with the same playlist name reuses the playlist and only
    /// adds tracks that are missing, so an interrupted run can be resumed.
    ///
    /// Output:
    /// - Progress for each stage
    /// - Summary of neighbours used, candidates found, tracks matched and
    ///   tracks published
    /// - The first unmatched tracks, for manual follow-up
    Discover(DiscoverArgs),
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, clap::Args)]
pub struct DiscoverArgs {
    /// Last.fm username to discover for
    pub username: String,

    /// Number of neighbours to draw from [default: 10]
    #[arg(short = 'n', long)]
    pub neighbours: Option<usize>,

    /// Months of your own history to exclude [default: 60]
    #[arg(short = 'u', long)]
    pub user_months: Option<u32>,

    /// Months of each neighbour's history to consider [default: 12]
    #[arg(short = 'm', long)]
    pub neighbour_months: Option<u32>,

    /// Track order: neighbour-count, shuffle or none [default: neighbour-count]
    #[arg(short = 'o', long)]
    pub order_by: Option<OrderBy>,

    /// Playlist name [default: "discovery-fm - YYYY-MM-DD"]
    #[arg(short = 'p', long)]
    pub playlist_name: Option<String>,

    /// Maximum tracks in the playlist [default: 10000]
    #[arg(short = 't', long)]
    pub max_tracks: Option<usize>,

    /// Neighbour histories fetched concurrently [default: 4]
    #[arg(long)]
    pub workers: Option<usize>,

    /// Create the playlist as private
    #[arg(long)]
    pub private: bool,

    /// Discover and match, but do not create or modify a playlist
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, clap::Subcommand)]
enum ConfigCommand {
    /// Show the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Print an example config file
    Example,
    /// Create the config file with defaults
    Init,
    /// Print a config value, or the whole file when no key is given
    Get {
        /// Key such as `neighbours` or `retry.max_attempts`
        key: Option<String>,
    },
    /// Set a config value in the config file
    Set {
        /// Key such as `neighbours` or `retry.max_attempts`
        key: String,
        /// New value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load()?;
    twyg::setup(config.logging.clone())
        .map_err(|e| anyhow::anyhow!("Failed to set up logging: {e:?}"))?;

    match cli.command {
        Commands::Discover(args) => {
            commands::run_discover(args, &config).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommand::Show => commands::config::show_config(&config)?,
            ConfigCommand::Path => commands::config::show_path()?,
            ConfigCommand::Example => commands::config::show_example()?,
            ConfigCommand::Init => commands::config::init_config()?,
            ConfigCommand::Get { key } => commands::config::get_config(&config, key)?,
            ConfigCommand::Set { key, value } => commands::config::set_config(&key, &value)?,
        },
    }

    Ok(())
}
