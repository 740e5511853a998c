use anyhow::{Context, Result};
use discovery_core::OrderBy;
use discovery_pipeline::config::{self, Config};
use toml_edit::{value, DocumentMut};

/// Keys accepted by `config get` and `config set`, with their value kind.
const KEYS: &[(&str, Kind)] = &[
    ("lastfm_api_key", Kind::Secret),
    ("spotify_access_token", Kind::Secret),
    ("neighbours", Kind::Integer),
    ("user_months", Kind::Integer),
    ("neighbour_months", Kind::Integer),
    ("max_tracks", Kind::Integer),
    ("order_by", Kind::Order),
    ("workers", Kind::Integer),
    ("search_workers", Kind::Integer),
    ("playlist_public", Kind::Boolean),
    ("retry.max_attempts", Kind::Integer),
    ("retry.min_delay_ms", Kind::Integer),
    ("retry.max_delay_ms", Kind::Integer),
    ("retry.timeout_secs", Kind::Integer),
];

#[derive(Debug, Clone, Copy)]
enum Kind {
    Secret,
    Integer,
    Boolean,
    Order,
}

fn kind_of(key: &str) -> Result<Kind> {
    KEYS.iter()
        .find(|(name, _)| *name == key)
        .map(|(_, kind)| *kind)
        .ok_or_else(|| {
            let valid: Vec<&str> = KEYS.iter().map(|(name, _)| *name).collect();
            anyhow::anyhow!(
                "Unknown config key: {}\n\nValid keys: {}",
                key,
                valid.join(", ")
            )
        })
}

/// Hide all but the first few characters of a secret.
fn mask(secret: Option<&str>) -> String {
    match secret {
        None => "<not set>".to_string(),
        Some(s) if s.chars().count() <= 4 => "****".to_string(),
        Some(s) => format!("{}****", s.chars().take(4).collect::<String>()),
    }
}

/// Show the current effective configuration.
pub fn show_config(config: &Config) -> Result<()> {
    println!("Current Configuration");
    println!("=====================\n");

    println!("Config file: {}", config::config_file_path().display());

    let exists = config::config_file_path().exists();
    println!("File exists: {}\n", if exists { "yes" } else { "no (using defaults)" });

    println!("Settings:");
    println!("  lastfm_api_key: {}", mask(config.lastfm_api_key.as_deref()));
    println!(
        "  spotify_access_token: {}",
        mask(config.spotify_access_token.as_deref())
    );
    println!("  neighbours: {}", config.neighbours);
    println!("  user_months: {}", config.user_months);
    println!("  neighbour_months: {}", config.neighbour_months);
    println!("  max_tracks: {}", config.max_tracks);
    println!("  order_by: {}", config.order_by);
    println!("  workers: {}", config.workers);
    println!("  search_workers: {}", config.search_workers);
    println!("  playlist_public: {}", config.playlist_public);
    println!("  retry.max_attempts: {}", config.retry.max_attempts);
    println!("  retry.min_delay_ms: {}", config.retry.min_delay_ms);
    println!("  retry.max_delay_ms: {}", config.retry.max_delay_ms);
    println!("  retry.timeout_secs: {}", config.retry.timeout_secs);
    println!("  logging.level: {:?}", config.logging.level());
    println!("  logging.coloured: {}", config.logging.coloured());
    println!("  logging.output: {:?}", config.logging.output());

    println!("\nPriority: CLI args > ENV vars (DISCOVERY_*) > Config file > Defaults");

    Ok(())
}

/// Look up a dotted key in the effective configuration.
fn lookup(config: &Config, key: &str) -> Result<String> {
    let kind = kind_of(key)?;
    let tree = serde_json::to_value(config).context("Failed to serialize configuration")?;
    let found = key
        .split('.')
        .try_fold(&tree, |node, part| node.get(part))
        .ok_or_else(|| anyhow::anyhow!("Config key not present: {}", key))?;
    if matches!(kind, Kind::Secret) {
        return Ok(mask(found.as_str()));
    }
    Ok(match found {
        serde_json::Value::Null => "<not set>".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Get a specific config value.
pub fn get_config(config: &Config, key: Option<String>) -> Result<()> {
    if let Some(key) = key {
        println!("{}", lookup(config, &key)?);
    } else {
        // No key provided, show entire config file contents
        let config_path = config::config_file_path();

        if config_path.exists() {
            let contents =
                std::fs::read_to_string(&config_path).context("Failed to read config file")?;
            print!("{}", contents);
        } else {
            println!("Config file does not exist: {}", config_path.display());
            println!("\nRun 'discovery-fm config init' to create it.");
        }
    }

    Ok(())
}

/// Apply `key = raw` to a TOML document, keeping its comments and layout.
fn apply_setting(contents: &str, key: &str, raw: &str) -> Result<String> {
    let item = match kind_of(key)? {
        Kind::Secret => value(raw),
        Kind::Integer => value(
            raw.parse::<i64>()
                .with_context(|| format!("{key} expects a whole number, got '{raw}'"))?,
        ),
        Kind::Boolean => value(
            raw.parse::<bool>()
                .with_context(|| format!("{key} expects true or false, got '{raw}'"))?,
        ),
        Kind::Order => {
            let order: OrderBy = raw
                .parse()
                .with_context(|| format!("{key} expects neighbour-count, shuffle or none"))?;
            value(order.as_str())
        }
    };

    let mut doc: DocumentMut = contents.parse().context("Failed to parse config file")?;
    match key.split_once('.') {
        Some((table, field)) => doc[table][field] = item,
        None => doc[key] = item,
    }
    Ok(doc.to_string())
}

/// Set a config value.
pub fn set_config(key: &str, raw: &str) -> Result<()> {
    let config_path = config::config_file_path();

    // Ensure config file exists
    config::ensure_config_file()?;

    let contents = std::fs::read_to_string(&config_path).context("Failed to read config file")?;
    let updated = apply_setting(&contents, key, raw)?;
    std::fs::write(&config_path, updated).context("Failed to write config file")?;

    let shown = match kind_of(key)? {
        Kind::Secret => mask(Some(raw)),
        _ => raw.to_string(),
    };
    println!("✓ Updated {} = {}", key, shown);
    println!("  in {}", config_path.display());

    Ok(())
}

/// Show the config file path.
pub fn show_path() -> Result<()> {
    let config_path = config::config_file_path();
    println!("{}", config_path.display());
    Ok(())
}

/// Show example configuration.
pub fn show_example() -> Result<()> {
    print!("{}", config::example_config());
    Ok(())
}

/// Initialize config file with defaults.
pub fn init_config() -> Result<()> {
    let created = config::ensure_config_file()?;
    let config_path = config::config_file_path();

    if created {
        println!("✓ Created config file: {}", config_path.display());
        println!("\nEdit this file to add your Last.fm API key and Spotify token.");
    } else {
        println!("Config file already exists: {}", config_path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_preserves_comments() {
        let original = "# my settings\nneighbours = 10 # how many\n";
        let updated = apply_setting(original, "neighbours", "25").unwrap();
        assert!(updated.contains("# my settings"));
        assert!(updated.contains("neighbours = 25"));
    }

    #[test]
    fn test_set_nested_key_creates_table() {
        let updated = apply_setting("neighbours = 10\n", "retry.max_attempts", "6").unwrap();
        let doc: DocumentMut = updated.parse().unwrap();
        assert_eq!(doc["retry"]["max_attempts"].as_integer(), Some(6));
    }

    #[test]
    fn test_set_normalizes_order() {
        let updated = apply_setting("", "order_by", "neighbor_count").unwrap();
        assert!(updated.contains("order_by = \"neighbour-count\""));
    }

    #[test]
    fn test_set_rejects_bad_values() {
        assert!(apply_setting("", "neighbours", "lots").is_err());
        assert!(apply_setting("", "playlist_public", "maybe").is_err());
        assert!(apply_setting("", "order_by", "loudness").is_err());
        assert!(apply_setting("", "colour", "red").is_err());
    }

    #[test]
    fn test_lookup_reads_effective_values() {
        let config = Config::default();
        assert_eq!(lookup(&config, "neighbours").unwrap(), "10");
        assert_eq!(lookup(&config, "order_by").unwrap(), "neighbour-count");
        assert_eq!(lookup(&config, "retry.timeout_secs").unwrap(), "30");
        assert_eq!(lookup(&config, "lastfm_api_key").unwrap(), "<not set>");
    }

    #[test]
    fn test_lookup_masks_secrets() {
        let config = Config {
            lastfm_api_key: Some("abcdef123456".to_string()),
            spotify_access_token: Some("BQDtoken".to_string()),
            ..Config::default()
        };
        assert_eq!(lookup(&config, "lastfm_api_key").unwrap(), "abcd****");
        assert_eq!(lookup(&config, "spotify_access_token").unwrap(), "BQDt****");
    }

    #[test]
    fn test_mask_hides_secrets() {
        assert_eq!(mask(None), "<not set>");
        assert_eq!(mask(Some("abc")), "****");
        assert_eq!(mask(Some("abcdef123")), "abcd****");
    }
}
