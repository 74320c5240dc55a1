pub mod config;
pub mod doctor;
pub mod run;

use clap::{Parser, Subcommand};
use verse_domain::config::Config;
use verse_domain::{Error, Result};

/// verse-server — shared-scene protocol server core.
#[derive(Debug, Parser)]
#[command(name = "verse-server", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the server (default when no subcommand is given).
    Run,
    /// Run diagnostic checks against the current configuration and
    /// bootstrap path without starting the dispatcher.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Load configuration from the path named by `VERSE_CONFIG` (default
/// `config.toml`), falling back to built-in defaults when the file is
/// absent.
pub fn load_config() -> Result<(Config, String)> {
    let config_path = std::env::var("VERSE_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{config_path}: {e}")))?
    } else {
        Config::default()
    };

    Ok((config, config_path))
}
