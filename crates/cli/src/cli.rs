use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use kh_domain::config::Config;

/// Kohi: a persona-driven group chat member.
#[derive(Debug, Parser)]
#[command(name = "kohi", version, about)]
pub struct Cli {
    /// Config file. Falls back to `$KOHI_CONFIG`, then `kohi.toml`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Chat from the terminal as a group member (default).
    Chat {
        /// Group the console speaks into.
        #[arg(long, default_value = "console")]
        group: String,
        /// Display name used for your messages.
        #[arg(long, default_value = "you")]
        name: String,
        /// Speaker id used for your messages.
        #[arg(long, default_value = "1")]
        uid: String,
    },
    /// Record one message, run one turn and print the events.
    Run {
        message: String,
        #[arg(long, default_value = "console")]
        group: String,
        /// Print every event as a JSON line instead of plain text.
        #[arg(long)]
        json: bool,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Path of the config file to read: the flag, then `$KOHI_CONFIG`, then
/// `kohi.toml` in the working directory.
pub fn config_path(flag: Option<&Path>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    std::env::var_os("KOHI_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("kohi.toml"))
}

/// Load the config at `path`. A missing file means all defaults.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}
