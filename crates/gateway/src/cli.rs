//! Command-line entry point. `serve` (the default) starts the HTTP/SSE
//! gateway; `config` inspects the resolved configuration without starting
//! anything, which is handy for CI and for debugging a bad deployment.

use clap::{Parser, Subcommand};

use sa_domain::config::Config;

#[derive(Debug, Parser)]
#[command(name = "serialagent", version, about = "Agent execution platform gateway")]
pub struct Cli {
    /// Path to a TOML config file. Falls back to `SA_CONFIG`, then
    /// `config.toml`, then built-in defaults if none of those exist.
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP/SSE gateway (default when no subcommand is given).
    Serve,
    /// Inspect the resolved configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print every `[ERROR]`/`[WARN]` the config fails validation with.
    Validate,
    /// Print the fully resolved configuration as JSON.
    Show,
}

/// Load the config file at `path_override`, or the one named by `SA_CONFIG`,
/// or `config.toml`, falling back to [`Config::default`] when none of those
/// exist. Environment overrides from spec.md §6 are applied before returning.
pub fn load_config(path_override: Option<&str>) -> Config {
    let path = path_override
        .map(str::to_string)
        .or_else(|| std::env::var("SA_CONFIG").ok())
        .unwrap_or_else(|| "config.toml".into());

    let mut config = if std::path::Path::new(&path).exists() {
        match std::fs::read_to_string(&path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(config) => config,
                Err(e) => {
                    tracing::error!(path = %path, error = %e, "failed to parse config file, using defaults");
                    Config::default()
                }
            },
            Err(e) => {
                tracing::error!(path = %path, error = %e, "failed to read config file, using defaults");
                Config::default()
            }
        }
    } else {
        tracing::info!(path = %path, "no config file found, using defaults");
        Config::default()
    };

    config.apply_env_overrides();
    config
}
