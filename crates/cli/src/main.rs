//! Statehive CLI: the main entry point.
//!
//! Commands:
//! - `render`: Print the demo workspace as the model sees it
//! - `exec`: Run a script file against the demo workspace
//! - `config`: Show, locate or validate the configuration

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use statehive_config::AppConfig;

mod commands;
mod demo;

#[derive(Parser)]
#[command(
    name = "statehive",
    about = "Statehive: typed workspace state for LLM agents",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Read configuration from this file instead of ~/.statehive/config.toml
    #[arg(short, long, global = true, env = "STATEHIVE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the demo workspace
    Render {
        /// Append the script guide
        #[arg(long)]
        script_guide: bool,
    },

    /// Run a script file against the demo workspace
    Exec {
        /// Path to the script
        file: PathBuf,

        /// Print only the execution result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the default config file path
    Path,
    /// Validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Render { script_guide } => {
            let config = load_config(cli.config.as_deref())?;
            commands::render::run(&config, script_guide)?;
        }
        Commands::Exec { file, json } => {
            let config = load_config(cli.config.as_deref())?;
            commands::exec::run(&config, &file, json).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = load_config(cli.config.as_deref())?;
                commands::config_cmd::show(&config)?;
            }
            ConfigAction::Path => commands::config_cmd::path(cli.config.as_deref()),
            ConfigAction::Validate => commands::config_cmd::validate(cli.config.as_deref())?,
        },
    }

    Ok(())
}

/// The explicit file when given, otherwise the default location; environment
/// overrides apply either way.
fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.apply_env_overrides(|key| std::env::var(key).ok())?;
            config.validate()?;
            Ok(config)
        }
        None => AppConfig::load().context("Failed to load config"),
    }
}
