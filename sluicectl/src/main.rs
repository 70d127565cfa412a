//! `sluicectl`: mirror a watched directory through the backlog-tracked poll
//! cycle.

mod app;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use sluice_config::{ConfigLoad, ConfigLoader, SluiceConfig};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sluicectl")]
#[command(about = "Poll a directory and mirror each new or changed file exactly once per change")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
struct ConfigArgs {
    /// Path to a TOML or JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to a .env file (defaults to ./.env when present)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Directory to watch (overrides config)
    #[arg(long, global = true)]
    source: Option<PathBuf>,

    /// Directory files are mirrored into (overrides config)
    #[arg(long, global = true)]
    destination: Option<PathBuf>,

    /// Regular expression file names must match (overrides config)
    #[arg(long, global = true)]
    pattern: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll continuously until interrupted
    Watch {
        /// Worker tasks (overrides config)
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Run a single tick and print its report as JSON
    Once {
        /// Keep ticking until a tick makes no progress
        #[arg(long, default_value_t = false)]
        drain: bool,
    },
    /// Validate the configuration and print the effective settings
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let ConfigLoad {
        mut config,
        source,
        warnings,
        env_file_loaded,
    } = load_config(&cli.config)?;

    if env_file_loaded {
        info!("loaded .env file");
    }
    info!(source = ?source, "configuration loaded");
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }

    match cli.command {
        Command::Watch { concurrency } => {
            if let Some(concurrency) = concurrency {
                config.poller.concurrency = concurrency.max(1);
            }
            app::watch(config).await
        }
        Command::Once { drain } => {
            let summary = app::once(config, drain).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Check => {
            print!("{}", render_config(&config)?);
            Ok(())
        }
    }
}

fn load_config(args: &ConfigArgs) -> anyhow::Result<ConfigLoad> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &args.env_file {
        loader = loader.with_env_file(path);
    }
    let mut load = loader.load().context("failed to load configuration")?;

    if let Some(source) = &args.source {
        load.config.source.directory = source.clone();
    }
    if let Some(destination) = &args.destination {
        load.config.sink.destination = destination.clone();
    }
    if let Some(pattern) = &args.pattern {
        load.config.source.pattern = Some(pattern.clone());
    }
    if args.source.is_some() || args.destination.is_some() || args.pattern.is_some() {
        sluice_config::validation::apply_guard_rails(&load.config)
            .context("command line overrides produce an invalid configuration")?;
    }
    Ok(load)
}

fn render_config(config: &SluiceConfig) -> anyhow::Result<String> {
    toml::to_string(config).context("failed to render configuration")
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "info,sluice::backlog=warn,sluice::dispatch=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
