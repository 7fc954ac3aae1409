//! `rampart` demonstration CLI
//!
//! Runs the resilience policies against simulated dependencies. Every
//! scenario prints its narrative to stdout; policy diagnostics go to stderr
//! through `tracing`.

mod scenarios;
mod settings;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::settings::Settings;

/// Resilience policy demonstrations
#[derive(Debug, Parser)]
#[command(name = "rampart", version, about)]
struct Cli {
    /// TOML file layered over the built-in defaults
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log filter for policy diagnostics; `RUST_LOG` is used when absent
    #[arg(long, global = true, value_name = "FILTER")]
    log_level: Option<String>,

    /// Seed for the simulated failures and delays
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Multiplier applied to every configured duration
    #[arg(long, global = true, default_value_t = 1.0, value_parser = parse_time_scale)]
    time_scale: f64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// External API call with retry and exponential backoff
    Api,
    /// Database access with retry around a circuit breaker
    Database,
    /// Queue send with a forced timeout and a local fallback
    Queue,
    /// Payload read and push notification through the retry helper
    Notify,
    /// Every scenario in order
    All,
}

fn parse_time_scale(raw: &str) -> Result<f64, String> {
    let scale: f64 = raw.parse().map_err(|err| format!("{err}"))?;
    if scale.is_finite() && scale > 0.0 && scale <= 1000.0 {
        Ok(scale)
    } else {
        Err(format!("{raw} is not within (0, 1000]"))
    }
}

fn init_tracing(log_level: Option<&str>) -> anyhow::Result<()> {
    let filter = match log_level {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid log filter '{directives}'"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref())?;

    let settings = Settings::load(cli.config.as_deref())?.scaled(cli.time_scale);
    settings.validate()?;
    let seed = cli.seed.unwrap_or_else(|| fastrand::u64(..));
    tracing::info!(seed, time_scale = cli.time_scale, command = ?cli.command, "starting scenario");

    match cli.command {
        Command::Api => scenarios::api::run(&settings.api).await,
        Command::Database => scenarios::database::run(&settings.database, seed).await,
        Command::Queue => scenarios::queue::run(&settings.queue, seed).await,
        Command::Notify => scenarios::notify::run(&settings.notify).await,
        Command::All => scenarios::run_all(&settings, seed).await,
    }
}
