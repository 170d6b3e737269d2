//! CLI entry point for DynamiX
//!
//! Parses command line arguments, installs logging and starts the daemon.

use clap::Parser;
use dynamix::{Config, Daemon};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// DynamiX - time- and season-based collection pinning for Plex
#[derive(Parser, Debug)]
#[command(name = "dynamix")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml); defaults apply if it is missing
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Directory for config.json, the ledger and run state (overrides [state].dir)
    #[arg(short, long)]
    state_dir: Option<PathBuf>,

    /// Skip startup checks (token, URL, state directory). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dynamix=info")),
        )
        .init();

    let args = Args::parse();
    info!(config = %args.config.display(), "DynamiX starting");

    let mut config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    if let Some(dir) = args.state_dir {
        config.state.dir = dir;
    }

    let daemon_result = if args.skip_checks {
        warn!("skipping startup checks (--skip-checks enabled)");
        Daemon::new_without_checks(config)
    } else {
        Daemon::with_config(config)
    };

    match daemon_result {
        Ok(daemon) => {
            info!(
                bind = %daemon.config.server.bind,
                port = daemon.config.server.port,
                workers = daemon.concurrency_plan.max_parallel_libraries,
                "serving HTTP control surface"
            );
            if let Err(e) = daemon.run().await {
                error!(error = %e, "daemon error");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "failed to initialize daemon");
            ExitCode::FAILURE
        }
    }
}
