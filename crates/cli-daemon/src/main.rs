//! CLI entry point for the transcode queue daemon
//!
//! Parses command line arguments, installs logging and starts the daemon.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use transcode_queue::{Config, Daemon};

/// Transcode queue daemon - sequential encoder jobs with live progress over HTTP
#[derive(Parser, Debug)]
#[command(name = "transcode-queued")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Skip the encoder preflight check. For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("transcode_queue=info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging();

    info!(config = %args.config.display(), "Transcode queue starting");

    let config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let daemon_result = if args.skip_checks {
        warn!("Skipping encoder preflight (--skip-checks enabled)");
        Daemon::new_without_checks(config)
    } else {
        Daemon::new(config)
    };

    match daemon_result {
        Ok(daemon) => {
            info!(
                bind = %daemon.config.server.bind,
                media_dir = %daemon.config.paths.media_dir.display(),
                output_dir = %daemon.config.paths.output_dir.display(),
                "Daemon initialized"
            );

            if let Err(e) = daemon.run(shutdown_signal()).await {
                error!(error = %e, "Daemon error");
                return ExitCode::FAILURE;
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize daemon");
            ExitCode::FAILURE
        }
    }
}
