use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vigil::action::LogAction;
use vigil::{AppConfig, Engine};

/// Vigil - interval-driven market monitoring engine
#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short = 'c', long, default_value = "vigil.toml")]
    config: PathBuf,

    /// Log verbosity (error, warn, info, debug, trace)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Default cache time-to-live in seconds for tasks without their own
    #[arg(short = 't', long, default_value_t = 60)]
    ttl: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .with_target(false)
        .init();

    info!(config = %cli.config.display(), "loading configuration");
    let config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!(path = %cli.config.display(), error = %err, "cannot load config file");
            return ExitCode::from(2);
        }
    };

    let mut engine = match Engine::new(&config, Duration::from_secs(cli.ttl)) {
        Ok(engine) => engine,
        Err(err) => {
            error!(error = %err, "configuration rejected");
            return ExitCode::from(2);
        }
    };

    engine.register_action("log", Arc::new(LogAction));

    engine.start();
    info!("vigil running, press Ctrl+C to stop");

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }

    engine.shutdown().await;
    ExitCode::SUCCESS
}
