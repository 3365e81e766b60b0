//! udpgate - UDP Reverse Proxy
//!
//! This is the main entry point for the udpgate application.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use udpgate::config::load_config;
use udpgate::proxy::run_proxy;

/// udpgate - UDP reverse proxy with per-flow backend sessions
#[derive(Parser, Debug)]
#[command(name = "udpgate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,

    /// Logging preset
    #[arg(long, value_enum, default_value_t = LogPreset::Production)]
    log_preset: LogPreset,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogPreset {
    /// Debug level, human-readable output
    Development,
    /// Info level, JSON output
    Production,
}

impl LogPreset {
    fn level(self) -> &'static str {
        match self {
            LogPreset::Development => "debug",
            LogPreset::Production => "info",
        }
    }

    fn json(self) -> bool {
        self == LogPreset::Production
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let level = args
        .log_level
        .as_deref()
        .unwrap_or_else(|| args.log_preset.level());
    setup_logging(level, args.json_log || args.log_preset.json())?;

    // Load configuration
    let config = load_config(&args.config)?;

    info!("udpgate v{}", udpgate::VERSION);
    info!("Configuration loaded from: {:?}", args.config);
    info!("Listening on: {}", config.proxy.listen_addr);
    info!("Idle timeout: {}s", config.proxy.idle_timeout);

    // Setup shutdown signal
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    // Handle Ctrl+C and termination signals (cross-platform)
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate())
                .expect("Failed to setup SIGTERM handler");

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down...");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down...");
        }

        let _ = shutdown_tx_clone.send(true);
    });

    run_proxy(config, shutdown_rx).await
}

/// Setup logging; `RUST_LOG` overrides the level when set
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
