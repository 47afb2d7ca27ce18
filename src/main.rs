use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use aps_telemetry::TelemetryConfig;

/// HTTP service that runs the dosing calculation pipeline for in-memory
/// patient sessions.
#[derive(Debug, Parser)]
#[command(name = "aps", version)]
struct Cli {
    /// Port to listen on.
    #[arg(long, env = "APS_PORT", default_value_t = 3000)]
    port: u16,

    /// Directory for per-patient calculation logs.
    #[arg(long, env = "APS_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,

    /// Default log level. RUST_LOG takes precedence when set.
    #[arg(long, env = "APS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = TelemetryConfig::parse_level(&cli.log_level)
        .with_context(|| format!("unknown log level '{}'", cli.log_level))?;
    aps_telemetry::init_telemetry(&TelemetryConfig {
        log_level,
        json: cli.json_logs,
        ..Default::default()
    })?;

    tracing::info!("Starting APS server");

    let config = aps_server::ServerConfig {
        port: cli.port,
        log_dir: cli.log_dir,
    };
    let handle = aps_server::start(config)
        .await
        .context("failed to start server")?;

    tracing::info!(port = handle.port, "APS server ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}
