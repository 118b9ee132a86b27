//! Vigil Daemon - streaming telemetry processor
//!
//! The Vigil daemon provides:
//! - Tumbling-window aggregation of device metrics
//! - Online z-score anomaly detection and alerting
//! - Live alert/metric/status push over WebSocket
//! - Health, status and Prometheus endpoints

use clap::Parser;
use vigil_daemon::config::DaemonConfig;
use vigil_daemon::error::{DaemonError, DaemonResult};
use vigil_daemon::logging::init_tracing;
use vigil_daemon::server::Server;

/// Vigil Daemon CLI
#[derive(Parser)]
#[command(name = "vigild")]
#[command(about = "Vigil Daemon - streaming telemetry aggregation and anomaly detection", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "VIGIL_CONFIG")]
    config: Option<String>,

    /// Listen address (overrides the configuration file)
    #[arg(short, long, env = "VIGIL_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level (overrides the configuration file)
    #[arg(long, env = "VIGIL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "VIGIL_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())?;

    // Override with CLI args
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }

    // Initialize tracing
    init_tracing(&config.logging.level, config.logging.json)?;

    // Print startup banner
    println!(
        r#"
 __     ___       _ _
 \ \   / (_) __ _(_) |
  \ \ / /| |/ _` | | |
   \ V / | | (_| | | |
    \_/  |_|\__, |_|_|
            |___/

  Vigil - Telemetry Aggregation & Anomaly Detection
  Version: {}
  Source: {:?}
  Listening: {}
"#,
        env!("CARGO_PKG_VERSION"),
        config.stream.source,
        config.server.listen_addr
    );

    // Create and run server
    let server = Server::new(config).await?;
    server.run().await
}
