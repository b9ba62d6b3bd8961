//! approvald - Approval workflow daemon
//!
//! Loads workflow definitions and the actor directory, then runs the
//! escalation sweep, notification dispatch and completion callback
//! workers until shut down.

use approval_daemon::{DaemonConfig, DaemonError, DaemonResult, Service};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// approvald CLI
#[derive(Parser)]
#[command(name = "approvald")]
#[command(about = "Approval workflow daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "APPROVAL_CONFIG")]
    config: Option<String>,

    /// Workflow definitions file (JSON array)
    #[arg(short, long, env = "APPROVAL_DEFINITIONS")]
    definitions: Option<String>,

    /// Actor directory file (JSON object keyed by tenant)
    #[arg(long, env = "APPROVAL_DIRECTORY")]
    directory: Option<String>,

    /// Log level
    #[arg(long, env = "APPROVAL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "APPROVAL_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // Override with CLI args
    if cli.definitions.is_some() {
        config.data.definitions = cli.definitions;
    }
    if cli.directory.is_some() {
        config.data.directory = cli.directory;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Print startup banner
    println!(
        r#"
  approvald - Approval Workflow Daemon
  Version: {}
  Definitions: {}
  Directory: {}
  Sweep interval: {}s
"#,
        env!("CARGO_PKG_VERSION"),
        config.data.definitions.as_deref().unwrap_or("(none)"),
        config.data.directory.as_deref().unwrap_or("(none)"),
        config.engine.escalation_sweep_interval_secs
    );

    let service = Service::new(config)?;
    service.run().await
}
