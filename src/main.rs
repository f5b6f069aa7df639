use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ground_core::SessionId;
use ground_server::ServerConfig;
use ground_store::{Database, SampleStore, SqliteSampleStore};
use ground_telemetry::{init_telemetry, TelemetryConfig};
use tracing::Level;

mod simulate;

/// Telemetry ingestion with live per-session fan-out.
#[derive(Parser, Debug)]
#[command(name = "ground-control", about = "Ground control telemetry server")]
struct Cli {
    /// Emit JSON log lines.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Default log level (`RUST_LOG` takes precedence).
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP/WebSocket server (default).
    Serve(ServeArgs),
    /// Post simulated launch telemetry to a running server.
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// JSON config file merged over the defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the samples database.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

impl ServeArgs {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(path) = &self.db_path {
            config.db_path.clone_from(path);
        }
    }
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Ingestion endpoint.
    #[arg(long, default_value = "http://localhost:8000/events/")]
    url: String,

    /// Milliseconds between samples.
    #[arg(long, default_value = "500")]
    interval_ms: u64,

    /// Session identifier (defaults to `sim-<unix seconds>`).
    #[arg(long)]
    session: Option<String>,

    /// Stop after this many samples.
    #[arg(long)]
    count: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_telemetry(&TelemetryConfig {
        log_level: cli.log_level,
        json: cli.json_logs,
        ..TelemetryConfig::default()
    });

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => serve(args).await,
        Command::Simulate(args) => {
            let session = args
                .session
                .map(SessionId::from_raw)
                .unwrap_or_else(simulate::default_session);
            simulate::run(
                &args.url,
                Duration::from_millis(args.interval_ms.max(1)),
                session,
                args.count,
            )
            .await
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut config = ServerConfig::load(args.config.as_deref()).context("Failed to load config")?;
    args.apply(&mut config);

    let db = Database::open(&config.db_path)
        .with_context(|| format!("Failed to open database: {}", config.db_path.display()))?;
    let store: Arc<dyn SampleStore> = Arc::new(SqliteSampleStore::new(db));

    let handle = ground_server::start(config, store)
        .await
        .context("Failed to start server")?;
    tracing::info!(port = handle.port(), "ground-control ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown();
    handle.join().await;
    Ok(())
}
