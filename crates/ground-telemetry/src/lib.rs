//! Logging setup shared by the server binary and the simulator.

use std::path::PathBuf;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Level for the HTTP request spans emitted by `tower_http`.
    pub http_level: Level,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            http_level: Level::WARN,
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Filter directive string, e.g. `info,tower_http=warn`.
    pub fn filter_directives(&self) -> String {
        format!(
            "{},tower_http={}",
            self.log_level.to_string().to_lowercase(),
            self.http_level.to_string().to_lowercase()
        )
    }
}

/// Install the global subscriber. Call once at startup; later calls only
/// report that a subscriber is already set.
pub fn init_telemetry(config: &TelemetryConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    if let Err(e) = tracing_subscriber::registry().with(fmt_layer).try_init() {
        eprintln!("ground-telemetry: subscriber already installed: {e}");
    }
}

/// Base directory for local state (`~/.ground-control`).
pub fn data_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".ground-control")
}
