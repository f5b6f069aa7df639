//! Server configuration.
//!
//! Loading flow:
//! 1. Start with [`ServerConfig::default()`]
//! 2. If a config file is given, deep-merge its values over the defaults
//! 3. Apply `GROUND_*` environment variable overrides
//!
//! CLI flags are applied by the binary on top of the result.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ground_fanout::HandshakeConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration for the ground-control server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// SQLite file holding samples.
    pub db_path: PathBuf,
    /// Endpoint the launch command is forwarded to.
    pub launch_pad_url: String,
    /// Timeout for the forwarded launch command.
    pub command_timeout_secs: u64,
    /// Samples replayed to a new live subscriber.
    pub replay_limit: u32,
    /// Cap on history query results.
    pub history_limit: u32,
    /// Per-subscriber queue; a subscriber that falls this far behind is dropped.
    pub max_send_queue: usize,
    /// WebSocket ping interval.
    pub heartbeat_interval_secs: u64,
    /// A live subscriber whose socket does not accept a frame within this
    /// window is closed.
    pub send_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            db_path: ground_telemetry::data_dir()
                .join("database")
                .join("samples.db"),
            launch_pad_url: "http://localhost:9000/launch".into(),
            command_timeout_secs: 10,
            replay_limit: 50,
            history_limit: 50,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            send_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs.max(1))
    }

    pub fn handshake(&self) -> HandshakeConfig {
        HandshakeConfig {
            replay_limit: self.replay_limit,
            queue_capacity: self.max_send_queue,
            send_timeout: self.send_timeout(),
            ..HandshakeConfig::default()
        }
    }

    /// Load configuration, optionally from a JSON file, with env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = serde_json::to_value(Self::default())?;

        let merged = match path {
            Some(path) => {
                debug!(?path, "loading config file");
                let content = std::fs::read_to_string(path)?;
                let user: Value = serde_json::from_str(&content)?;
                deep_merge(defaults, user)
            }
            None => defaults,
        };

        let mut config: Self = serde_json::from_value(merged)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `GROUND_*` overrides. Invalid values are logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let ranged = |name: &str, min: u64, max: u64| {
            let raw = lookup(name)?;
            let parsed = parse_u64_range(&raw, min, max);
            if parsed.is_none() {
                warn!(key = name, value = %raw, "invalid numeric env var, ignoring");
            }
            parsed
        };

        if let Some(v) = string("GROUND_HOST") {
            self.host = v;
        }
        if let Some(v) = ranged("GROUND_PORT", 1, u64::from(u16::MAX)) {
            self.port = v as u16;
        }
        if let Some(v) = string("GROUND_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = string("GROUND_LAUNCH_PAD_URL") {
            self.launch_pad_url = v;
        }
        if let Some(v) = ranged("GROUND_COMMAND_TIMEOUT_SECS", 1, 300) {
            self.command_timeout_secs = v;
        }
        if let Some(v) = ranged("GROUND_REPLAY_LIMIT", 1, 1000) {
            self.replay_limit = v as u32;
        }
        if let Some(v) = ranged("GROUND_HISTORY_LIMIT", 1, 1000) {
            self.history_limit = v as u32;
        }
        if let Some(v) = ranged("GROUND_MAX_SEND_QUEUE", 1, 65_536) {
            self.max_send_queue = v as usize;
        }
        if let Some(v) = ranged("GROUND_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
            self.heartbeat_interval_secs = v;
        }
        if let Some(v) = ranged("GROUND_SEND_TIMEOUT_SECS", 1, 300) {
            self.send_timeout_secs = v;
        }
    }
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, anything else is replaced by `source`. Nulls in
/// `source` keep the target value.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}
