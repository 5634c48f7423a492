//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Worker configuration.
#[derive(Debug, Clone, Default)]
pub struct WorkerConfig {
    /// Emit JSON logs instead of coloured text
    pub json_logs: bool,
    /// Prometheus listener address; metrics are not exported when unset
    pub metrics_addr: Option<SocketAddr>,
    /// Config file handed to the generator for every job
    pub config_override: Option<PathBuf>,
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            json_logs: std::env::var("LOG_FORMAT")
                .map(|v| v.to_lowercase() == "json")
                .unwrap_or(false),
            metrics_addr: std::env::var("METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
            config_override: std::env::var_os("RENDER_CONFIG_OVERRIDE")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }
}
