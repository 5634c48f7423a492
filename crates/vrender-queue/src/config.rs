//! Queue configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Queue and job execution configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Directory under which job workspaces are created
    pub temp_root: PathBuf,
    /// Wait after SIGTERM before processes are killed
    pub grace_period: Duration,
    /// How long to wait for output streams to close after the processes exit
    pub drain_timeout: Duration,
    /// Diagnostic lines kept per process for failure messages
    pub diagnostic_lines: usize,
    /// Progress samples in the fps moving average
    pub fps_window: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            temp_root: std::env::temp_dir().join("vrender"),
            grace_period: Duration::from_millis(5000),
            drain_timeout: Duration::from_millis(2000),
            diagnostic_lines: 20,
            fps_window: 10,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            temp_root: std::env::var_os("RENDER_TEMP_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_root),
            grace_period: env_millis("RENDER_GRACE_PERIOD_MS").unwrap_or(defaults.grace_period),
            drain_timeout: env_millis("RENDER_DRAIN_TIMEOUT_MS").unwrap_or(defaults.drain_timeout),
            diagnostic_lines: std::env::var("RENDER_DIAGNOSTIC_LINES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.diagnostic_lines),
            fps_window: std::env::var("RENDER_FPS_WINDOW")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n >= 2)
                .unwrap_or(defaults.fps_window),
        }
    }

    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = root.into();
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}
