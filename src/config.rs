/*!
 * Runtime Configuration
 * Tunables for spawning, polling and output capture
 *
 * Sources, later ones win:
 * - built-in defaults
 * - JSON file named by PROCMUX_CONFIG
 * - PROCMUX_WAIT_POLL_US, PROCMUX_OUTPUT_POLL_MS, PROCMUX_TIMEOUT_PROGRAM,
 *   PROCMUX_SHELL, PROCMUX_READ_CHUNK
 */

use crate::core::errors::{ProcessError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Default sleep between `wait()` polls
pub const DEFAULT_WAIT_POLL_US: u64 = 10_000;

/// Default upper bound for one readiness wait during live iteration
pub const DEFAULT_OUTPUT_POLL_MS: u64 = 50;

/// Default bytes read from a pipe per syscall
pub const DEFAULT_READ_CHUNK: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RuntimeConfig {
    pub wait_poll_interval_us: u64,
    pub output_poll_timeout_ms: u64,
    /// External time-limiting wrapper
    pub timeout_program: String,
    /// Interpreter for shell-string commands
    pub shell: String,
    pub read_chunk_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            wait_poll_interval_us: DEFAULT_WAIT_POLL_US,
            output_poll_timeout_ms: DEFAULT_OUTPUT_POLL_MS,
            timeout_program: "timeout".to_string(),
            shell: "/bin/sh".to_string(),
            read_chunk_size: DEFAULT_READ_CHUNK,
        }
    }
}

impl RuntimeConfig {
    /// Defaults, then the optional JSON file, then environment overrides
    pub fn load() -> Result<Self> {
        let base = match std::env::var("PROCMUX_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        Ok(base.with_env_overrides())
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ProcessError::InvalidConfig(format!("config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ProcessError::InvalidConfig(format!("reading {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loaded runtime config file");
        Self::from_json(&json)
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse::<u64>("PROCMUX_WAIT_POLL_US").filter(|v| *v > 0) {
            self.wait_poll_interval_us = v;
        }
        if let Some(v) = env_parse::<u64>("PROCMUX_OUTPUT_POLL_MS").filter(|v| *v > 0) {
            self.output_poll_timeout_ms = v;
        }
        if let Some(v) = env_parse::<usize>("PROCMUX_READ_CHUNK").filter(|v| *v > 0) {
            self.read_chunk_size = v;
        }
        if let Ok(v) = std::env::var("PROCMUX_TIMEOUT_PROGRAM") {
            self.timeout_program = v;
        }
        if let Ok(v) = std::env::var("PROCMUX_SHELL") {
            self.shell = v;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.read_chunk_size == 0 {
            return Err(ProcessError::InvalidConfig(
                "read_chunk_size must be > 0".into(),
            ));
        }
        if self.wait_poll_interval_us == 0 || self.output_poll_timeout_ms == 0 {
            return Err(ProcessError::InvalidConfig(
                "wait_poll_interval_us and output_poll_timeout_ms must be > 0".into(),
            ));
        }
        if self.timeout_program.trim().is_empty() || self.shell.trim().is_empty() {
            return Err(ProcessError::InvalidConfig(
                "timeout_program and shell must be set".into(),
            ));
        }
        Ok(())
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_micros(self.wait_poll_interval_us)
    }

    pub fn output_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.output_poll_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}
