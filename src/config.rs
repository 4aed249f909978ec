//! Configuration loaded from YAML.
//!
//! ```yaml
//! engine:
//!   pool:
//!     capacity: 1000
//!     prefill: 64
//!     buffer_size: 4096
//!   breaker:
//!     threshold: 5
//!     cooldown_ms: 10000
//!   hook_mode: isolated
//! listeners:
//!   - protocol: http
//!     port: 8080
//!   - protocol: tcp
//!     port: 9000
//!     host: 0.0.0.0
//!     frame_responses: false
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;

use crate::dispatch::HookMode;
use crate::server::ListenOptions;

/// Environment variable the host binary reads the config path from.
pub const CONFIG_ENV: &str = "JUNCTION_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub listeners: Vec<ListenerConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pool: PoolConfig,
    pub breaker: BreakerConfig,
    pub hook_mode: HookMode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub capacity: usize,
    pub prefill: usize,
    pub buffer_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: crate::dispatch::pool::DEFAULT_CAPACITY,
            prefill: 64,
            buffer_size: crate::dispatch::pool::DEFAULT_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub threshold: u32,
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: crate::dispatch::breaker::DEFAULT_THRESHOLD,
            cooldown_ms: crate::dispatch::breaker::DEFAULT_COOLDOWN.as_millis() as u64,
        }
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    /// Registered protocol name (`http`, `http2`, `tcp`, `udp`, `ws`).
    pub protocol: String,
    pub port: u16,
    #[serde(flatten)]
    pub options: ListenOptions,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(yaml).context("Invalid configuration")
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&raw)
    }

    /// Loads the file named by `JUNCTION_CONFIG`, or the defaults when the
    /// variable is unset.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(path),
            Err(_) => Ok(Self::default()),
        }
    }
}
