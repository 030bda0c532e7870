use anyhow::{Context, bail};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::proxy::upstream::UpstreamProxy;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub buffers: BufferConfig,
    pub upstream: UpstreamConfig,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Longest request or response head accepted.
    pub max_head_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            max_head_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub segment_size: usize,
    /// Returned buffers kept for reuse.
    pub pool_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            segment_size: 4096,
            pool_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// e.g. `http://10.0.0.1:3128`
    pub proxy: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_secs: u64,
    /// Longest wait for the next bytes from a client or origin.
    pub read_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            read_secs: 30,
        }
    }
}

impl Config {
    /// Reads the file named by `TAPLINE_CONFIG` if set, then applies the
    /// `LISTEN` override.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("TAPLINE_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(listen_addr) = std::env::var("LISTEN") {
            cfg.server.listen_addr = listen_addr;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        Self::from_yaml(&content).with_context(|| format!("loading config file {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(content).context("invalid YAML configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.connect_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.read_secs)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.buffers.segment_size == 0 {
            bail!("buffers.segment_size must be greater than zero");
        }
        if self.server.max_head_bytes == 0 {
            bail!("server.max_head_bytes must be greater than zero");
        }
        if self.timeouts.connect_secs == 0 {
            bail!("timeouts.connect_secs must be greater than zero");
        }
        if self.timeouts.read_secs == 0 {
            bail!("timeouts.read_secs must be greater than zero");
        }
        if let Some(proxy) = &self.upstream.proxy {
            UpstreamProxy::parse(proxy).context("upstream.proxy")?;
        }
        Ok(())
    }
}
