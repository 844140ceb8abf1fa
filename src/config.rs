use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Config file checked when the `CONFIG` variable is not set.
const DEFAULT_CONFIG_PATH: &str = "relay6.yaml";

fn default_listen_addr() -> String {
    "[::1]:7245".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Endpoint the relay listens on, e.g. `[2001:db8::1]:7245`.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Loopback port traffic is forwarded to. Defaults to the listen port.
    pub target_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            target_port: None,
        }
    }
}

impl Config {
    /// Loads configuration from the YAML file named by `CONFIG` (falling
    /// back to `relay6.yaml` when present), then applies the `LISTEN` and
    /// `TARGET_PORT` environment overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var("CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(DEFAULT_CONFIG_PATH)?
            }
            Err(_) => Self::default(),
        };

        if let Ok(addr) = std::env::var("LISTEN") {
            cfg.listen_addr = addr;
        }
        if let Ok(port) = std::env::var("TARGET_PORT") {
            cfg.target_port = Some(port.parse().context("invalid TARGET_PORT")?);
        }

        Ok(cfg)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path}"))?;
        serde_yaml::from_str(&contents).with_context(|| format!("failed to parse {path}"))
    }

    /// The resolved bind endpoint.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .with_context(|| format!("invalid listen address '{}'", self.listen_addr))
    }

    /// The loopback port to forward to, falling back to the listen port.
    pub fn target_port(&self) -> Result<u16> {
        match self.target_port {
            Some(port) => Ok(port),
            None => Ok(self.bind_addr()?.port()),
        }
    }
}
