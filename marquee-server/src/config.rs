use std::net::SocketAddr;
use std::path::Path;

use anyhow::Context;
use marquee_core::CoreConfig;
use serde::{Deserialize, Serialize};

/// Full server configuration: HTTP listener settings plus the task-execution
/// core's knobs. Loaded from an optional TOML file; every field has a
/// default so a bare deployment starts without one.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: HttpConfig,
    #[serde(default)]
    pub core: CoreConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("read config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parse config file {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "invalid listen address {}:{}",
                    self.server.host, self.server.port
                )
            })
    }
}
