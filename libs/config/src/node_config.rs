//! Node Configuration Module
//!
//! Loads a node's settings from an optional TOML file with environment
//! variable overrides (`TART__NODE__PORT=7001`, `TART__TCP__CONNECT_TIMEOUT_MS=250`).

use crate::logging::LoggingConfig;
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat, Map};
use network::{TcpSettings, TransportConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "TART";

/// Complete configuration for one node
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSettings,
    pub tcp: TcpSettings,
    pub logging: LoggingConfig,
}

/// Identity and listen address of the node's membrane
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct NodeSettings {
    pub name: String,
    /// `tcp` or `null`
    pub protocol: String,
    pub ip: String,
    /// 0 binds an ephemeral port
    pub port: u16,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: "node".to_string(),
            protocol: TransportConfig::TCP.to_string(),
            ip: "127.0.0.1".to_string(),
            port: 0,
        }
    }
}

impl NodeConfig {
    /// Load from `path` (if given) with overrides from the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load with an explicit set of environment variables in place of the
    /// process environment
    pub fn load_with_env(path: Option<&Path>, env: Option<Map<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                bail!("Configuration file not found: {}", path.display());
            }
            info!("Loading node config: {:?}", path);
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: Self = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        debug!(node = %config.node.name, protocol = %config.node.protocol, "node config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node.name.is_empty() {
            bail!("node.name must not be empty");
        }
        match self.node.protocol.as_str() {
            TransportConfig::TCP => {
                if self.node.ip.is_empty() {
                    bail!("node.ip must not be empty for the tcp protocol");
                }
            }
            TransportConfig::NULL => {}
            other => bail!("Unsupported protocol: {}", other),
        }
        if self.tcp.max_frame_bytes == 0 {
            bail!("tcp.max_frame_bytes must be positive");
        }
        Ok(())
    }

    /// The membrane's own transport config
    pub fn transport_config(&self) -> Result<TransportConfig> {
        match self.node.protocol.as_str() {
            TransportConfig::TCP => Ok(TransportConfig::tcp(self.node.ip.clone(), self.node.port)),
            TransportConfig::NULL => Ok(TransportConfig::null(self.node.name.clone())),
            other => bail!("Unsupported protocol: {}", other),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

/// Convenience function to load configuration from the process environment
pub fn load_config(path: Option<&Path>) -> Result<NodeConfig> {
    NodeConfig::load(path)
}
