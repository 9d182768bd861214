//! Configuration module for the bridge
//!
//! The bridge is configured from a single TOML file describing the devices and
//! the nodes wired to them:
//!
//! - `[logging]` - log filter and optional log directory
//! - `[[devices]]` - one entry per controller (address, credentials, queue)
//! - `[[input_nodes]]`, `[[read_nodes]]`, `[[write_nodes]]` - the flow nodes
//!
//! Node fields mirror what a flow editor form produces, so numeric fields
//! accept either numbers or strings and fall back to defaults when they cannot
//! be parsed. [`nodes`] turns these raw entries into typed settings.
//!
//! # Config Location
//!
//! Without `--config` the file is looked up in the platform config directory:
//! - **Linux**: `~/.config/groov-io-bridge/bridge.toml`
//! - **macOS**: `~/Library/Application Support/groov-io-bridge/bridge.toml`
//! - **Windows**: `%APPDATA%\groov-io-bridge\bridge.toml`
//!
//! # Example
//!
//! ```ignore
//! use groov_io_bridge::config::BridgeConfig;
//!
//! let config = BridgeConfig::load("bridge.toml")?;
//! for device in &config.devices {
//!     println!("{} -> {}", device.id, device.normalized_address());
//! }
//! ```

pub mod device;
pub mod nodes;

pub use device::DeviceConfig;
pub use nodes::{
    ChannelAddr, InputNodeConfig, InputSettings, InputSource, Lenient, MmpSpec, NodeCommon,
    ReadNodeConfig, ReadSettings, ReadTarget, ValueSource, ValueTarget, WriteNodeConfig,
    WriteSettings, WriteTarget,
};

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Directory name under the platform config dir
pub const APP_DIR: &str = "groov-io-bridge";

/// Config filename
pub const CONFIG_FILE: &str = "bridge.toml";

/// Log filter used when neither `RUST_LOG` nor the config sets one
pub const DEFAULT_LOG_FILTER: &str = "info,groov_io_bridge=debug";

/// Default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_DIR).join(CONFIG_FILE))
}

// ==================== Logging ====================

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive string; `RUST_LOG` takes precedence
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Directory for a daily rolling log file; none logs to stderr only
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Log file name prefix
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

fn default_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn default_file_prefix() -> String {
    "groov-io-bridge.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            directory: None,
            file_prefix: default_file_prefix(),
        }
    }
}

// ==================== Bridge Config ====================

/// Complete bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    #[serde(default)]
    pub input_nodes: Vec<InputNodeConfig>,

    #[serde(default)]
    pub read_nodes: Vec<ReadNodeConfig>,

    #[serde(default)]
    pub write_nodes: Vec<WriteNodeConfig>,
}

impl BridgeConfig {
    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!(
            "Loaded {} devices and {} nodes from {}",
            config.devices.len(),
            config.node_count(),
            path.display()
        );
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BridgeError::Config(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BridgeError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }
        std::fs::write(path.as_ref(), content)
            .map_err(|e| BridgeError::Config(format!("Failed to write config: {}", e)))
    }

    /// Reject duplicate device ids and duplicate node ids
    ///
    /// Nodes referencing unknown devices are accepted here; they become inert
    /// nodes at build time, the same as a node whose device was deleted.
    pub fn validate(&self) -> Result<()> {
        let mut devices = HashSet::new();
        for device in &self.devices {
            if device.id.trim().is_empty() {
                return Err(BridgeError::Config("Device with empty id".to_string()));
            }
            if !devices.insert(device.id.as_str()) {
                return Err(BridgeError::Config(format!(
                    "Duplicate device id '{}'",
                    device.id
                )));
            }
        }

        let mut nodes = HashSet::new();
        for id in self.node_ids() {
            if id.trim().is_empty() {
                return Err(BridgeError::Config("Node with empty id".to_string()));
            }
            if !nodes.insert(id) {
                return Err(BridgeError::Config(format!("Duplicate node id '{}'", id)));
            }
        }
        Ok(())
    }

    /// Ids of every configured node, inputs first
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.input_nodes
            .iter()
            .map(|n| n.common.id.as_str())
            .chain(self.read_nodes.iter().map(|n| n.common.id.as_str()))
            .chain(self.write_nodes.iter().map(|n| n.common.id.as_str()))
    }

    pub fn node_count(&self) -> usize {
        self.input_nodes.len() + self.read_nodes.len() + self.write_nodes.len()
    }

    /// Device entry by id
    pub fn device(&self, id: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.id == id)
    }
}
