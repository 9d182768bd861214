//! Device entries

use crate::queue::{OverflowPolicy, DEFAULT_QUEUE_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One controller the bridge talks to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Id referenced by nodes
    pub id: String,

    /// Hostname or IP address
    pub address: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Client certificate, if the controller requires one
    #[serde(default)]
    pub public_cert_path: Option<PathBuf>,

    /// CA certificate used to verify non-localhost controllers
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,

    /// Entries the request queue holds, including the in-flight one
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl DeviceConfig {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            api_key: None,
            public_cert_path: None,
            ca_cert_path: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
        }
    }

    /// Trimmed, lower-cased address
    pub fn normalized_address(&self) -> String {
        self.address.trim().to_lowercase()
    }

    pub fn is_localhost(&self) -> bool {
        self.normalized_address() == "localhost"
    }

    /// Problems that will make requests to this device fail
    ///
    /// These do not prevent the connection from being created; requests
    /// surface the resulting failures through the node status.
    pub fn problems(&self) -> Vec<String> {
        let address = self.normalized_address();
        let mut problems = Vec::new();

        if self.api_key.as_deref().map_or(true, |k| k.is_empty()) {
            problems.push(format!("Missing API key for {}", address));
        }

        let has_ca = self
            .ca_cert_path
            .as_ref()
            .is_some_and(|p| !p.as_os_str().is_empty());
        if !self.is_localhost() && !has_ca {
            problems.push(format!("Missing SSL CA certificate for {}", address));
        }

        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_localhost_needs_only_api_key() {
        let mut device = DeviceConfig::new("d", "  LOCALHOST");
        assert!(device.is_localhost());
        assert_eq!(device.problems(), vec!["Missing API key for localhost".to_string()]);

        device.api_key = Some("key".into());
        assert!(device.problems().is_empty());
    }

    #[test]
    fn test_remote_needs_ca_cert() {
        let mut device = DeviceConfig::new("d", "10.0.0.5");
        device.api_key = Some("key".into());
        assert_eq!(
            device.problems(),
            vec!["Missing SSL CA certificate for 10.0.0.5".to_string()]
        );

        device.ca_cert_path = Some(PathBuf::from("/etc/ca.pem"));
        assert!(device.problems().is_empty());
    }

    #[test]
    fn test_defaults_from_toml() {
        let device: DeviceConfig = toml::from_str("id = \"d\"\naddress = \"x\"").unwrap();
        assert_eq!(device.queue_capacity, 50);
        assert_eq!(device.overflow_policy, OverflowPolicy::RejectNew);

        let device: DeviceConfig =
            toml::from_str("id = \"d\"\naddress = \"x\"\noverflow_policy = \"DROP_OLDEST\"").unwrap();
        assert_eq!(device.overflow_policy, OverflowPolicy::DropOldest);
    }
}
