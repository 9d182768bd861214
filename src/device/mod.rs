//! Device client seam
//!
//! The REST client that talks to the controller is an external collaborator.
//! This module defines the narrow interface the bridge consumes from it, the
//! failure type every call can produce, and the registry that hands one shared
//! client and request queue to every node that references a device.
//!
//! # Main Types
//!
//! - [`DeviceApi`] - Async device operations, one method per REST endpoint used
//! - [`RequestError`] - Transport or protocol failure of one request
//! - [`registry::ConnectionRegistry`] - Device id to connection map
//! - [`simulated::SimulatedDevice`] - In-memory controller for tests and the CLI

pub mod registry;
pub mod simulated;

use crate::types::MmpType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use registry::{ConnectionRegistry, DeviceConnection};
pub use simulated::SimulatedDevice;

/// Failure of a single device request
///
/// Never returned to flow-side callers: nodes route it through
/// [`crate::classify::handle_error_response`] and surface it as a status.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    /// The request did not complete at the socket/TLS level
    #[error("transport error {code}")]
    Transport {
        code: String,
        syscall: Option<String>,
    },

    /// The controller answered with a non-success status
    #[error("HTTP status {status}")]
    Protocol { status: u16, body: String },

    /// A failure that only carries a human readable reason
    #[error("{0}")]
    Reason(String),

    /// Anything else
    #[error("unknown request failure")]
    Opaque,
}

impl RequestError {
    /// Transport failure without a syscall
    pub fn transport(code: impl Into<String>) -> Self {
        RequestError::Transport {
            code: code.into(),
            syscall: None,
        }
    }

    /// Transport failure raised by a given syscall
    pub fn transport_from(code: impl Into<String>, syscall: impl Into<String>) -> Self {
        RequestError::Transport {
            code: code.into(),
            syscall: Some(syscall.into()),
        }
    }

    /// Protocol failure with an empty body
    pub fn status(status: u16) -> Self {
        RequestError::Protocol {
            status,
            body: String::new(),
        }
    }

    /// JSON shape attached to the logged context message
    pub fn to_json(&self) -> Value {
        match self {
            RequestError::Transport { code, syscall } => {
                let mut obj = serde_json::Map::new();
                obj.insert("code".to_string(), Value::String(code.clone()));
                if let Some(syscall) = syscall {
                    obj.insert("syscall".to_string(), Value::String(syscall.clone()));
                }
                Value::Object(obj)
            }
            RequestError::Protocol { status, body } => serde_json::json!({
                "statusCode": status,
                "body": body,
            }),
            RequestError::Reason(reason) => serde_json::json!({ "reason": reason }),
            RequestError::Opaque => Value::Null,
        }
    }
}

/// Result of one device call: the response body or the failure
pub type DeviceResult = std::result::Result<Value, RequestError>;

/// Body of an MMP write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmpWrite {
    pub value: Value,
    #[serde(rename = "type")]
    pub mmp_type: MmpType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl MmpWrite {
    /// Build the body; the encoding is only sent for string addresses
    pub fn new(value: Value, mmp_type: MmpType, encoding: Option<&str>) -> Self {
        let encoding = match mmp_type {
            MmpType::String => encoding.map(str::to_string),
            _ => None,
        };
        Self {
            value,
            mmp_type,
            encoding,
        }
    }
}

/// Operations the bridge performs against one controller
///
/// Every call resolves to the JSON response body. Indices are zero based.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// `{state, onLatchState, offLatchState, featureValue, ...}`
    async fn digital_channel_status(&self, module: u32, channel: u32) -> DeviceResult;

    /// `{value, minValue, maxValue, ...}`
    async fn analog_channel_status(&self, module: u32, channel: u32) -> DeviceResult;

    async fn channel_configuration(&self, module: u32, channel: u32) -> DeviceResult;

    /// `{channelValues: [bool...]}`
    async fn module_digital_values(&self, module: u32) -> DeviceResult;

    /// `{channelValues: [f64...]}`
    async fn module_analog_values(&self, module: u32) -> DeviceResult;

    /// `{qualityMask}`
    async fn module_quality(&self) -> DeviceResult;

    /// `{mmpValues: [...]}`
    async fn mmp_values(
        &self,
        address: String,
        mmp_type: MmpType,
        length: u32,
        encoding: Option<String>,
    ) -> DeviceResult;

    async fn set_digital_state(&self, module: u32, channel: u32, value: Value) -> DeviceResult;

    async fn set_analog_value(&self, module: u32, channel: u32, value: Value) -> DeviceResult;

    async fn clear_on_latch(&self, module: u32, channel: u32) -> DeviceResult;

    async fn clear_off_latch(&self, module: u32, channel: u32) -> DeviceResult;

    async fn clear_feature_value(&self, module: u32, channel: u32) -> DeviceResult;

    async fn clear_analog_min(&self, module: u32, channel: u32) -> DeviceResult;

    async fn clear_analog_max(&self, module: u32, channel: u32) -> DeviceResult;

    async fn set_counter_active(&self, module: u32, channel: u32, active: bool) -> DeviceResult;

    async fn write_channel_configuration(
        &self,
        module: u32,
        channel: u32,
        config: Value,
    ) -> DeviceResult;

    async fn write_mmp_value(&self, address: String, body: MmpWrite) -> DeviceResult;
}
