//! Node entries
//!
//! Raw node entries keep the loose shape of a flow editor form: a `data_type`
//! string plus every field any data type might use. `resolve` turns an entry
//! into typed settings with one enum variant per data type, so the nodes can
//! match exhaustively and never see an unknown data type.

use crate::error::{BridgeError, Result};
use crate::scanner::ChangeType;
use crate::types::{MmpType, NodeId};
use serde::{Deserialize, Serialize};

/// Default deadband for analog and numeric inputs
pub const DEFAULT_DEADBAND: f64 = 1.0;

/// Scan interval used when the configured scan time cannot be parsed
pub const DEFAULT_SCAN_TIME_SEC: f64 = 0.5;

// ==================== Lenient Fields ====================

/// A number that may arrive as a string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Lenient {
    Number(f64),
    Text(String),
}

impl Lenient {
    /// Float value, parsing text
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Lenient::Number(n) if n.is_finite() => Some(*n),
            Lenient::Number(_) => None,
            Lenient::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }

    /// Integer value, truncating fractions
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Lenient::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| self.as_f64().map(|n| n.trunc() as i64))
                    .filter(|_| !s.is_empty())
            }
            Lenient::Number(_) => self.as_f64().map(|n| n.trunc() as i64),
        }
    }

    /// Non-negative index
    pub fn as_index(&self) -> Option<u32> {
        self.as_i64().and_then(|n| u32::try_from(n).ok())
    }
}

impl From<f64> for Lenient {
    fn from(value: f64) -> Self {
        Lenient::Number(value)
    }
}

impl From<&str> for Lenient {
    fn from(value: &str) -> Self {
        Lenient::Text(value.to_string())
    }
}

fn index_or(field: &Option<Lenient>, default: u32) -> u32 {
    field.as_ref().and_then(Lenient::as_index).unwrap_or(default)
}

// ==================== Shared Pieces ====================

/// Module and channel of one I/O point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelAddr {
    pub module: u32,
    pub channel: u32,
}

impl ChannelAddr {
    pub fn new(module: u32, channel: u32) -> Self {
        Self { module, channel }
    }
}

/// A memory-mapped address read or write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmpSpec {
    pub address: String,
    pub mmp_type: MmpType,
    pub length: u32,
    pub encoding: Option<String>,
}

impl MmpSpec {
    /// Whether a read returns a single element rather than a list
    pub fn is_scalar(&self) -> bool {
        self.mmp_type == MmpType::String || self.length == 1
    }
}

/// Fields every node entry has
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCommon {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Device id
    pub device: String,

    pub data_type: String,

    #[serde(default)]
    pub module_index: Option<Lenient>,

    #[serde(default)]
    pub channel_index: Option<Lenient>,

    #[serde(default)]
    pub mmp_address: Option<String>,

    #[serde(default)]
    pub mmp_type: MmpType,

    #[serde(default)]
    pub mmp_length: Option<Lenient>,

    #[serde(default)]
    pub mmp_encoding: Option<String>,
}

impl NodeCommon {
    fn channel(&self) -> ChannelAddr {
        ChannelAddr::new(index_or(&self.module_index, 0), index_or(&self.channel_index, 0))
    }

    fn module(&self) -> u32 {
        index_or(&self.module_index, 0)
    }

    fn mmp(&self) -> Result<MmpSpec> {
        let address = self
            .mmp_address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| self.invalid("mmp-address needs an mmp_address"))?;
        Ok(MmpSpec {
            address: address.to_string(),
            mmp_type: self.mmp_type,
            length: index_or(&self.mmp_length, 1).max(1),
            encoding: self.mmp_encoding.clone(),
        })
    }

    fn node_id(&self) -> NodeId {
        NodeId::new(self.id.clone())
    }

    fn invalid(&self, reason: impl std::fmt::Display) -> BridgeError {
        BridgeError::Config(format!("Node '{}': {}", self.id, reason))
    }

    fn unknown_data_type(&self) -> BridgeError {
        self.invalid(format!("unknown data type '{}'", self.data_type))
    }
}

// ==================== Input Nodes ====================

/// What an input node polls
#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
    DigitalState(ChannelAddr),
    DigitalTurnOn(ChannelAddr),
    DigitalTurnOff(ChannelAddr),
    DigitalOnLatch(ChannelAddr),
    DigitalOffLatch(ChannelAddr),
    DigitalFeatureValue(ChannelAddr),
    Analog(ChannelAddr),
    Mmp(MmpSpec),
}

impl InputSource {
    /// Data type name, emitted as `inputType`
    pub fn data_type(&self) -> &'static str {
        match self {
            InputSource::DigitalState(_) => "channel-digital-state",
            InputSource::DigitalTurnOn(_) => "channel-digital-turn-on",
            InputSource::DigitalTurnOff(_) => "channel-digital-turn-off",
            InputSource::DigitalOnLatch(_) => "channel-digital-on-latch",
            InputSource::DigitalOffLatch(_) => "channel-digital-off-latch",
            InputSource::DigitalFeatureValue(_) => "channel-digital-feature-value",
            InputSource::Analog(_) => "channel-analog",
            InputSource::Mmp(_) => "mmp-address",
        }
    }

    /// Response field holding the polled value
    pub fn value_field(&self) -> &'static str {
        match self {
            InputSource::DigitalState(_)
            | InputSource::DigitalTurnOn(_)
            | InputSource::DigitalTurnOff(_) => "state",
            InputSource::DigitalOnLatch(_) => "onLatchState",
            InputSource::DigitalOffLatch(_) => "offLatchState",
            InputSource::DigitalFeatureValue(_) => "featureValue",
            InputSource::Analog(_) => "value",
            InputSource::Mmp(_) => "mmpValues",
        }
    }

    /// Change policy for this source
    pub fn change_type(&self) -> ChangeType {
        match self {
            InputSource::DigitalState(_) => ChangeType::None,
            InputSource::DigitalTurnOn(_)
            | InputSource::DigitalOnLatch(_)
            | InputSource::DigitalOffLatch(_) => ChangeType::RisingEdgeOnly,
            InputSource::DigitalTurnOff(_) => ChangeType::FallingEdgeOnly,
            InputSource::DigitalFeatureValue(_) | InputSource::Analog(_) => ChangeType::Deadband,
            InputSource::Mmp(spec) if spec.mmp_type == MmpType::String => ChangeType::None,
            InputSource::Mmp(_) => ChangeType::Deadband,
        }
    }
}

/// Raw input node entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputNodeConfig {
    #[serde(flatten)]
    pub common: NodeCommon,

    /// Seconds between scans; zero or negative scans only on demand
    #[serde(default)]
    pub scan_time_sec: Option<Lenient>,

    #[serde(default)]
    pub deadband: Option<Lenient>,

    #[serde(default)]
    pub send_initial_value: bool,
}

/// Typed input node settings
#[derive(Debug, Clone, PartialEq)]
pub struct InputSettings {
    pub id: NodeId,
    pub name: Option<String>,
    pub device: String,
    pub source: InputSource,
    /// Zero or negative disables the timer
    pub scan_interval_ms: f64,
    /// Set only for deadband sources
    pub deadband: Option<f64>,
    pub send_initial_value: bool,
}

impl InputNodeConfig {
    pub fn resolve(&self) -> Result<InputSettings> {
        let common = &self.common;
        let source = match common.data_type.as_str() {
            "channel-digital-state" => InputSource::DigitalState(common.channel()),
            "channel-digital-turn-on" => InputSource::DigitalTurnOn(common.channel()),
            "channel-digital-turn-off" => InputSource::DigitalTurnOff(common.channel()),
            "channel-digital-on-latch" => InputSource::DigitalOnLatch(common.channel()),
            "channel-digital-off-latch" => InputSource::DigitalOffLatch(common.channel()),
            "channel-digital-feature-value" => InputSource::DigitalFeatureValue(common.channel()),
            "channel-analog" => InputSource::Analog(common.channel()),
            "mmp-address" => {
                let spec = common.mmp()?;
                if spec.length > 1 {
                    return Err(common.invalid(format!(
                        "input nodes read a single MMP value, got length {}",
                        spec.length
                    )));
                }
                InputSource::Mmp(spec)
            }
            _ => return Err(common.unknown_data_type()),
        };

        let scan_time_sec = self
            .scan_time_sec
            .as_ref()
            .and_then(Lenient::as_f64)
            .unwrap_or(DEFAULT_SCAN_TIME_SEC);

        let deadband = match source.change_type() {
            ChangeType::Deadband => Some(
                self.deadband
                    .as_ref()
                    .and_then(Lenient::as_f64)
                    .unwrap_or(DEFAULT_DEADBAND),
            ),
            _ => None,
        };

        Ok(InputSettings {
            id: common.node_id(),
            name: common.name.clone(),
            device: common.device.clone(),
            source,
            scan_interval_ms: scan_time_sec * 1000.0,
            deadband,
            send_initial_value: self.send_initial_value,
        })
    }
}

// ==================== Read Nodes ====================

/// What a read node fetches
#[derive(Debug, Clone, PartialEq)]
pub enum ReadTarget {
    Digital(ChannelAddr),
    Analog(ChannelAddr),
    ChannelConfig(ChannelAddr),
    ModuleDigital { module: u32 },
    ModuleAnalog { module: u32 },
    ModulesQuality,
    Mmp(MmpSpec),
}

impl ReadTarget {
    pub fn data_type(&self) -> &'static str {
        match self {
            ReadTarget::Digital(_) => "channel-digital",
            ReadTarget::Analog(_) => "channel-analog",
            ReadTarget::ChannelConfig(_) => "channel-config",
            ReadTarget::ModuleDigital { .. } => "module-digital",
            ReadTarget::ModuleAnalog { .. } => "module-analog",
            ReadTarget::ModulesQuality => "modules-quality",
            ReadTarget::Mmp(_) => "mmp-address",
        }
    }

    /// Response field holding the value; `None` means the whole body
    pub fn value_field(&self) -> Option<&'static str> {
        match self {
            ReadTarget::Digital(_) => Some("state"),
            ReadTarget::Analog(_) => Some("value"),
            ReadTarget::ChannelConfig(_) => None,
            ReadTarget::ModuleDigital { .. } | ReadTarget::ModuleAnalog { .. } => {
                Some("channelValues")
            }
            ReadTarget::ModulesQuality => Some("qualityMask"),
            ReadTarget::Mmp(_) => Some("mmpValues"),
        }
    }
}

/// Where a read result is stored in the message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueTarget {
    Payload,
    /// Dotted `msg` property path
    Property(String),
}

/// Raw read node entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadNodeConfig {
    #[serde(flatten)]
    pub common: NodeCommon,

    /// `msg.payload` or `msg`
    #[serde(default = "default_value_type")]
    pub value_type: String,

    /// Property path when `value_type` is `msg`
    #[serde(default)]
    pub value: String,
}

fn default_value_type() -> String {
    "msg.payload".to_string()
}

/// Typed read node settings
#[derive(Debug, Clone, PartialEq)]
pub struct ReadSettings {
    pub id: NodeId,
    pub name: Option<String>,
    pub device: String,
    pub target: ReadTarget,
    pub value_target: ValueTarget,
}

impl ReadNodeConfig {
    pub fn resolve(&self) -> Result<ReadSettings> {
        let common = &self.common;
        let target = match common.data_type.as_str() {
            "channel-digital" => ReadTarget::Digital(common.channel()),
            "channel-analog" => ReadTarget::Analog(common.channel()),
            "channel-config" => ReadTarget::ChannelConfig(common.channel()),
            "module-digital" => ReadTarget::ModuleDigital {
                module: common.module(),
            },
            "module-analog" => ReadTarget::ModuleAnalog {
                module: common.module(),
            },
            "modules-quality" => ReadTarget::ModulesQuality,
            "mmp-address" => ReadTarget::Mmp(common.mmp()?),
            _ => return Err(common.unknown_data_type()),
        };

        let value_target = match self.value_type.as_str() {
            "msg.payload" => ValueTarget::Payload,
            "msg" => {
                let path = self.value.trim();
                if path.is_empty() {
                    return Err(common.invalid("value_type 'msg' needs a property in 'value'"));
                }
                ValueTarget::Property(path.to_string())
            }
            other => return Err(common.invalid(format!("unexpected value type '{}'", other))),
        };

        Ok(ReadSettings {
            id: common.node_id(),
            name: common.name.clone(),
            device: common.device.clone(),
            target,
            value_target,
        })
    }
}

// ==================== Write Nodes ====================

/// What a write node changes
#[derive(Debug, Clone, PartialEq)]
pub enum WriteTarget {
    Digital(ChannelAddr),
    Analog(ChannelAddr),
    ClearOnLatch(ChannelAddr),
    ClearOffLatch(ChannelAddr),
    ClearFeatureValue(ChannelAddr),
    ClearMinValue(ChannelAddr),
    ClearMaxValue(ChannelAddr),
    CounterStart(ChannelAddr),
    CounterStop(ChannelAddr),
    ChannelConfig(ChannelAddr),
    Mmp(MmpSpec),
}

impl WriteTarget {
    pub fn data_type(&self) -> &'static str {
        match self {
            WriteTarget::Digital(_) => "channel-digital",
            WriteTarget::Analog(_) => "channel-analog",
            WriteTarget::ClearOnLatch(_) => "channel-clear-on-latch",
            WriteTarget::ClearOffLatch(_) => "channel-clear-off-latch",
            WriteTarget::ClearFeatureValue(_) => "channel-clear-feature-value",
            WriteTarget::ClearMinValue(_) => "channel-clear-min-value",
            WriteTarget::ClearMaxValue(_) => "channel-clear-max-value",
            WriteTarget::CounterStart(_) => "channel-counter-start",
            WriteTarget::CounterStop(_) => "channel-counter-stop",
            WriteTarget::ChannelConfig(_) => "channel-config",
            WriteTarget::Mmp(_) => "mmp-address",
        }
    }
}

/// Where a write node takes its value from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    Payload,
    /// Dotted `msg` property path
    Property(String),
    /// Fixed text from the configuration
    Literal(String),
}

/// Raw write node entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteNodeConfig {
    #[serde(flatten)]
    pub common: NodeCommon,

    /// `msg.payload`, `msg` or `value`
    #[serde(default = "default_value_type")]
    pub value_type: String,

    /// Property path for `msg`, literal for `value`
    #[serde(default)]
    pub value: String,
}

/// Typed write node settings
#[derive(Debug, Clone, PartialEq)]
pub struct WriteSettings {
    pub id: NodeId,
    pub name: Option<String>,
    pub device: String,
    pub target: WriteTarget,
    pub value_source: ValueSource,
}

impl WriteNodeConfig {
    pub fn resolve(&self) -> Result<WriteSettings> {
        let common = &self.common;
        let ch = common.channel();
        let target = match common.data_type.as_str() {
            "channel-digital" => WriteTarget::Digital(ch),
            "channel-analog" => WriteTarget::Analog(ch),
            "channel-clear-on-latch" => WriteTarget::ClearOnLatch(ch),
            "channel-clear-off-latch" => WriteTarget::ClearOffLatch(ch),
            "channel-clear-feature-value" => WriteTarget::ClearFeatureValue(ch),
            "channel-clear-min-value" => WriteTarget::ClearMinValue(ch),
            "channel-clear-max-value" => WriteTarget::ClearMaxValue(ch),
            "channel-counter-start" => WriteTarget::CounterStart(ch),
            "channel-counter-stop" => WriteTarget::CounterStop(ch),
            "channel-config" => WriteTarget::ChannelConfig(ch),
            "mmp-address" => WriteTarget::Mmp(common.mmp()?),
            _ => return Err(common.unknown_data_type()),
        };

        let value_source = match self.value_type.as_str() {
            "msg.payload" => ValueSource::Payload,
            "msg" => {
                let path = self.value.trim();
                if path.is_empty() {
                    return Err(common.invalid("value_type 'msg' needs a property in 'value'"));
                }
                ValueSource::Property(path.to_string())
            }
            "value" => ValueSource::Literal(self.value.clone()),
            other => return Err(common.invalid(format!("unexpected value type '{}'", other))),
        };

        Ok(WriteSettings {
            id: common.node_id(),
            name: common.name.clone(),
            device: common.device.clone(),
            target,
            value_source,
        })
    }
}
