//! Core data types for the bridge
//!
//! This module contains the data structures shared by the scanner, the request
//! queue, the error classifier and the nodes.
//!
//! # Main Types
//!
//! - [`ScalarValue`] - A single value extracted from a device response
//! - [`FlowMessage`] - The flow engine's message object (`msg`)
//! - [`NodeId`] - Identity of a node, used as the queue owner key
//! - [`NodeStatus`] - Status indicator shown under a node in the flow editor
//! - [`MmpType`] - Element type of a memory-mapped (MMP) address

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A scalar read from a device channel
///
/// The change detector compares these with exact equality, so a number that
/// was read as `1.0` and one read as `1` are the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    /// Digital states and latch flags
    Bool(bool),
    /// Analog readings, feature values and numeric MMP values
    Number(f64),
    /// String MMP values
    Text(String),
}

impl ScalarValue {
    /// Convert a JSON value, returning `None` for arrays, objects and null
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(ScalarValue::Bool(*b)),
            Value::Number(n) => n.as_f64().map(ScalarValue::Number),
            Value::String(s) => Some(ScalarValue::Text(s.clone())),
            _ => None,
        }
    }

    /// Numeric view of the value, if it is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Boolean view of the value, if it is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Convert back into JSON
    pub fn to_json(&self) -> Value {
        match self {
            ScalarValue::Bool(b) => Value::Bool(*b),
            ScalarValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ScalarValue::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Bool(b) => write!(f, "{}", b),
            ScalarValue::Number(n) => write!(f, "{}", n),
            ScalarValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Bool(value)
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Number(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Text(value.to_string())
    }
}

/// Identity of a node in the flow
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Create a node id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A flow message
///
/// Wraps the JSON object the flow engine passes between nodes. Properties can be
/// addressed with dotted paths (`"sensor.reading"`), the same way the flow
/// editor lets users pick a `msg` property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowMessage {
    fields: Map<String, Value>,
}

impl FlowMessage {
    /// Create an empty message
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a message with only a payload
    pub fn with_payload(payload: impl Into<Value>) -> Self {
        let mut msg = Self::new();
        msg.set_payload(payload);
        msg
    }

    /// Build a message from a JSON value; non-object values become the payload
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self { fields },
            other => Self::with_payload(other),
        }
    }

    /// The message as a JSON value
    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// `msg.payload`
    pub fn payload(&self) -> Option<&Value> {
        self.fields.get("payload")
    }

    /// Set `msg.payload`
    pub fn set_payload(&mut self, payload: impl Into<Value>) {
        self.fields.insert("payload".to_string(), payload.into());
    }

    /// `msg.body`
    pub fn body(&self) -> Option<&Value> {
        self.fields.get("body")
    }

    /// Set `msg.body`
    pub fn set_body(&mut self, body: Value) {
        self.fields.insert("body".to_string(), body);
    }

    /// Look up a top-level field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Set a top-level field
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    /// Look up a property by dotted path
    pub fn get_property(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.fields.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Set a property by dotted path, creating intermediate objects
    ///
    /// Intermediate values that are not objects are replaced.
    pub fn set_property(&mut self, path: &str, value: Value) {
        let parts: Vec<&str> = path.split('.').filter(|p| !p.is_empty()).collect();
        let Some((last, parents)) = parts.split_last() else {
            return;
        };

        let mut current = &mut self.fields;
        for part in parents {
            let entry = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = match entry.as_object_mut() {
                Some(map) => map,
                None => return,
            };
        }
        current.insert(last.to_string(), value);
    }
}

/// Severity of a node status, shown as the indicator colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Normal operation (green)
    Ok,
    /// Request taking longer than expected (yellow)
    Warning,
    /// In error (red)
    Error,
}

/// Shape of a node status indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusShape {
    /// Solid: the node is active
    Dot,
    /// Hollow: the node is waiting
    Ring,
}

/// Status indicator shown under a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub severity: Severity,
    pub shape: StatusShape,
    pub text: String,
}

impl NodeStatus {
    pub fn new(severity: Severity, shape: StatusShape, text: impl Into<String>) -> Self {
        Self {
            severity,
            shape,
            text: text.into(),
        }
    }

    /// Green dot
    pub fn active(text: impl Into<String>) -> Self {
        Self::new(Severity::Ok, StatusShape::Dot, text)
    }

    /// Yellow dot
    pub fn delayed(text: impl Into<String>) -> Self {
        Self::new(Severity::Warning, StatusShape::Dot, text)
    }

    /// Red dot
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Severity::Error, StatusShape::Dot, text)
    }

    /// Green ring
    pub fn waiting(text: impl Into<String>) -> Self {
        Self::new(Severity::Ok, StatusShape::Ring, text)
    }

    /// Red ring
    pub fn waiting_in_error(text: impl Into<String>) -> Self {
        Self::new(Severity::Error, StatusShape::Ring, text)
    }
}

/// Element type of a memory-mapped address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MmpType {
    Int8,
    Uint8,
    #[default]
    Int32,
    Uint32,
    Float,
    String,
}

impl MmpType {
    /// Integer element types
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            MmpType::Int8 | MmpType::Uint8 | MmpType::Int32 | MmpType::Uint32
        )
    }

    /// Name used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            MmpType::Int8 => "int8",
            MmpType::Uint8 => "uint8",
            MmpType::Int32 => "int32",
            MmpType::Uint32 => "uint32",
            MmpType::Float => "float",
            MmpType::String => "string",
        }
    }
}

impl fmt::Display for MmpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
