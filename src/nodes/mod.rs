//! Flow nodes
//!
//! The three node kinds glue the scanner, the request queue and the error
//! classifier to a device client:
//!
//! - [`InputNode`] polls one value on a timer and emits significant changes
//! - [`ReadNode`] reads on demand, one queued request per inbound message
//! - [`WriteNode`] writes on demand, converting the message value first
//!
//! Nodes report everything the flow editor would show (status, output
//! messages, warnings, errors) through a [`NodeHost`]. [`ChannelHost`] is the
//! host used outside tests: it forwards timestamped [`NodeEvent`]s over a
//! crossbeam channel.
//!
//! # Status texts
//!
//! | Situation | Status |
//! |---|---|
//! | request running | green dot `reading` (or red dot `reading [<last error>]`) |
//! | request slower than 3 s | yellow dot `reading (delayed)` unless in error |
//! | waiting in the queue | green ring `queued` (or red ring `queued [<last error>]`) |
//! | queue full | red ring `queue full` |
//! | request failed | red dot with the short error message |

pub mod input;
pub mod read;
pub mod write;

pub use input::InputNode;
pub use read::ReadNode;
pub use write::{string_value_to_write_value, WriteNode};

use crate::classify::{handle_error_response, ErrorInfo};
use crate::config::{ChannelAddr, Lenient};
use crate::device::{DeviceConnection, RequestError};
use crate::error::{BridgeError, Result};
use crate::queue::AddOutcome;
use crate::types::{FlowMessage, NodeId, NodeStatus};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// How long a request may run before the status turns yellow
pub const DELAYED_STATUS_AFTER: Duration = Duration::from_millis(3000);

/// Default capacity of the event channel created by [`ChannelHost::channel`]
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

// ==================== Host ====================

/// What a node can do to the flow engine
pub trait NodeHost: Send + Sync {
    /// Show a status indicator under the node
    fn set_status(&self, status: NodeStatus);

    /// Remove the status indicator
    fn clear_status(&self);

    /// Emit a message on the node's output
    fn send(&self, msg: FlowMessage);

    fn warn(&self, text: &str);

    /// Log an error, optionally with the message that caused it
    fn error(&self, text: &str, msg: Option<&FlowMessage>);
}

/// Something a node reported
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NodeEventKind {
    Status { status: NodeStatus },
    StatusCleared,
    Output { msg: FlowMessage },
    Warning { text: String },
    Error { text: String, msg: Option<FlowMessage> },
}

/// A timestamped report from one node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeEvent {
    pub node: NodeId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: NodeEventKind,
}

/// Host that forwards node reports over a channel
#[derive(Debug, Clone)]
pub struct ChannelHost {
    node: NodeId,
    sender: Sender<NodeEvent>,
}

impl ChannelHost {
    pub fn new(node: NodeId, sender: Sender<NodeEvent>) -> Self {
        Self { node, sender }
    }

    /// Bounded event channel shared by every node of a bridge
    pub fn channel(capacity: usize) -> (Sender<NodeEvent>, Receiver<NodeEvent>) {
        crossbeam_channel::bounded(capacity)
    }

    fn emit(&self, kind: NodeEventKind) {
        let event = NodeEvent {
            node: self.node.clone(),
            timestamp: Utc::now(),
            kind,
        };
        // Never block a device task on a slow consumer
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!("Event channel full, dropping event from {}", event.node);
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::trace!("Event channel closed, dropping event from {}", self.node);
            }
        }
    }
}

impl NodeHost for ChannelHost {
    fn set_status(&self, status: NodeStatus) {
        self.emit(NodeEventKind::Status { status });
    }

    fn clear_status(&self) {
        self.emit(NodeEventKind::StatusCleared);
    }

    fn send(&self, msg: FlowMessage) {
        self.emit(NodeEventKind::Output { msg });
    }

    fn warn(&self, text: &str) {
        tracing::warn!(node = %self.node, "{}", text);
        self.emit(NodeEventKind::Warning {
            text: text.to_string(),
        });
    }

    fn error(&self, text: &str, msg: Option<&FlowMessage>) {
        self.emit(NodeEventKind::Error {
            text: text.to_string(),
            msg: msg.cloned(),
        });
    }
}

// ==================== Node Core ====================

/// State every node kind shares
pub(crate) struct NodeCore {
    id: NodeId,
    /// `scanning`, `reading` or `writing`
    verb: &'static str,
    host: Arc<dyn NodeHost>,
    previous_error: Mutex<Option<ErrorInfo>>,
    delay_timer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl NodeCore {
    pub(crate) fn new(id: NodeId, verb: &'static str, host: Arc<dyn NodeHost>) -> Arc<Self> {
        Arc::new(Self {
            id,
            verb,
            host,
            previous_error: Mutex::new(None),
            delay_timer: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn id(&self) -> &NodeId {
        &self.id
    }

    pub(crate) fn host(&self) -> &dyn NodeHost {
        self.host.as_ref()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark closed and stop the delay timer; returns false if already closed
    pub(crate) fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        self.clear_delay_timer();
        first
    }

    /// Last classified failure, cleared by the next success
    pub(crate) fn previous_error(&self) -> Option<ErrorInfo> {
        self.error_guard().clone()
    }

    pub(crate) fn clear_error(&self) {
        *self.error_guard() = None;
    }

    /// Classify a failure, update status and log, and remember it
    pub(crate) fn record_error(&self, error: &RequestError, context: &FlowMessage) {
        let mut previous = self.error_guard();
        let info = handle_error_response(error, context, self.host(), previous.as_ref());
        *previous = Some(info);
    }

    /// Status shown while a request runs
    pub(crate) fn show_active(&self) {
        let status = match self.previous_error() {
            Some(err) => NodeStatus::error(format!("{} [{}]", self.verb, err.short_msg)),
            None => NodeStatus::active(self.verb),
        };
        self.host.set_status(status);
    }

    /// Status shown while requests wait in the queue
    pub(crate) fn show_queued(&self, waiting: usize) {
        if waiting == 0 {
            return;
        }
        let status = match self.previous_error() {
            Some(err) => NodeStatus::waiting_in_error(format!("queued [{}]", err.short_msg)),
            None => NodeStatus::waiting("queued"),
        };
        self.host.set_status(status);
    }

    /// Arm the delayed-status timer, replacing any running one
    pub(crate) fn start_delay_timer(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let core: Weak<Self> = Arc::downgrade(self);
        let handle = runtime.spawn(async move {
            tokio::time::sleep(DELAYED_STATUS_AFTER).await;
            if let Some(core) = core.upgrade() {
                if !core.is_closed() && core.previous_error().is_none() {
                    core.host
                        .set_status(NodeStatus::delayed(format!("{} (delayed)", core.verb)));
                }
            }
        });
        if let Some(old) = self.timer_guard().replace(handle) {
            old.abort();
        }
    }

    pub(crate) fn clear_delay_timer(&self) {
        if let Some(handle) = self.timer_guard().take() {
            handle.abort();
        }
    }

    fn error_guard(&self) -> MutexGuard<'_, Option<ErrorInfo>> {
        self.previous_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn timer_guard(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.delay_timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for NodeCore {
    fn drop(&mut self) {
        self.clear_delay_timer();
    }
}

// ==================== Function Node Helpers ====================

/// Report the outcome of queueing a message
pub(crate) fn report_add_outcome(core: &NodeCore, connection: &DeviceConnection, outcome: AddOutcome) {
    match outcome {
        AddOutcome::Rejected => {
            core.host().set_status(NodeStatus::waiting_in_error("queue full"));
            core.host().warn(&format!(
                "Message rejected. Queue is full for device {}.",
                connection.id
            ));
        }
        AddOutcome::Dispatched => {}
        AddOutcome::Queued { position } => {
            if connection.queue.current_owner().as_ref() != Some(core.id()) {
                core.show_queued(position);
            }
        }
    }
}

/// After a success, show `queued` if this node still has work waiting
pub(crate) fn report_waiting(core: &NodeCore, connection: &DeviceConnection, waiting: usize) {
    if waiting > 0 && connection.queue.current_owner().as_ref() != Some(core.id()) {
        core.show_queued(waiting);
    }
}

/// Tell the host a function node has no device
pub(crate) fn reject_without_device(core: &NodeCore, device: &str) -> BridgeError {
    core.host()
        .set_status(NodeStatus::error("missing device configuration"));
    BridgeError::MissingDevice(device.to_string())
}

/// Log the missing device once, at construction
pub(crate) fn log_missing_device(core: &NodeCore, device: &str) {
    tracing::error!("Node {} references unknown device '{}'", core.id(), device);
    core.host().error("Missing device configuration", None);
}

/// Resolve an index from `msg.<key>`, falling back to the configured one
pub(crate) fn index_override(msg: &FlowMessage, key: &str, configured: u32) -> Result<u32> {
    let invalid = || BridgeError::InvalidValue(format!("msg.{} is not a valid index.", key));
    match msg.get(key) {
        None | Some(Value::Null) => Ok(configured),
        Some(Value::Number(n)) => n
            .as_f64()
            .and_then(|n| Lenient::Number(n).as_index())
            .ok_or_else(invalid),
        Some(Value::String(s)) => Lenient::Text(s.clone()).as_index().ok_or_else(invalid),
        Some(_) => Err(invalid()),
    }
}

/// Channel address with `msg.moduleIndex` / `msg.channelIndex` applied
pub(crate) fn channel_override(msg: &FlowMessage, configured: ChannelAddr) -> Result<ChannelAddr> {
    Ok(ChannelAddr {
        module: index_override(msg, "moduleIndex", configured.module)?,
        channel: index_override(msg, "channelIndex", configured.channel)?,
    })
}

/// MMP address with `msg.mmpAddress` applied
pub(crate) fn mmp_address_override(msg: &FlowMessage, configured: &str) -> Result<String> {
    match msg.get("mmpAddress") {
        None | Some(Value::Null) => Ok(configured.to_string()),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(BridgeError::InvalidValue(
            "msg.mmpAddress is not a valid address.".to_string(),
        )),
    }
}

/// Pull the value field out of a response body
///
/// MMP lists are unwrapped to their first element when `unwrap_single` is set.
pub(crate) fn extract_value(body: &Value, field: Option<&str>, unwrap_single: bool) -> Value {
    let value = match field {
        Some(field) => body.get(field).cloned().unwrap_or(Value::Null),
        None => body.clone(),
    };
    match value {
        Value::Array(mut items) if unwrap_single => {
            if items.is_empty() {
                Value::Null
            } else {
                items.swap_remove(0)
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_host_forwards_events() {
        let (tx, rx) = ChannelHost::channel(8);
        let host = ChannelHost::new(NodeId::from("n1"), tx);
        host.set_status(NodeStatus::active("reading"));
        host.send(FlowMessage::with_payload(true));
        host.clear_status();

        let events: Vec<NodeEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0].kind,
            NodeEventKind::Status {
                status: NodeStatus::active("reading")
            }
        );
        assert_eq!(events[2].kind, NodeEventKind::StatusCleared);
        assert!(events.iter().all(|e| e.node == NodeId::from("n1")));
    }

    #[test]
    fn test_channel_host_drops_when_full() {
        let (tx, rx) = ChannelHost::channel(1);
        let host = ChannelHost::new(NodeId::from("n1"), tx);
        host.warn("first");
        host.warn("second");
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_event_json_shape() {
        let event = NodeEvent {
            node: NodeId::from("n1"),
            timestamp: Utc::now(),
            kind: NodeEventKind::Output {
                msg: FlowMessage::with_payload(1),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "output");
        assert_eq!(json["node"], "n1");
        assert_eq!(json["msg"]["payload"], 1);
    }

    #[test]
    fn test_index_overrides() {
        let msg = FlowMessage::from_json(json!({ "moduleIndex": 3, "channelIndex": "5" }));
        let addr = channel_override(&msg, ChannelAddr::new(0, 0)).unwrap();
        assert_eq!(addr, ChannelAddr::new(3, 5));

        let msg = FlowMessage::from_json(json!({ "channelIndex": "x" }));
        let err = channel_override(&msg, ChannelAddr::new(1, 1)).unwrap_err();
        assert_eq!(err.to_string(), "msg.channelIndex is not a valid index.");

        let msg = FlowMessage::new();
        assert_eq!(channel_override(&msg, ChannelAddr::new(1, 2)).unwrap(), ChannelAddr::new(1, 2));
    }

    #[test]
    fn test_extract_value() {
        let body = json!({ "mmpValues": [4, 5], "state": true });
        assert_eq!(extract_value(&body, Some("state"), false), json!(true));
        assert_eq!(extract_value(&body, Some("mmpValues"), false), json!([4, 5]));
        assert_eq!(extract_value(&body, Some("mmpValues"), true), json!(4));
        assert_eq!(extract_value(&body, Some("missing"), false), Value::Null);
        assert_eq!(extract_value(&body, None, false), body);
    }
}
