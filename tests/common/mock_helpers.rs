//! Recording node host

use groov_io_bridge::nodes::NodeHost;
use groov_io_bridge::types::{FlowMessage, NodeStatus};
use std::sync::{Arc, Mutex};

/// Everything a node reported, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Status(NodeStatus),
    Cleared,
    Sent(FlowMessage),
    Warn(String),
    Error(String, Option<FlowMessage>),
}

/// Host that keeps every report for later assertions
#[derive(Debug, Default)]
pub struct RecordingHost {
    records: Mutex<Vec<Recorded>>,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<Recorded> {
        self.records.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<NodeStatus> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    /// Latest status, `None` when cleared or never set
    pub fn current_status(&self) -> Option<NodeStatus> {
        self.records().into_iter().rev().find_map(|r| match r {
            Recorded::Status(s) => Some(Some(s)),
            Recorded::Cleared => Some(None),
            _ => None,
        })?
    }

    pub fn sent(&self) -> Vec<FlowMessage> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Sent(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Error(text, _) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Warn(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.records.lock().unwrap().clear();
    }

    fn push(&self, record: Recorded) {
        self.records.lock().unwrap().push(record);
    }
}

impl NodeHost for RecordingHost {
    fn set_status(&self, status: NodeStatus) {
        self.push(Recorded::Status(status));
    }

    fn clear_status(&self) {
        self.push(Recorded::Cleared);
    }

    fn send(&self, msg: FlowMessage) {
        self.push(Recorded::Sent(msg));
    }

    fn warn(&self, text: &str) {
        self.push(Recorded::Warn(text.to_string()));
    }

    fn error(&self, text: &str, msg: Option<&FlowMessage>) {
        self.push(Recorded::Error(text.to_string(), msg.cloned()));
    }
}
