//! Bridge assembly
//!
//! [`Bridge`] owns the connection registry and every node built from a
//! [`BridgeConfig`]. It routes injected flow messages to nodes and tears
//! everything down on shutdown.
//!
//! Device clients and node hosts come from caller supplied factories, so the
//! same assembly runs against simulated devices, mocks or a real client.

use crate::config::{BridgeConfig, DeviceConfig};
use crate::device::{ConnectionRegistry, DeviceApi};
use crate::error::{BridgeError, Result, ResultExt};
use crate::nodes::{ChannelHost, InputNode, NodeEvent, NodeHost, ReadNode, WriteNode};
use crate::queue::AddOutcome;
use crate::types::{FlowMessage, NodeId};
use crossbeam_channel::Receiver;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One node of any kind
#[derive(Clone)]
pub enum BridgeNode {
    Input(Arc<InputNode>),
    Read(Arc<ReadNode>),
    Write(Arc<WriteNode>),
}

impl BridgeNode {
    pub fn id(&self) -> &NodeId {
        match self {
            BridgeNode::Input(node) => node.id(),
            BridgeNode::Read(node) => node.id(),
            BridgeNode::Write(node) => node.id(),
        }
    }

    /// Node kind, as a flow editor would name it
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeNode::Input(_) => "input",
            BridgeNode::Read(_) => "read",
            BridgeNode::Write(_) => "write",
        }
    }

    pub fn close(&self) {
        match self {
            BridgeNode::Input(node) => node.close(),
            BridgeNode::Read(node) => node.close(),
            BridgeNode::Write(node) => node.close(),
        }
    }
}

/// What an injected message did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Injected {
    /// An input node ran one scan
    Scanned,
    /// A read or write request was queued
    Queued(AddOutcome),
}

/// All devices and nodes of one configuration
pub struct Bridge {
    registry: Arc<ConnectionRegistry>,
    nodes: BTreeMap<NodeId, BridgeNode>,
}

impl Bridge {
    /// Build devices and nodes
    ///
    /// Nodes referencing an unknown device are still built, as inert nodes.
    /// Invalid node settings fail the whole build.
    pub fn build<C, H>(config: &BridgeConfig, clients: C, hosts: H) -> Result<Self>
    where
        C: Fn(&DeviceConfig) -> Arc<dyn DeviceApi>,
        H: Fn(&NodeId) -> Arc<dyn NodeHost>,
    {
        config.validate()?;

        let registry = Arc::new(ConnectionRegistry::new());
        for device in &config.devices {
            for problem in device.problems() {
                tracing::error!("{}", problem);
            }
            registry.create_connection(
                &device.id,
                &device.normalized_address(),
                clients(device),
                device.queue_capacity,
                device.overflow_policy,
            );
        }

        let mut nodes = BTreeMap::new();

        for entry in &config.input_nodes {
            let settings = entry
                .resolve()
                .with_context(|| format!("Failed to build input node '{}'", entry.common.id))?;
            let connection = registry.get_connection(&settings.device);
            let host = hosts(&settings.id);
            let node = InputNode::new(settings, connection, host)
                .with_context(|| format!("Failed to build input node '{}'", entry.common.id))?;
            nodes.insert(node.id().clone(), BridgeNode::Input(node));
        }

        for entry in &config.read_nodes {
            let settings = entry
                .resolve()
                .with_context(|| format!("Failed to build read node '{}'", entry.common.id))?;
            let connection = registry.get_connection(&settings.device);
            let host = hosts(&settings.id);
            let node = ReadNode::new(settings, connection, host);
            nodes.insert(node.id().clone(), BridgeNode::Read(node));
        }

        for entry in &config.write_nodes {
            let settings = entry
                .resolve()
                .with_context(|| format!("Failed to build write node '{}'", entry.common.id))?;
            let connection = registry.get_connection(&settings.device);
            let host = hosts(&settings.id);
            let node = WriteNode::new(settings, connection, host);
            nodes.insert(node.id().clone(), BridgeNode::Write(node));
        }

        tracing::info!(
            "Bridge built with {} devices and {} nodes",
            registry.len(),
            nodes.len()
        );
        Ok(Self { registry, nodes })
    }

    /// Build with [`ChannelHost`]s feeding one event channel
    pub fn with_event_channel<C>(
        config: &BridgeConfig,
        clients: C,
        capacity: usize,
    ) -> Result<(Self, Receiver<NodeEvent>)>
    where
        C: Fn(&DeviceConfig) -> Arc<dyn DeviceApi>,
    {
        let (sender, receiver) = ChannelHost::channel(capacity);
        let bridge = Self::build(config, clients, |id| {
            Arc::new(ChannelHost::new(id.clone(), sender.clone())) as Arc<dyn NodeHost>
        })?;
        Ok((bridge, receiver))
    }

    /// Start every input node's scan timer
    pub fn start(&self) -> Result<()> {
        for node in self.nodes.values() {
            if let BridgeNode::Input(input) = node {
                input
                    .start()
                    .with_context(|| format!("Failed to start input node '{}'", input.id()))?;
            }
        }
        Ok(())
    }

    /// Deliver a message to a node
    ///
    /// Input nodes scan once; read and write nodes queue a request.
    pub async fn inject(&self, node: &NodeId, msg: FlowMessage) -> Result<Injected> {
        let target = self
            .nodes
            .get(node)
            .ok_or_else(|| BridgeError::UnknownNode(node.to_string()))?;

        match target {
            BridgeNode::Input(input) => {
                input.trigger().await?;
                Ok(Injected::Scanned)
            }
            BridgeNode::Read(read) => Ok(Injected::Queued(read.input(msg)?)),
            BridgeNode::Write(write) => Ok(Injected::Queued(write.input(msg)?)),
        }
    }

    pub fn node(&self, id: &NodeId) -> Option<&BridgeNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &BridgeNode> {
        self.nodes.values()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Close every node, then every device connection
    pub fn shutdown(&self) {
        for node in self.nodes.values() {
            node.close();
        }
        self.registry.close_all();
        tracing::info!("Bridge shut down");
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        for node in self.nodes.values() {
            node.close();
        }
    }
}
