//! # groov-io-bridge: flow engine to I/O controller bridge
//!
//! Connects a flow-based automation engine to a remote industrial I/O
//! controller's management API. Input nodes poll channel values and emit the
//! significant changes, read and write nodes forward on-demand requests, and
//! every failure is turned into a consistent node status.
//!
//! ## Architecture
//!
//! - **Scanner**: per-node change detection driving periodic polls
//! - **Queue**: per-device bounded FIFO with one request in flight
//! - **Classify**: transport and protocol failures to short/long messages
//! - **Device**: the client seam, the connection registry and a simulated controller
//! - **Nodes**: input, read and write behaviour on top of the above
//! - **Communication**: node events flow to the engine side over crossbeam channels
//!
//! ## Example
//!
//! ```ignore
//! use groov_io_bridge::{config::BridgeConfig, device::SimulatedDevice, Bridge};
//! use std::sync::Arc;
//!
//! let config = BridgeConfig::load("bridge.toml")?;
//! let (bridge, events) = Bridge::with_event_channel(
//!     &config,
//!     |_| Arc::new(SimulatedDevice::demo_rack()),
//!     1024,
//! )?;
//! bridge.start()?;
//! bridge.inject(&"read-ai".into(), FlowMessage::new()).await?;
//! for event in events.try_iter() {
//!     println!("{:?}", event);
//! }
//! ```

pub mod app;
pub mod classify;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod nodes;
pub mod queue;
pub mod scanner;
pub mod types;

// Re-export commonly used types
pub use app::{Bridge, BridgeNode, Injected};
pub use classify::{ErrorClass, ErrorInfo};
pub use config::BridgeConfig;
pub use device::{ConnectionRegistry, DeviceApi, DeviceConnection, RequestError, SimulatedDevice};
pub use error::{BridgeError, Result};
pub use nodes::{ChannelHost, NodeEvent, NodeHost};
pub use queue::{AddOutcome, Completion, OverflowPolicy, RequestQueue};
pub use scanner::{ChangeDetector, ChangeType};
pub use types::{FlowMessage, NodeId, NodeStatus, ScalarValue};
