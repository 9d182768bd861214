//! Polling input node
//!
//! Reads one value per scan tick straight from the device client (scans do not
//! go through the request queue) and emits `{payload, body, inputType}` when
//! the change detector considers the reading significant.

use super::{extract_value, log_missing_device, NodeCore, NodeHost};
use crate::config::{InputSettings, InputSource};
use crate::device::{DeviceConnection, DeviceResult};
use crate::error::{BridgeError, Result};
use crate::scanner::{ChangeDetector, ScanCallback, ScanFuture, ScanState};
use crate::types::{FlowMessage, NodeId, NodeStatus, ScalarValue};
use serde_json::Value;
use std::sync::{Arc, Weak};

/// Node that polls a channel or MMP address
pub struct InputNode {
    core: Arc<NodeCore>,
    settings: InputSettings,
    connection: Option<Arc<DeviceConnection>>,
    detector: ChangeDetector,
}

impl InputNode {
    /// Build the node; `connection` is `None` when the device id is unknown
    ///
    /// The node does not scan until [`InputNode::start`] is called.
    pub fn new(
        settings: InputSettings,
        connection: Option<Arc<DeviceConnection>>,
        host: Arc<dyn NodeHost>,
    ) -> Result<Arc<Self>> {
        let state = ScanState::new(
            settings.source.change_type(),
            settings.deadband,
            settings.send_initial_value,
        )?;
        let core = NodeCore::new(settings.id.clone(), "scanning", host);

        let node = Arc::new_cyclic(|weak: &Weak<InputNode>| {
            let weak = weak.clone();
            let on_tick: ScanCallback = Arc::new(move || -> ScanFuture {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(node) = weak.upgrade() {
                        node.scan().await;
                    }
                })
            });
            InputNode {
                detector: ChangeDetector::with_state(settings.scan_interval_ms, state, on_tick),
                core,
                settings,
                connection,
            }
        });

        if node.connection.is_none() {
            log_missing_device(&node.core, &node.settings.device);
        }
        Ok(node)
    }

    pub fn id(&self) -> &NodeId {
        self.core.id()
    }

    pub fn settings(&self) -> &InputSettings {
        &self.settings
    }

    /// Start the scan timer
    ///
    /// A node without a device shows `No device` instead. Manual nodes
    /// (scan time zero or negative) only scan through [`InputNode::trigger`].
    pub fn start(&self) -> Result<()> {
        if self.connection.is_none() {
            self.core.host().set_status(NodeStatus::error("No device"));
            return Ok(());
        }
        self.detector.start()
    }

    /// Run one scan now, whatever the timer is doing
    pub async fn trigger(&self) -> Result<()> {
        if self.connection.is_none() {
            self.core.host().set_status(NodeStatus::error("No device"));
            return Err(BridgeError::MissingDevice(self.settings.device.clone()));
        }
        self.detector.scan_now().await;
        Ok(())
    }

    /// Stop scanning; an in-flight scan finishes without side effects
    pub fn close(&self) {
        if self.core.close() {
            self.detector.close();
            tracing::debug!("Input node {} closed", self.id());
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.detector.is_running()
    }

    /// Forget the last reading so the next scan is treated as the first
    pub fn reset(&self) {
        self.detector.reset();
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    async fn request(&self, connection: &DeviceConnection) -> DeviceResult {
        let client = &connection.client;
        match &self.settings.source {
            InputSource::DigitalState(ch)
            | InputSource::DigitalTurnOn(ch)
            | InputSource::DigitalTurnOff(ch)
            | InputSource::DigitalOnLatch(ch)
            | InputSource::DigitalOffLatch(ch)
            | InputSource::DigitalFeatureValue(ch) => {
                client.digital_channel_status(ch.module, ch.channel).await
            }
            InputSource::Analog(ch) => client.analog_channel_status(ch.module, ch.channel).await,
            InputSource::Mmp(spec) => {
                client
                    .mmp_values(
                        spec.address.clone(),
                        spec.mmp_type,
                        spec.length,
                        spec.encoding.clone(),
                    )
                    .await
            }
        }
    }

    async fn scan(self: Arc<Self>) {
        if self.core.is_closed() {
            return;
        }
        let Some(connection) = self.connection.clone() else {
            return;
        };

        self.core.start_delay_timer();
        let result = self.request(&connection).await;
        self.core.clear_delay_timer();

        if self.core.is_closed() {
            return;
        }

        match result {
            Ok(body) => {
                self.core.clear_error();
                self.core.host().set_status(NodeStatus::active("scanning"));
                self.handle_reading(body);
            }
            Err(err) => {
                self.core.record_error(&err, &FlowMessage::new());
                self.detector.update_error();
            }
        }
    }

    fn handle_reading(&self, body: Value) {
        let source = &self.settings.source;
        let unwrap_single = matches!(source, InputSource::Mmp(_));
        let value = extract_value(&body, Some(source.value_field()), unwrap_single);

        let Some(scalar) = ScalarValue::from_json(&value) else {
            let text = format!("Unexpected value {} in field '{}'", value, source.value_field());
            self.core.host().error(&text, None);
            self.core.host().set_status(NodeStatus::error("error"));
            return;
        };

        match self.detector.update_value(scalar) {
            Ok(true) => {
                let mut msg = FlowMessage::with_payload(value);
                msg.set_body(body);
                msg.insert("inputType", Value::String(source.data_type().to_string()));
                self.core.host().send(msg);
            }
            Ok(false) => {}
            Err(err) => {
                self.core.host().error(&err.to_string(), None);
                self.core.host().set_status(NodeStatus::error("error"));
            }
        }
    }
}

impl Drop for InputNode {
    fn drop(&mut self) {
        self.detector.close();
    }
}
