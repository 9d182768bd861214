//! On-demand write node
//!
//! The value to write is resolved and converted when the message arrives, not
//! when it reaches the head of the queue, so an invalid value is reported at
//! once and never occupies a queue slot.

use super::{
    channel_override, log_missing_device, mmp_address_override, reject_without_device,
    report_add_outcome, report_waiting, NodeCore, NodeHost,
};
use crate::config::{ValueSource, WriteSettings, WriteTarget};
use crate::device::{DeviceConnection, DeviceResult, MmpWrite};
use crate::error::{BridgeError, Result};
use crate::queue::{AddOutcome, Completion};
use crate::types::{FlowMessage, MmpType, NodeId, NodeStatus};
use serde_json::Value;
use std::sync::Arc;

/// Convert user text into the value a target expects
///
/// Digital outputs take `on`/`off`/`true`/`false` (trimmed, any case).
/// Analog outputs and float MMP addresses take a float, integer MMP
/// addresses an integer. Everything else is written as the text itself.
pub fn string_value_to_write_value(target: &WriteTarget, text: &str) -> Result<Value> {
    let mmp_type = match target {
        WriteTarget::Mmp(spec) => Some(spec.mmp_type),
        _ => None,
    };

    match (target, mmp_type) {
        (WriteTarget::Digital(_), _) => match text.trim().to_lowercase().as_str() {
            "on" | "true" => Ok(Value::Bool(true)),
            "off" | "false" => Ok(Value::Bool(false)),
            _ => Err(BridgeError::InvalidValue(format!(
                "\"{}\" is not a valid value for a digital output.",
                text
            ))),
        },
        (WriteTarget::Analog(_), _) | (_, Some(MmpType::Float)) => parse_float(text),
        (_, Some(t)) if t.is_integer() => parse_integer(text),
        _ => Ok(Value::String(text.to_string())),
    }
}

fn not_a_number(text: &str) -> BridgeError {
    BridgeError::InvalidValue(format!("\"{}\" is not a valid number.", text))
}

fn parse_float(text: &str) -> Result<Value> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| not_a_number(text))
}

fn parse_integer(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return Ok(Value::from(n));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .map(|n| Value::from(n.trunc() as i64))
        .ok_or_else(|| not_a_number(text))
}

/// Node that writes a value for every inbound message
pub struct WriteNode {
    core: Arc<NodeCore>,
    settings: WriteSettings,
    connection: Option<Arc<DeviceConnection>>,
}

impl WriteNode {
    pub fn new(
        settings: WriteSettings,
        connection: Option<Arc<DeviceConnection>>,
        host: Arc<dyn NodeHost>,
    ) -> Arc<Self> {
        let core = NodeCore::new(settings.id.clone(), "writing", host);
        if connection.is_none() {
            log_missing_device(&core, &settings.device);
        }
        Arc::new(Self {
            core,
            settings,
            connection,
        })
    }

    pub fn id(&self) -> &NodeId {
        self.core.id()
    }

    pub fn settings(&self) -> &WriteSettings {
        &self.settings
    }

    /// Resolve the value carried by `msg` for this node's target
    ///
    /// Targets that take no value (latch clears, counter start/stop) resolve to
    /// `Null` without looking at the message.
    pub fn value_to_write(&self, msg: &FlowMessage) -> Result<Value> {
        let target = &self.settings.target;
        if !takes_value(target) {
            return Ok(Value::Null);
        }

        let (property, raw) = match &self.settings.value_source {
            ValueSource::Literal(text) => return string_value_to_write_value(target, text),
            ValueSource::Payload => ("payload", msg.payload()),
            ValueSource::Property(path) => (path.as_str(), msg.get_property(path)),
        };

        match raw {
            None => Err(BridgeError::InvalidValue(format!(
                "msg.{} is undefined.",
                property
            ))),
            Some(Value::String(text)) => string_value_to_write_value(target, text),
            Some(other) => Ok(other.clone()),
        }
    }

    /// Convert and queue a write for `msg`
    ///
    /// Conversion errors are reported on the node and returned; nothing is
    /// queued for them.
    pub fn input(self: &Arc<Self>, msg: FlowMessage) -> Result<AddOutcome> {
        let Some(connection) = self.connection.clone() else {
            return Err(reject_without_device(&self.core, &self.settings.device));
        };

        let value = match self.value_to_write(&msg) {
            Ok(value) => value,
            Err(err) => {
                self.core.host().error(&err.to_string(), Some(&msg));
                self.core.host().set_status(NodeStatus::error("error"));
                return Err(err);
            }
        };

        let node = Arc::clone(self);
        let outcome = connection
            .queue
            .add(msg, self.id().clone(), move |msg, completion| {
                node.dispatch(msg, value, completion)
            });
        report_add_outcome(&self.core, &connection, outcome);
        Ok(outcome)
    }

    /// Stop the node; its waiting requests are dropped from the queue
    pub fn close(&self) {
        if self.core.close() {
            if let Some(connection) = &self.connection {
                connection.queue.dump_owner(self.id());
            }
            tracing::debug!("Write node {} closed", self.id());
        }
    }

    fn resolve_target(&self, msg: &FlowMessage) -> Result<WriteTarget> {
        use WriteTarget::*;
        Ok(match &self.settings.target {
            Digital(ch) => Digital(channel_override(msg, *ch)?),
            Analog(ch) => Analog(channel_override(msg, *ch)?),
            ClearOnLatch(ch) => ClearOnLatch(channel_override(msg, *ch)?),
            ClearOffLatch(ch) => ClearOffLatch(channel_override(msg, *ch)?),
            ClearFeatureValue(ch) => ClearFeatureValue(channel_override(msg, *ch)?),
            ClearMinValue(ch) => ClearMinValue(channel_override(msg, *ch)?),
            ClearMaxValue(ch) => ClearMaxValue(channel_override(msg, *ch)?),
            CounterStart(ch) => CounterStart(channel_override(msg, *ch)?),
            CounterStop(ch) => CounterStop(channel_override(msg, *ch)?),
            ChannelConfig(ch) => ChannelConfig(channel_override(msg, *ch)?),
            Mmp(spec) => {
                let mut spec = spec.clone();
                spec.address = mmp_address_override(msg, &spec.address)?;
                Mmp(spec)
            }
        })
    }

    fn dispatch(self: Arc<Self>, msg: FlowMessage, value: Value, completion: Completion<FlowMessage>) {
        if self.core.is_closed() {
            completion.release();
            return;
        }
        let Some(connection) = self.connection.clone() else {
            self.core.host().set_status(NodeStatus::error("No device"));
            completion.release();
            return;
        };

        let target = match self.resolve_target(&msg) {
            Ok(target) => target,
            Err(err) => {
                self.core.host().error(&err.to_string(), Some(&msg));
                self.core.host().set_status(NodeStatus::error("error"));
                completion.release();
                return;
            }
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!("Write node {} dispatched outside a runtime", self.id());
            completion.release();
            return;
        };

        self.core.start_delay_timer();
        self.core.show_active();

        runtime.spawn(async move {
            let result = request(&connection, target, value).await;
            self.finish(&connection, msg, result, completion).await;
        });
    }

    async fn finish(
        &self,
        connection: &DeviceConnection,
        mut msg: FlowMessage,
        result: DeviceResult,
        completion: Completion<FlowMessage>,
    ) {
        self.core.clear_delay_timer();

        if self.core.is_closed() {
            let _ = match result {
                Ok(_) => completion.success().await,
                Err(_) => completion.failure().await,
            };
            return;
        }

        match result {
            Ok(body) => {
                self.core.clear_error();
                self.core.host().clear_status();
                msg.set_body(body);
                self.core.host().send(msg);

                let waiting = completion.success().await;
                report_waiting(&self.core, connection, waiting);
            }
            Err(err) => {
                self.core.record_error(&err, &msg);
                completion.failure().await;
            }
        }
    }
}

fn takes_value(target: &WriteTarget) -> bool {
    matches!(
        target,
        WriteTarget::Digital(_)
            | WriteTarget::Analog(_)
            | WriteTarget::ChannelConfig(_)
            | WriteTarget::Mmp(_)
    )
}

async fn request(connection: &DeviceConnection, target: WriteTarget, value: Value) -> DeviceResult {
    let client = &connection.client;
    match target {
        WriteTarget::Digital(ch) => client.set_digital_state(ch.module, ch.channel, value).await,
        WriteTarget::Analog(ch) => client.set_analog_value(ch.module, ch.channel, value).await,
        WriteTarget::ClearOnLatch(ch) => client.clear_on_latch(ch.module, ch.channel).await,
        WriteTarget::ClearOffLatch(ch) => client.clear_off_latch(ch.module, ch.channel).await,
        WriteTarget::ClearFeatureValue(ch) => {
            client.clear_feature_value(ch.module, ch.channel).await
        }
        WriteTarget::ClearMinValue(ch) => client.clear_analog_min(ch.module, ch.channel).await,
        WriteTarget::ClearMaxValue(ch) => client.clear_analog_max(ch.module, ch.channel).await,
        WriteTarget::CounterStart(ch) => client.set_counter_active(ch.module, ch.channel, true).await,
        WriteTarget::CounterStop(ch) => client.set_counter_active(ch.module, ch.channel, false).await,
        WriteTarget::ChannelConfig(ch) => {
            client
                .write_channel_configuration(ch.module, ch.channel, value)
                .await
        }
        WriteTarget::Mmp(spec) => {
            let body = MmpWrite::new(value, spec.mmp_type, spec.encoding.as_deref());
            client.write_mmp_value(spec.address, body).await
        }
    }
}
