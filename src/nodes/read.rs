//! On-demand read node

use super::{
    channel_override, extract_value, log_missing_device, mmp_address_override, reject_without_device,
    report_add_outcome, report_waiting, NodeCore, NodeHost,
};
use crate::config::{ReadSettings, ReadTarget, ValueTarget};
use crate::device::{DeviceConnection, DeviceResult};
use crate::error::Result;
use crate::queue::{AddOutcome, Completion};
use crate::types::{FlowMessage, NodeId, NodeStatus};
use std::sync::Arc;

/// Node that reads a value for every inbound message
pub struct ReadNode {
    core: Arc<NodeCore>,
    settings: ReadSettings,
    connection: Option<Arc<DeviceConnection>>,
}

impl ReadNode {
    pub fn new(
        settings: ReadSettings,
        connection: Option<Arc<DeviceConnection>>,
        host: Arc<dyn NodeHost>,
    ) -> Arc<Self> {
        let core = NodeCore::new(settings.id.clone(), "reading", host);
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

    pub fn settings(&self) -> &ReadSettings {
        &self.settings
    }

    /// Queue a read for `msg`
    pub fn input(self: &Arc<Self>, msg: FlowMessage) -> Result<AddOutcome> {
        let Some(connection) = self.connection.clone() else {
            return Err(reject_without_device(&self.core, &self.settings.device));
        };

        let node = Arc::clone(self);
        let outcome = connection
            .queue
            .add(msg, self.id().clone(), move |msg, completion| {
                node.dispatch(msg, completion)
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
            tracing::debug!("Read node {} closed", self.id());
        }
    }

    /// Resolve the request target with the message's overrides applied
    fn resolve_target(&self, msg: &FlowMessage) -> Result<ReadTarget> {
        Ok(match &self.settings.target {
            ReadTarget::Digital(ch) => ReadTarget::Digital(channel_override(msg, *ch)?),
            ReadTarget::Analog(ch) => ReadTarget::Analog(channel_override(msg, *ch)?),
            ReadTarget::ChannelConfig(ch) => ReadTarget::ChannelConfig(channel_override(msg, *ch)?),
            ReadTarget::ModuleDigital { module } => ReadTarget::ModuleDigital {
                module: super::index_override(msg, "moduleIndex", *module)?,
            },
            ReadTarget::ModuleAnalog { module } => ReadTarget::ModuleAnalog {
                module: super::index_override(msg, "moduleIndex", *module)?,
            },
            ReadTarget::ModulesQuality => ReadTarget::ModulesQuality,
            ReadTarget::Mmp(spec) => {
                let mut spec = spec.clone();
                spec.address = mmp_address_override(msg, &spec.address)?;
                ReadTarget::Mmp(spec)
            }
        })
    }

    fn dispatch(self: Arc<Self>, msg: FlowMessage, completion: Completion<FlowMessage>) {
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
            tracing::error!("Read node {} dispatched outside a runtime", self.id());
            completion.release();
            return;
        };

        self.core.start_delay_timer();
        self.core.show_active();

        runtime.spawn(async move {
            let result = request(&connection, &target).await;
            self.finish(&connection, &target, msg, result, completion).await;
        });
    }

    async fn finish(
        &self,
        connection: &DeviceConnection,
        target: &ReadTarget,
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

                let unwrap_single = match target {
                    ReadTarget::Mmp(spec) => spec.is_scalar(),
                    _ => false,
                };
                let value = extract_value(&body, target.value_field(), unwrap_single);
                msg.set_body(body);
                match &self.settings.value_target {
                    ValueTarget::Payload => msg.set_payload(value),
                    ValueTarget::Property(path) => msg.set_property(path, value),
                }
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

async fn request(connection: &DeviceConnection, target: &ReadTarget) -> DeviceResult {
    let client = &connection.client;
    match target {
        ReadTarget::Digital(ch) => client.digital_channel_status(ch.module, ch.channel).await,
        ReadTarget::Analog(ch) => client.analog_channel_status(ch.module, ch.channel).await,
        ReadTarget::ChannelConfig(ch) => client.channel_configuration(ch.module, ch.channel).await,
        ReadTarget::ModuleDigital { module } => client.module_digital_values(*module).await,
        ReadTarget::ModuleAnalog { module } => client.module_analog_values(*module).await,
        ReadTarget::ModulesQuality => client.module_quality().await,
        ReadTarget::Mmp(spec) => {
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
