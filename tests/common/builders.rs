//! Test data builders for nodes and device connections

use groov_io_bridge::config::{
    InputNodeConfig, InputSettings, Lenient, NodeCommon, ReadNodeConfig, ReadSettings,
    WriteNodeConfig, WriteSettings,
};
use groov_io_bridge::device::{DeviceConnection, SimulatedDevice};
use groov_io_bridge::queue::{OverflowPolicy, RequestQueue};
use groov_io_bridge::types::MmpType;
use std::sync::Arc;

pub const DEVICE_ID: &str = "rack";

/// Connection to a simulated device, bypassing the registry
pub fn connection(
    device: &Arc<SimulatedDevice>,
    capacity: usize,
    policy: OverflowPolicy,
) -> Arc<DeviceConnection> {
    Arc::new(DeviceConnection {
        id: DEVICE_ID.to_string(),
        address: "localhost".to_string(),
        client: device.clone(),
        queue: RequestQueue::new(capacity, policy),
    })
}

/// Builder for the fields every node entry shares
#[derive(Clone)]
pub struct NodeBuilder {
    common: NodeCommon,
    value_type: String,
    value: String,
    scan_time_sec: Option<Lenient>,
    deadband: Option<Lenient>,
    send_initial_value: bool,
}

impl NodeBuilder {
    pub fn new(id: &str, data_type: &str) -> Self {
        Self {
            common: NodeCommon {
                id: id.to_string(),
                name: None,
                device: DEVICE_ID.to_string(),
                data_type: data_type.to_string(),
                module_index: None,
                channel_index: None,
                mmp_address: None,
                mmp_type: MmpType::default(),
                mmp_length: None,
                mmp_encoding: None,
            },
            value_type: "msg.payload".to_string(),
            value: String::new(),
            scan_time_sec: Some(Lenient::Number(-1.0)),
            deadband: None,
            send_initial_value: false,
        }
    }

    pub fn device(mut self, device: &str) -> Self {
        self.common.device = device.to_string();
        self
    }

    pub fn channel(mut self, module: u32, channel: u32) -> Self {
        self.common.module_index = Some(Lenient::Number(module as f64));
        self.common.channel_index = Some(Lenient::Text(channel.to_string()));
        self
    }

    pub fn mmp(mut self, address: &str, mmp_type: MmpType, length: u32) -> Self {
        self.common.mmp_address = Some(address.to_string());
        self.common.mmp_type = mmp_type;
        self.common.mmp_length = Some(Lenient::Number(length as f64));
        self
    }

    /// Seconds between scans; negative keeps the node manual
    pub fn scan_time_sec(mut self, seconds: f64) -> Self {
        self.scan_time_sec = Some(Lenient::Number(seconds));
        self
    }

    pub fn deadband(mut self, deadband: f64) -> Self {
        self.deadband = Some(Lenient::Number(deadband));
        self
    }

    pub fn send_initial_value(mut self, send: bool) -> Self {
        self.send_initial_value = send;
        self
    }

    /// `msg.payload`, `msg` or `value` with its companion field
    pub fn value(mut self, value_type: &str, value: &str) -> Self {
        self.value_type = value_type.to_string();
        self.value = value.to_string();
        self
    }

    pub fn input_config(self) -> InputNodeConfig {
        InputNodeConfig {
            common: self.common,
            scan_time_sec: self.scan_time_sec,
            deadband: self.deadband,
            send_initial_value: self.send_initial_value,
        }
    }

    pub fn read_config(self) -> ReadNodeConfig {
        ReadNodeConfig {
            common: self.common,
            value_type: self.value_type,
            value: self.value,
        }
    }

    pub fn write_config(self) -> WriteNodeConfig {
        WriteNodeConfig {
            common: self.common,
            value_type: self.value_type,
            value: self.value,
        }
    }

    pub fn input(self) -> InputSettings {
        self.input_config().resolve().unwrap()
    }

    pub fn read(self) -> ReadSettings {
        self.read_config().resolve().unwrap()
    }

    pub fn write(self) -> WriteSettings {
        self.write_config().resolve().unwrap()
    }
}

