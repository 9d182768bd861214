//! In-memory controller
//!
//! [`SimulatedDevice`] answers every [`DeviceApi`] call from local state. It is
//! what the command line binary runs against and what the test suite drives.
//! Failures can be scripted ahead of time and a fixed latency can be added to
//! every call so timer behaviour (delayed status, queue ordering) can be
//! exercised.
//!
//! # Example
//!
//! ```ignore
//! let device = SimulatedDevice::new()
//!     .with_digital_module(0, 8)
//!     .with_analog_module(1, 4);
//! device.set_digital_input(0, 3, true);
//! device.fail_next(RequestError::status(401));
//! ```

use super::{DeviceApi, DeviceResult, MmpWrite, RequestError};
use crate::types::MmpType;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct DigitalChannel {
    state: bool,
    on_latch: bool,
    off_latch: bool,
    feature_value: f64,
    counter_active: bool,
}

#[derive(Debug, Clone, Default)]
struct AnalogChannel {
    value: f64,
    min_value: f64,
    max_value: f64,
}

#[derive(Debug, Clone)]
enum Module {
    Digital(Vec<DigitalChannel>),
    Analog(Vec<AnalogChannel>),
}

#[derive(Debug, Default)]
struct DeviceState {
    modules: BTreeMap<u32, Module>,
    configs: HashMap<(u32, u32), Value>,
    mmp: HashMap<String, Vec<Value>>,
    quality_mask: u64,
}

/// Simulated controller
#[derive(Debug, Default)]
pub struct SimulatedDevice {
    state: Mutex<DeviceState>,
    failures: Mutex<VecDeque<RequestError>>,
    requests: Mutex<HashMap<&'static str, usize>>,
    latency: Duration,
}

fn not_found(what: &str) -> RequestError {
    RequestError::Protocol {
        status: 404,
        body: format!("{} not found", what),
    }
}

fn bad_request(what: impl Into<String>) -> RequestError {
    RequestError::Protocol {
        status: 400,
        body: what.into(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedDevice {
    /// Empty device with no modules
    pub fn new() -> Self {
        Self::default()
    }

    /// Device with digital modules at 0 and 1 and an analog module at 2
    pub fn demo_rack() -> Self {
        Self::new()
            .with_digital_module(0, 8)
            .with_digital_module(1, 8)
            .with_analog_module(2, 4)
    }

    /// Add a digital module with `channels` channels, all off
    pub fn with_digital_module(self, index: u32, channels: usize) -> Self {
        lock(&self.state)
            .modules
            .insert(index, Module::Digital(vec![DigitalChannel::default(); channels]));
        self
    }

    /// Add an analog module with `channels` channels, all at zero
    pub fn with_analog_module(self, index: u32, channels: usize) -> Self {
        lock(&self.state)
            .modules
            .insert(index, Module::Analog(vec![AnalogChannel::default(); channels]));
        self
    }

    /// Delay every response by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Drive a digital input, updating latches and the counter like hardware would
    pub fn set_digital_input(&self, module: u32, channel: u32, value: bool) {
        let mut state = lock(&self.state);
        if let Ok(ch) = digital_channel_mut(&mut state, module, channel) {
            apply_digital(ch, value);
        }
    }

    /// Drive an analog input, updating min/max tracking
    pub fn set_analog_input(&self, module: u32, channel: u32, value: f64) {
        let mut state = lock(&self.state);
        if let Ok(ch) = analog_channel_mut(&mut state, module, channel) {
            apply_analog(ch, value);
        }
    }

    /// Store values at an MMP address
    pub fn set_mmp(&self, address: &str, values: Vec<Value>) {
        lock(&self.state).mmp.insert(normalize_address(address), values);
    }

    /// Current value stored at an MMP address
    pub fn mmp(&self, address: &str) -> Option<Vec<Value>> {
        lock(&self.state).mmp.get(&normalize_address(address)).cloned()
    }

    pub fn set_quality_mask(&self, mask: u64) {
        lock(&self.state).quality_mask = mask;
    }

    /// Current output state of a digital channel
    pub fn digital_state(&self, module: u32, channel: u32) -> Option<bool> {
        let mut state = lock(&self.state);
        digital_channel_mut(&mut state, module, channel)
            .ok()
            .map(|ch| ch.state)
    }

    /// Current value of an analog channel
    pub fn analog_value(&self, module: u32, channel: u32) -> Option<f64> {
        let mut state = lock(&self.state);
        analog_channel_mut(&mut state, module, channel)
            .ok()
            .map(|ch| ch.value)
    }

    /// Fail the next request with `error`; queued failures are consumed in order
    pub fn fail_next(&self, error: RequestError) {
        lock(&self.failures).push_back(error);
    }

    /// Number of calls made to one operation, by method name
    pub fn request_count(&self, operation: &str) -> usize {
        lock(&self.requests).get(operation).copied().unwrap_or(0)
    }

    /// Number of calls made across all operations
    pub fn total_requests(&self) -> usize {
        lock(&self.requests).values().sum()
    }

    /// Count the call, apply latency and pop a scripted failure
    async fn begin(&self, operation: &'static str) -> Result<(), RequestError> {
        *lock(&self.requests).entry(operation).or_insert(0) += 1;
        tracing::trace!("Simulated request {}", operation);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match lock(&self.failures).pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut DeviceState) -> Result<T, RequestError>) -> Result<T, RequestError> {
        let mut state = lock(&self.state);
        f(&mut state)
    }
}

fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

fn apply_digital(ch: &mut DigitalChannel, value: bool) {
    if value && !ch.state {
        ch.on_latch = true;
        if ch.counter_active {
            ch.feature_value += 1.0;
        }
    }
    if !value && ch.state {
        ch.off_latch = true;
    }
    ch.state = value;
}

fn apply_analog(ch: &mut AnalogChannel, value: f64) {
    ch.min_value = ch.min_value.min(value);
    ch.max_value = ch.max_value.max(value);
    ch.value = value;
}

fn digital_channel_mut(
    state: &mut DeviceState,
    module: u32,
    channel: u32,
) -> Result<&mut DigitalChannel, RequestError> {
    match state.modules.get_mut(&module) {
        Some(Module::Digital(channels)) => channels
            .get_mut(channel as usize)
            .ok_or_else(|| not_found("Channel")),
        _ => Err(not_found("Digital module")),
    }
}

fn analog_channel_mut(
    state: &mut DeviceState,
    module: u32,
    channel: u32,
) -> Result<&mut AnalogChannel, RequestError> {
    match state.modules.get_mut(&module) {
        Some(Module::Analog(channels)) => channels
            .get_mut(channel as usize)
            .ok_or_else(|| not_found("Channel")),
        _ => Err(not_found("Analog module")),
    }
}

fn default_config(module: &Module, channel: u32) -> Value {
    let channel_type = match module {
        Module::Digital(_) => "digital",
        Module::Analog(_) => "analog",
    };
    json!({
        "channelType": channel_type,
        "name": format!("Channel {}", channel),
        "enabled": true,
    })
}

fn mmp_default(mmp_type: MmpType) -> Value {
    match mmp_type {
        MmpType::String => Value::String(String::new()),
        MmpType::Float => json!(0.0),
        _ => json!(0),
    }
}

fn check_mmp_value(value: &Value, mmp_type: MmpType) -> Result<(), RequestError> {
    let ok = match mmp_type {
        MmpType::String => value.is_string(),
        MmpType::Float => value.is_number(),
        _ => value.is_i64() || value.is_u64(),
    };
    if ok {
        Ok(())
    } else {
        Err(bad_request(format!("Value {} does not match type {}", value, mmp_type)))
    }
}

#[async_trait]
impl DeviceApi for SimulatedDevice {
    async fn digital_channel_status(&self, module: u32, channel: u32) -> DeviceResult {
        self.begin("digital_channel_status").await?;
        self.with_state(|state| {
            let ch = digital_channel_mut(state, module, channel)?;
            Ok(json!({
                "moduleIndex": module,
                "channelIndex": channel,
                "state": ch.state,
                "onLatchState": ch.on_latch,
                "offLatchState": ch.off_latch,
                "featureValue": ch.feature_value,
                "counterActive": ch.counter_active,
            }))
        })
    }

    async fn analog_channel_status(&self, module: u32, channel: u32) -> DeviceResult {
        self.begin("analog_channel_status").await?;
        self.with_state(|state| {
            let ch = analog_channel_mut(state, module, channel)?;
            Ok(json!({
                "moduleIndex": module,
                "channelIndex": channel,
                "value": ch.value,
                "minValue": ch.min_value,
                "maxValue": ch.max_value,
            }))
        })
    }

    async fn channel_configuration(&self, module: u32, channel: u32) -> DeviceResult {
        self.begin("channel_configuration").await?;
        self.with_state(|state| {
            let m = state.modules.get(&module).ok_or_else(|| not_found("Module"))?;
            let count = match m {
                Module::Digital(c) => c.len(),
                Module::Analog(c) => c.len(),
            };
            if channel as usize >= count {
                return Err(not_found("Channel"));
            }
            let fallback = default_config(m, channel);
            Ok(state
                .configs
                .get(&(module, channel))
                .cloned()
                .unwrap_or(fallback))
        })
    }

    async fn module_digital_values(&self, module: u32) -> DeviceResult {
        self.begin("module_digital_values").await?;
        self.with_state(|state| match state.modules.get(&module) {
            Some(Module::Digital(channels)) => {
                let values: Vec<bool> = channels.iter().map(|c| c.state).collect();
                Ok(json!({ "channelValues": values }))
            }
            _ => Err(not_found("Digital module")),
        })
    }

    async fn module_analog_values(&self, module: u32) -> DeviceResult {
        self.begin("module_analog_values").await?;
        self.with_state(|state| match state.modules.get(&module) {
            Some(Module::Analog(channels)) => {
                let values: Vec<f64> = channels.iter().map(|c| c.value).collect();
                Ok(json!({ "channelValues": values }))
            }
            _ => Err(not_found("Analog module")),
        })
    }

    async fn module_quality(&self) -> DeviceResult {
        self.begin("module_quality").await?;
        self.with_state(|state| Ok(json!({ "qualityMask": state.quality_mask })))
    }

    async fn mmp_values(
        &self,
        address: String,
        mmp_type: MmpType,
        length: u32,
        _encoding: Option<String>,
    ) -> DeviceResult {
        self.begin("mmp_values").await?;
        if length == 0 {
            return Err(bad_request("Length must be at least 1"));
        }
        self.with_state(|state| {
            let stored = state.mmp.get(&normalize_address(&address));
            let length = if mmp_type == MmpType::String { 1 } else { length as usize };
            let values: Vec<Value> = (0..length)
                .map(|i| {
                    stored
                        .and_then(|values| values.get(i).cloned())
                        .unwrap_or_else(|| mmp_default(mmp_type))
                })
                .collect();
            Ok(json!({ "mmpValues": values }))
        })
    }

    async fn set_digital_state(&self, module: u32, channel: u32, value: Value) -> DeviceResult {
        self.begin("set_digital_state").await?;
        let value = value
            .as_bool()
            .ok_or_else(|| bad_request(format!("Invalid digital value {}", value)))?;
        self.with_state(|state| {
            apply_digital(digital_channel_mut(state, module, channel)?, value);
            Ok(json!({}))
        })
    }

    async fn set_analog_value(&self, module: u32, channel: u32, value: Value) -> DeviceResult {
        self.begin("set_analog_value").await?;
        let value = value
            .as_f64()
            .ok_or_else(|| bad_request(format!("Invalid analog value {}", value)))?;
        self.with_state(|state| {
            apply_analog(analog_channel_mut(state, module, channel)?, value);
            Ok(json!({}))
        })
    }

    async fn clear_on_latch(&self, module: u32, channel: u32) -> DeviceResult {
        self.begin("clear_on_latch").await?;
        self.with_state(|state| {
            digital_channel_mut(state, module, channel)?.on_latch = false;
            Ok(json!({}))
        })
    }

    async fn clear_off_latch(&self, module: u32, channel: u32) -> DeviceResult {
        self.begin("clear_off_latch").await?;
        self.with_state(|state| {
            digital_channel_mut(state, module, channel)?.off_latch = false;
            Ok(json!({}))
        })
    }

    async fn clear_feature_value(&self, module: u32, channel: u32) -> DeviceResult {
        self.begin("clear_feature_value").await?;
        self.with_state(|state| {
            digital_channel_mut(state, module, channel)?.feature_value = 0.0;
            Ok(json!({}))
        })
    }

    async fn clear_analog_min(&self, module: u32, channel: u32) -> DeviceResult {
        self.begin("clear_analog_min").await?;
        self.with_state(|state| {
            let ch = analog_channel_mut(state, module, channel)?;
            ch.min_value = ch.value;
            Ok(json!({}))
        })
    }

    async fn clear_analog_max(&self, module: u32, channel: u32) -> DeviceResult {
        self.begin("clear_analog_max").await?;
        self.with_state(|state| {
            let ch = analog_channel_mut(state, module, channel)?;
            ch.max_value = ch.value;
            Ok(json!({}))
        })
    }

    async fn set_counter_active(&self, module: u32, channel: u32, active: bool) -> DeviceResult {
        self.begin("set_counter_active").await?;
        self.with_state(|state| {
            digital_channel_mut(state, module, channel)?.counter_active = active;
            Ok(json!({}))
        })
    }

    async fn write_channel_configuration(
        &self,
        module: u32,
        channel: u32,
        config: Value,
    ) -> DeviceResult {
        self.begin("write_channel_configuration").await?;
        if !config.is_object() {
            return Err(bad_request("Channel configuration must be an object"));
        }
        self.with_state(|state| {
            if !state.modules.contains_key(&module) {
                return Err(not_found("Module"));
            }
            state.configs.insert((module, channel), config);
            Ok(json!({}))
        })
    }

    async fn write_mmp_value(&self, address: String, body: MmpWrite) -> DeviceResult {
        self.begin("write_mmp_value").await?;
        let values = match body.value {
            Value::Array(values) => values,
            other => vec![other],
        };
        for value in &values {
            check_mmp_value(value, body.mmp_type)?;
        }
        self.with_state(|state| {
            state.mmp.insert(normalize_address(&address), values);
            Ok(json!({}))
        })
    }
}
