//! Integration tests for write nodes against a simulated device

mod common;

use common::builders::{connection, NodeBuilder};
use common::mock_helpers::RecordingHost;
use common::settle;
use groov_io_bridge::device::{DeviceApi, SimulatedDevice};
use groov_io_bridge::nodes::WriteNode;
use groov_io_bridge::queue::OverflowPolicy;
use groov_io_bridge::types::{FlowMessage, MmpType, NodeStatus};
use groov_io_bridge::BridgeError;
use serde_json::json;
use std::sync::Arc;

fn writer(builder: NodeBuilder) -> (Arc<SimulatedDevice>, Arc<WriteNode>, Arc<RecordingHost>) {
    let device = Arc::new(SimulatedDevice::demo_rack());
    let host = RecordingHost::new();
    let node = WriteNode::new(
        builder.write(),
        Some(connection(&device, 10, OverflowPolicy::RejectNew)),
        host.clone(),
    );
    (device, node, host)
}

#[tokio::test(start_paused = true)]
async fn test_digital_write_from_text_payload() {
    let (device, node, host) = writer(NodeBuilder::new("do", "channel-digital").channel(1, 6));

    node.input(FlowMessage::with_payload("On")).unwrap();
    settle().await;
    assert_eq!(device.digital_state(1, 6), Some(true));

    node.input(FlowMessage::with_payload(false)).unwrap();
    settle().await;
    assert_eq!(device.digital_state(1, 6), Some(false));

    let sent = host.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].payload(), Some(&json!("On")));
    assert_eq!(sent[0].body(), Some(&json!({})));
    assert_eq!(host.current_status(), None);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_value_is_rejected_before_queueing() {
    let (device, node, host) = writer(NodeBuilder::new("do", "channel-digital"));

    let err = node.input(FlowMessage::with_payload("maybe")).unwrap_err();
    assert!(matches!(err, BridgeError::InvalidValue(_)));
    settle().await;

    assert_eq!(device.total_requests(), 0);
    assert_eq!(
        host.errors(),
        vec!["\"maybe\" is not a valid value for a digital output.".to_string()]
    );
    assert_eq!(host.current_status(), Some(NodeStatus::error("error")));

    // The queue is untouched, so the next good message goes straight out
    node.input(FlowMessage::with_payload("on")).unwrap();
    settle().await;
    assert_eq!(device.digital_state(0, 0), Some(true));
}

#[tokio::test(start_paused = true)]
async fn test_missing_property_is_reported() {
    let (device, node, host) = writer(
        NodeBuilder::new("ao", "channel-analog")
            .channel(2, 1)
            .value("msg", "setpoint.value"),
    );

    assert!(node.input(FlowMessage::new()).is_err());
    assert_eq!(host.errors(), vec!["msg.setpoint.value is undefined.".to_string()]);

    let mut msg = FlowMessage::new();
    msg.set_property("setpoint.value", json!("12.25"));
    node.input(msg).unwrap();
    settle().await;
    common::assert_float_eq(device.analog_value(2, 1).unwrap(), 12.25, 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_literal_value_and_channel_override() {
    let (device, node, _host) = writer(
        NodeBuilder::new("ao", "channel-analog")
            .channel(2, 0)
            .value("value", "3.5"),
    );

    let mut msg = FlowMessage::with_payload("ignored");
    msg.insert("channelIndex", json!(2));
    node.input(msg).unwrap();
    settle().await;

    assert_eq!(device.analog_value(2, 2), Some(3.5));
    assert_eq!(device.analog_value(2, 0), Some(0.0));
}

#[tokio::test(start_paused = true)]
async fn test_mmp_write_converts_to_integer() {
    let (device, node, host) = writer(
        NodeBuilder::new("mmp", "mmp-address").mmp("0xF0D81000", MmpType::Int32, 1),
    );

    node.input(FlowMessage::with_payload(" 42 ")).unwrap();
    settle().await;
    assert_eq!(device.mmp("0xf0d81000"), Some(vec![json!(42)]));

    let mut msg = FlowMessage::with_payload("7.9");
    msg.insert("mmpAddress", json!("0xF0D82000"));
    node.input(msg).unwrap();
    settle().await;
    assert_eq!(device.mmp("0xF0D82000"), Some(vec![json!(7)]));
    assert!(host.errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_clear_latch_ignores_payload() {
    let (device, node, host) = writer(
        NodeBuilder::new("clr", "channel-clear-on-latch").channel(0, 3),
    );
    device.set_digital_input(0, 3, true);

    // No payload at all is fine for targets that take no value
    node.input(FlowMessage::new()).unwrap();
    settle().await;

    assert_eq!(device.request_count("clear_on_latch"), 1);
    assert_eq!(host.sent().len(), 1);
    assert!(host.errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_counter_start_and_clear() {
    let device = Arc::new(SimulatedDevice::demo_rack());
    let conn = connection(&device, 10, OverflowPolicy::RejectNew);
    let start = WriteNode::new(
        NodeBuilder::new("start", "channel-counter-start").channel(0, 1).write(),
        Some(conn.clone()),
        RecordingHost::new(),
    );
    let clear = WriteNode::new(
        NodeBuilder::new("clear", "channel-clear-feature-value").channel(0, 1).write(),
        Some(conn.clone()),
        RecordingHost::new(),
    );

    start.input(FlowMessage::new()).unwrap();
    settle().await;
    for _ in 0..3 {
        device.set_digital_input(0, 1, true);
        device.set_digital_input(0, 1, false);
    }
    let status = conn.client.digital_channel_status(0, 1).await.unwrap();
    assert_eq!(status["featureValue"], json!(3.0));

    clear.input(FlowMessage::new()).unwrap();
    settle().await;
    let status = conn.client.digital_channel_status(0, 1).await.unwrap();
    assert_eq!(status["featureValue"], json!(0.0));
}

#[tokio::test(start_paused = true)]
async fn test_device_rejection_is_classified() {
    let (_device, node, host) = writer(NodeBuilder::new("do", "channel-digital").channel(5, 0));

    node.input(FlowMessage::with_payload(true)).unwrap();
    settle().await;

    assert_eq!(host.current_status(), Some(NodeStatus::error("Not found")));
    assert_eq!(host.errors(), vec!["Not found. HTTP response error : 404".to_string()]);
    assert!(host.sent().is_empty());
}

#[tokio::test]
async fn test_missing_device_rejects_input() {
    let host = RecordingHost::new();
    let node = WriteNode::new(
        NodeBuilder::new("do", "channel-digital").device("ghost").write(),
        None,
        host.clone(),
    );

    let err = node.input(FlowMessage::with_payload(true)).unwrap_err();
    assert!(matches!(err, BridgeError::MissingDevice(_)));
    assert_eq!(
        host.current_status(),
        Some(NodeStatus::error("missing device configuration"))
    );
}
