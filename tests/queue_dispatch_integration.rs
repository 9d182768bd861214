//! Integration tests for read nodes sharing one device queue

mod common;

use common::builders::{connection, NodeBuilder};
use common::mock_helpers::RecordingHost;
use common::{settle, settle_after_failure};
use groov_io_bridge::device::{DeviceConnection, RequestError, SimulatedDevice};
use groov_io_bridge::nodes::ReadNode;
use groov_io_bridge::queue::{AddOutcome, OverflowPolicy};
use groov_io_bridge::types::{FlowMessage, NodeStatus};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn slow_rack(latency_ms: u64) -> Arc<SimulatedDevice> {
    Arc::new(SimulatedDevice::demo_rack().with_latency(Duration::from_millis(latency_ms)))
}

fn quality_reader(id: &str, conn: &Arc<DeviceConnection>) -> (Arc<ReadNode>, Arc<RecordingHost>) {
    let host = RecordingHost::new();
    let node = ReadNode::new(
        NodeBuilder::new(id, "modules-quality").read(),
        Some(Arc::clone(conn)),
        host.clone(),
    );
    (node, host)
}

fn tagged(tag: &str) -> FlowMessage {
    let mut msg = FlowMessage::new();
    msg.insert("tag", json!(tag));
    msg
}

#[tokio::test(start_paused = true)]
async fn test_two_nodes_share_one_request_at_a_time() {
    let device = slow_rack(100);
    device.set_quality_mask(0b101);
    let conn = connection(&device, 2, OverflowPolicy::RejectNew);
    let (first, first_host) = quality_reader("q1", &conn);
    let (second, second_host) = quality_reader("q2", &conn);

    assert_eq!(first.input(tagged("a")).unwrap(), AddOutcome::Dispatched);
    assert_eq!(
        second.input(tagged("b")).unwrap(),
        AddOutcome::Queued { position: 1 }
    );
    assert_eq!(second_host.current_status(), Some(NodeStatus::waiting("queued")));

    let rejected = second.input(tagged("c")).unwrap();
    assert!(rejected.is_rejected());
    assert_eq!(second_host.current_status(), Some(NodeStatus::waiting_in_error("queue full")));
    assert_eq!(
        second_host.warnings(),
        vec!["Message rejected. Queue is full for device rack.".to_string()]
    );

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(device.request_count("module_quality"), 2);
    assert_eq!(first_host.sent().len(), 1);
    assert_eq!(first_host.sent()[0].get("tag"), Some(&json!("a")));
    assert_eq!(first_host.sent()[0].payload(), Some(&json!({ "qualityMask": 5 })));
    assert_eq!(first_host.current_status(), None);
    assert_eq!(second_host.current_status(), Some(NodeStatus::active("reading")));
    assert!(second_host.sent().is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let sent = second_host.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].get("tag"), Some(&json!("b")));
    assert!(conn.queue.is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_failure_holds_the_queue_briefly() {
    let device = Arc::new(SimulatedDevice::demo_rack());
    let conn = connection(&device, 10, OverflowPolicy::RejectNew);
    let (first, first_host) = quality_reader("q1", &conn);
    let (second, second_host) = quality_reader("q2", &conn);

    device.fail_next(RequestError::status(401));
    first.input(FlowMessage::new()).unwrap();
    second.input(FlowMessage::new()).unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(device.total_requests(), 1);
    assert_eq!(first_host.current_status(), Some(NodeStatus::error("Bad API key")));
    assert_eq!(first_host.errors(), vec!["Bad API key. HTTP response error : 401".to_string()]);
    assert!(second_host.sent().is_empty());

    settle_after_failure().await;
    assert_eq!(device.total_requests(), 2);
    assert_eq!(second_host.sent().len(), 1);

    // The next request from the failed node shows the remembered error while it runs
    first.input(FlowMessage::new()).unwrap();
    assert!(first_host
        .statuses()
        .contains(&NodeStatus::error("reading [Bad API key]")));
    settle().await;
    assert_eq!(first_host.current_status(), None);
    assert_eq!(first_host.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_closing_a_node_drops_its_waiting_requests() {
    let device = slow_rack(100);
    let conn = connection(&device, 10, OverflowPolicy::RejectNew);
    let (first, first_host) = quality_reader("q1", &conn);
    let (second, second_host) = quality_reader("q2", &conn);

    first.input(tagged("a")).unwrap();
    second.input(tagged("b")).unwrap();
    second.input(tagged("c")).unwrap();
    first.input(tagged("d")).unwrap();
    assert_eq!(conn.queue.len(), 4);

    second.close();
    assert_eq!(conn.queue.len(), 2);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(device.request_count("module_quality"), 2);
    let tags: Vec<_> = first_host.sent().iter().map(|m| m.get("tag").cloned()).collect();
    assert_eq!(tags, vec![Some(json!("a")), Some(json!("d"))]);
    assert!(second_host.sent().is_empty());
    assert!(conn.queue.is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_closing_during_request_frees_the_slot_silently() {
    let device = slow_rack(100);
    let conn = connection(&device, 10, OverflowPolicy::RejectNew);
    let (first, first_host) = quality_reader("q1", &conn);
    let (second, second_host) = quality_reader("q2", &conn);

    first.input(tagged("a")).unwrap();
    second.input(tagged("b")).unwrap();
    first.close();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(first_host.sent().is_empty());
    assert_eq!(second_host.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_drop_oldest_replaces_waiting_request() {
    let device = slow_rack(100);
    let conn = connection(&device, 2, OverflowPolicy::DropOldest);
    let (node, host) = quality_reader("q1", &conn);

    node.input(tagged("a")).unwrap();
    node.input(tagged("b")).unwrap();
    let outcome = node.input(tagged("c")).unwrap();
    assert_eq!(outcome, AddOutcome::Queued { position: 1 });

    tokio::time::sleep(Duration::from_millis(300)).await;
    let tags: Vec<_> = host.sent().iter().map(|m| m.get("tag").cloned()).collect();
    assert_eq!(tags, vec![Some(json!("a")), Some(json!("c"))]);
}

#[tokio::test(start_paused = true)]
async fn test_slow_read_shows_delayed_status() {
    let device = slow_rack(4000);
    let conn = connection(&device, 10, OverflowPolicy::RejectNew);
    let (node, host) = quality_reader("q1", &conn);

    node.input(FlowMessage::new()).unwrap();
    tokio::time::sleep(Duration::from_millis(3100)).await;
    assert_eq!(host.current_status(), Some(NodeStatus::delayed("reading (delayed)")));

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(host.current_status(), None);
    assert_eq!(host.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_message_overrides_select_channel() {
    let device = Arc::new(SimulatedDevice::demo_rack());
    device.set_analog_input(2, 3, 7.5);
    let conn = connection(&device, 10, OverflowPolicy::RejectNew);
    let host = RecordingHost::new();
    let node = ReadNode::new(
        NodeBuilder::new("ai", "channel-analog")
            .channel(2, 0)
            .value("msg", "data.value")
            .read(),
        Some(conn.clone()),
        host.clone(),
    );

    let mut msg = FlowMessage::with_payload("untouched");
    msg.insert("channelIndex", json!("3"));
    node.input(msg).unwrap();
    settle().await;

    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].get_property("data.value"), Some(&json!(7.5)));
    assert_eq!(sent[0].payload(), Some(&json!("untouched")));
    assert_eq!(sent[0].body().unwrap()["channelIndex"], json!(3));

    let mut bad = FlowMessage::new();
    bad.insert("channelIndex", json!("x"));
    node.input(bad).unwrap();
    settle().await;
    assert_eq!(host.errors(), vec!["msg.channelIndex is not a valid index.".to_string()]);
    assert_eq!(host.current_status(), Some(NodeStatus::error("error")));
    assert!(conn.queue.is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_channel_reports_not_found() {
    let device = Arc::new(SimulatedDevice::demo_rack());
    let conn = connection(&device, 10, OverflowPolicy::RejectNew);
    let host = RecordingHost::new();
    let node = ReadNode::new(
        NodeBuilder::new("di", "channel-digital").channel(7, 0).read(),
        Some(conn),
        host.clone(),
    );

    node.input(FlowMessage::new()).unwrap();
    settle().await;
    assert_eq!(host.current_status(), Some(NodeStatus::error("Not found")));
    assert!(host.sent().is_empty());
}
