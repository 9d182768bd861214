//! Test to verify test infrastructure works correctly

mod common;

use common::builders::NodeBuilder;
use common::mock_helpers::{Recorded, RecordingHost};
use groov_io_bridge::config::{ReadTarget, ValueTarget};
use groov_io_bridge::nodes::NodeHost;
use groov_io_bridge::types::{FlowMessage, NodeStatus};

#[test]
fn test_infrastructure_setup() {
    let settings = NodeBuilder::new("read", "module-digital")
        .channel(1, 0)
        .value("msg", "out")
        .read();

    assert_eq!(settings.id.as_str(), "read");
    assert_eq!(settings.target, ReadTarget::ModuleDigital { module: 1 });
    assert_eq!(settings.value_target, ValueTarget::Property("out".to_string()));
}

#[test]
fn test_recording_host_tracks_current_status() {
    let host = RecordingHost::new();
    assert_eq!(host.current_status(), None);

    host.set_status(NodeStatus::active("reading"));
    host.send(FlowMessage::with_payload(1));
    assert_eq!(host.current_status(), Some(NodeStatus::active("reading")));

    host.clear_status();
    assert_eq!(host.current_status(), None);
    assert_eq!(host.records().len(), 3);
    assert!(matches!(host.records()[1], Recorded::Sent(_)));
}

#[test]
fn test_float_comparison() {
    common::assert_float_eq(1.0, 1.0000001, 0.001);
}

#[test]
#[should_panic]
fn test_float_comparison_fails() {
    common::assert_float_eq(1.0, 2.0, 0.001);
}
