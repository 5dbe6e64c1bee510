use std::sync::Arc;
use std::time::Duration;

use sherlo_device::fake::FakeDevice;
use sherlo_types::{
    ACTION_ACK_START, AckRequestSnapshot, AckStart, Entity, RawStory, RequestSnapshotMessage,
    RunnerAck, RunnerState, Snapshot, SnapshotMode, StoryParameters,
};
use sherlo_wire::paths;

use crate::{BridgeError, BridgeOptions, RunnerBridge};

fn fast_options() -> BridgeOptions {
    BridgeOptions {
        poll_interval: Duration::from_millis(10),
        send_timeout: Duration::from_millis(500),
    }
}

fn bridge_over(device: &FakeDevice) -> RunnerBridge {
    RunnerBridge::with_options(Arc::new(device.clone()), fast_options())
}

fn snapshot(story_id: &str) -> Snapshot {
    let story = RawStory {
        id: story_id.to_string(),
        component_id: "components-button".to_string(),
        title: "components/Button".to_string(),
        name: "Primary".to_string(),
        parameters: StoryParameters::default(),
        arg_types: None,
        initial_args: None,
    };
    Snapshot::from_story(&story, SnapshotMode::DeviceHeight)
}

fn ack_start_json(request_id: &str, story_id: &str) -> String {
    let ack = AckStart {
        action: ACTION_ACK_START.to_string(),
        timestamp: Some(1),
        entity: Some(Entity::Runner),
        request_id: request_id.to_string(),
        next_snapshot: Some(snapshot(story_id)),
        filtered_view_ids: None,
    };
    facet_json::to_string(&ack).expect("encode ack")
}

fn ack_request_json(request_id: &str, story_id: Option<&str>) -> String {
    let ack = AckRequestSnapshot {
        action: sherlo_types::ACTION_ACK_REQUEST_SNAPSHOT.to_string(),
        timestamp: Some(2),
        entity: Some(Entity::Runner),
        request_id: request_id.to_string(),
        next_snapshot: story_id.map(snapshot),
    };
    facet_json::to_string(&ack).expect("encode ack")
}

/// Plays the runner: waits until the app's line shows up in the mailbox,
/// then appends the prepared ack.
fn spawn_runner(device: FakeDevice, awaited_fragment: &'static str, ack_json: String) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let content = device.file(paths::PROTOCOL).unwrap_or_default();
            if content.contains(awaited_fragment) {
                let mut state = device.state.lock();
                let entry = state.files.entry(paths::PROTOCOL.to_string()).or_default();
                entry.push_str(&ack_json);
                entry.push('\n');
                break;
            }
        }
    });
}

#[tokio::test(start_paused = true)]
async fn send_start_resolves_on_ack() {
    let device = FakeDevice::new();
    let bridge = bridge_over(&device);
    bridge.create().await.expect("create");

    spawn_runner(
        device.clone(),
        "\"action\":\"START\"",
        ack_start_json("req-1", "components-button--primary"),
    );

    let ack = bridge
        .send_start(vec![snapshot("components-button--primary")])
        .await
        .expect("ack start");
    assert_eq!(ack.request_id, "req-1");
    assert_eq!(
        ack.next_snapshot.map(|s| s.story_id),
        Some("components-button--primary".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn send_request_snapshot_matches_echoed_request_id() {
    let device = FakeDevice::new();
    let bridge = bridge_over(&device);
    bridge.create().await.expect("create");

    spawn_runner(
        device.clone(),
        "\"requestId\":\"req-7\"",
        ack_request_json("req-7", Some("components-button--secondary")),
    );

    let mut message = RequestSnapshotMessage::new("req-7".to_string());
    message.is_stable = true;
    let ack = bridge.send_request_snapshot(message).await.expect("ack");
    let RunnerAck::RequestSnapshot(ack) = ack else {
        panic!("expected request-snapshot ack");
    };
    assert_eq!(ack.request_id, "req-7");
}

#[tokio::test(start_paused = true)]
async fn unresponsive_runner_times_out_instead_of_hanging() {
    let device = FakeDevice::new();
    let bridge = bridge_over(&device);
    bridge.create().await.expect("create");

    let err = bridge
        .send_start(vec![snapshot("components-button--primary")])
        .await
        .expect_err("must time out");
    assert!(matches!(err, BridgeError::AckTimeout { action: "START", .. }));
}

#[tokio::test]
async fn state_file_round_trips() {
    let device = FakeDevice::new();
    let bridge = bridge_over(&device);

    let state = RunnerState {
        snapshot_index: 4,
        filtered_view_ids: Some(vec!["a-deviceHeight".to_string()]),
        update_timestamp: 123,
        retry: Some(true),
    };
    bridge.update_state(&state).await.expect("update");
    let read_back = bridge.get_state().await.expect("read");
    assert_eq!(read_back, state);
}

#[tokio::test]
async fn missing_state_file_reports_no_state() {
    let device = FakeDevice::new();
    let bridge = bridge_over(&device);
    assert!(matches!(
        bridge.get_state().await.expect_err("must fail"),
        BridgeError::NoState
    ));
}

#[tokio::test]
async fn last_state_reconstructs_from_mailbox_alone() {
    let device = FakeDevice::new().with_file(
        paths::PROTOCOL,
        &format!(
            "{}\n{}\n",
            ack_start_json("req-1", "components-button--primary"),
            ack_request_json("req-2", Some("components-button--secondary")),
        ),
    );
    let bridge = bridge_over(&device);

    let state = bridge.get_last_state().await.expect("state");
    assert_eq!(state.request_id, "req-2");
    assert_eq!(
        state.next_snapshot.map(|s| s.story_id),
        Some("components-button--secondary".to_string())
    );
}

#[tokio::test]
async fn config_with_bad_signature_is_fatal() {
    let device = FakeDevice::new()
        .with_file(paths::CONFIG, "{\"stabilization\":{}}")
        .with_file(paths::CONFIG_SIGNATURE, "bogus");
    let bridge = bridge_over(&device);

    let err = bridge.get_config().await.expect_err("must fail");
    assert!(matches!(
        err,
        BridgeError::Wire(sherlo_wire::WireError::InvalidConfigSignature)
    ));
}

#[tokio::test]
async fn log_appends_audit_lines() {
    let device = FakeDevice::new();
    let bridge = bridge_over(&device);

    bridge.log("attempt to test story", None).await;
    bridge.log("checked if stable", None).await;

    let content = device.file(paths::LOG).expect("log file");
    assert_eq!(content.lines().count(), 2);
    assert!(content.contains("attempt to test story"));
}
