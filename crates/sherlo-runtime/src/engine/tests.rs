use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use facet::Facet;
use parking_lot::Mutex;
use sherlo_bridge::{BridgeOptions, RunnerBridge};
use sherlo_device::fake::FakeDevice;
use sherlo_types::{
    ACTION_ACK_REQUEST_SNAPSHOT, ACTION_ACK_SCROLL_REQUEST, ACTION_ACK_START, AckRequestSnapshot,
    AckScrollRequest, AckStart, Entity, RawStory, Snapshot, SnapshotMode, StoryParameters,
    StoryRegistry,
};
use sherlo_wire::paths;

use super::*;
use crate::metadata::{FiberNode, FiberTree};

fn story(id: &str, title: &str) -> RawStory {
    RawStory {
        id: id.to_string(),
        component_id: title.to_lowercase().replace('/', "-"),
        title: title.to_string(),
        name: "Basic".to_string(),
        parameters: StoryParameters::default(),
        arg_types: None,
        initial_args: None,
    }
}

fn snapshot_for(id: &str, title: &str) -> Snapshot {
    Snapshot::from_story(&story(id, title), SnapshotMode::DeviceHeight)
}

/// Host whose "UI" is a single text node naming the rendered story.
struct FakeHost {
    rendered: Mutex<Option<String>>,
    crash_story: Option<String>,
}

impl FakeHost {
    fn new() -> Self {
        Self {
            rendered: Mutex::new(None),
            crash_story: None,
        }
    }

    fn crashing_on(story_id: &str) -> Self {
        Self {
            rendered: Mutex::new(None),
            crash_story: Some(story_id.to_string()),
        }
    }
}

#[async_trait]
impl StoryHost for FakeHost {
    async fn render_story(&self, story_id: &str) {
        *self.rendered.lock() = Some(story_id.to_string());
    }

    fn rendered_story_id(&self) -> Option<String> {
        self.rendered.lock().clone()
    }

    fn fiber_tree(&self) -> FiberTree {
        let rendered = self.rendered.lock().clone().unwrap_or_default();
        let crashed = self.crash_story.as_deref() == Some(rendered.as_str());
        let mut texts = vec![rendered];
        if crashed {
            texts.push(STORY_CRASH_SENTINEL.to_string());
        }
        FiberTree {
            nodes: vec![FiberNode {
                native_tag: Some(1),
                text_children: texts,
                ..FiberNode::default()
            }],
            roots: vec![0],
        }
    }

    fn rendered_story_has_error(&self) -> bool {
        false
    }

    fn safe_area_insets(&self) -> SafeAreaInsets {
        SafeAreaInsets {
            top: 20.0,
            bottom: 10.0,
        }
    }
}

#[derive(Facet, Debug)]
#[facet(rename_all = "camelCase")]
struct AppLinePeek {
    action: String,
    entity: Option<Entity>,
    request_id: Option<String>,
}

/// What the scripted runner answers one app line with.
enum Reply {
    Start(Option<Snapshot>),
    Next(Option<Snapshot>),
    Scroll { scroll_index: u32, offset_px: f64 },
}

/// Plays the runner process: answers each app line in order with the
/// scripted replies.
fn spawn_runner(device: FakeDevice, script: Vec<Reply>) {
    tokio::spawn(async move {
        let mut script = script.into_iter();
        let mut answered = 0usize;
        loop {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let content = device.file(paths::PROTOCOL).unwrap_or_default();

            let app_lines: Vec<AppLinePeek> = content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .filter_map(|line| facet_json::from_str::<AppLinePeek>(line).ok())
                .filter(|peek| {
                    peek.entity == Some(Entity::App)
                        && matches!(peek.action.as_str(), "START" | "REQUEST_SNAPSHOT")
                })
                .collect();

            while answered < app_lines.len() {
                let request = &app_lines[answered];
                let Some(reply) = script.next() else {
                    return;
                };
                let request_id = request.request_id.clone().unwrap_or_default();
                let line = match reply {
                    Reply::Start(next_snapshot) => facet_json::to_string(&AckStart {
                        action: ACTION_ACK_START.to_string(),
                        timestamp: Some(1),
                        entity: Some(Entity::Runner),
                        request_id,
                        next_snapshot,
                        filtered_view_ids: None,
                    })
                    .expect("encode ack"),
                    Reply::Next(next_snapshot) => facet_json::to_string(&AckRequestSnapshot {
                        action: ACTION_ACK_REQUEST_SNAPSHOT.to_string(),
                        timestamp: Some(1),
                        entity: Some(Entity::Runner),
                        request_id,
                        next_snapshot,
                    })
                    .expect("encode ack"),
                    Reply::Scroll {
                        scroll_index,
                        offset_px,
                    } => facet_json::to_string(&AckScrollRequest {
                        action: ACTION_ACK_SCROLL_REQUEST.to_string(),
                        timestamp: Some(1),
                        entity: Some(Entity::Runner),
                        request_id,
                        scroll_index,
                        offset_px,
                    })
                    .expect("encode ack"),
                };

                let mut state = device.state.lock();
                let entry = state.files.entry(paths::PROTOCOL.to_string()).or_default();
                entry.push_str(&line);
                entry.push('\n');
                drop(state);
                answered += 1;
            }
        }
    });
}

const CONFIG_JSON: &str = "{\"stabilization\":{\"requiredMatches\":3,\"minScreenshotsCount\":2,\"intervalMs\":250,\"timeoutMs\":15000,\"threshold\":0.1}}";

fn provisioned_device() -> FakeDevice {
    FakeDevice::new()
        .with_file(paths::CONFIG, CONFIG_JSON)
        .with_file(paths::CONFIG_SIGNATURE, &sherlo_wire::sign_config(CONFIG_JSON))
}

fn fast_session(device: &FakeDevice, host: Arc<FakeHost>, stories: Vec<RawStory>) -> TestSession<FakeHost> {
    let bridge = RunnerBridge::with_options(
        Arc::new(device.clone()),
        BridgeOptions {
            poll_interval: Duration::from_millis(10),
            send_timeout: Duration::from_secs(5),
        },
    );
    TestSession::new(
        bridge,
        Arc::new(device.clone()),
        host,
        Arc::new(EffectRegistry::new()),
        StoryRegistry::new(stories),
        SessionOptions {
            render_poll_interval: Duration::from_millis(10),
            render_timeout: Duration::from_secs(2),
            post_render_settle: Duration::from_millis(1),
            effect_settle: Duration::from_millis(5),
            inspector_attempts: 3,
            ..SessionOptions::default()
        },
    )
}

#[tokio::test(start_paused = true)]
async fn full_session_walks_every_snapshot() {
    let device = provisioned_device();
    let host = Arc::new(FakeHost::new());
    let stories = vec![story("a--basic", "components/A"), story("b--basic", "components/B")];

    // Preparation reverses registry order: B first, then A.
    spawn_runner(
        device.clone(),
        vec![
            Reply::Start(Some(snapshot_for("b--basic", "components/B"))),
            Reply::Next(Some(snapshot_for("a--basic", "components/A"))),
            Reply::Next(None),
        ],
    );

    let summary = fast_session(&device, host.clone(), stories)
        .run()
        .await
        .expect("session");
    assert_eq!(summary, SessionSummary { tested: 2, completed: true });

    let protocol = device.file(paths::PROTOCOL).expect("protocol file");
    assert!(protocol.contains("\"action\":\"JS_LOADED\""));
    assert!(protocol.contains("\"action\":\"START\""));
    assert!(protocol.contains("\"action\":\"END\""));

    // Position was persisted along the way.
    let state = device.file(paths::STATE).expect("state file");
    assert!(state.contains("snapshotIndex"));
}

#[tokio::test(start_paused = true)]
async fn crashed_story_is_reported_not_fatal() {
    let device = provisioned_device();
    let host = Arc::new(FakeHost::crashing_on("b--basic"));
    let stories = vec![story("b--basic", "components/B")];

    spawn_runner(
        device.clone(),
        vec![
            Reply::Start(Some(snapshot_for("b--basic", "components/B"))),
            Reply::Next(None),
        ],
    );

    let summary = fast_session(&device, host, stories)
        .run()
        .await
        .expect("session");
    assert_eq!(summary.tested, 1);
    assert!(summary.completed);

    let protocol = device.file(paths::PROTOCOL).expect("protocol file");
    assert!(protocol.contains("\"hasError\":true"));
}

#[tokio::test(start_paused = true)]
async fn stabilization_failure_ends_session_with_retry_marker() {
    let device = provisioned_device();
    device.state.lock().stabilize_failures_remaining = 10;
    let host = Arc::new(FakeHost::new());
    let stories = vec![story("b--basic", "components/B")];

    spawn_runner(
        device.clone(),
        vec![Reply::Start(Some(snapshot_for("b--basic", "components/B")))],
    );

    let summary = fast_session(&device, host, stories)
        .run()
        .await
        .expect("session must not crash the host");
    assert_eq!(summary, SessionSummary { tested: 0, completed: false });

    let state = device.file(paths::STATE).expect("state file");
    assert!(state.contains("\"retry\":true"));
}

#[tokio::test(start_paused = true)]
async fn scroll_requests_page_through_the_same_snapshot() {
    let device = provisioned_device();
    device.state.lock().scrollable = true;
    device.state.lock().content_px = 2400.0;
    let host = Arc::new(FakeHost::new());
    let stories = vec![story("b--basic", "components/B")];

    spawn_runner(
        device.clone(),
        vec![
            Reply::Start(Some(snapshot_for("b--basic", "components/B"))),
            Reply::Scroll { scroll_index: 1, offset_px: 0.0 },
            Reply::Next(None),
        ],
    );

    let summary = fast_session(&device, host, stories)
        .run()
        .await
        .expect("session");
    assert_eq!(summary.tested, 1);

    let scroll_calls = device.state.lock().scroll_calls.clone();
    assert_eq!(scroll_calls, vec![(1, 0.0)]);

    let protocol = device.file(paths::PROTOCOL).expect("protocol file");
    assert!(protocol.contains("\"scrollIndex\":1"));
}

#[tokio::test(start_paused = true)]
async fn restart_resumes_from_mailbox_without_new_start() {
    let device = provisioned_device();
    let host = Arc::new(FakeHost::new());
    let stories = vec![story("a--basic", "components/A"), story("b--basic", "components/B")];

    // A previous run got as far as being told to render A next.
    let previous = format!(
        "{}\n{}\n",
        facet_json::to_string(&AckStart {
            action: ACTION_ACK_START.to_string(),
            timestamp: Some(1),
            entity: Some(Entity::Runner),
            request_id: "req-old-1".to_string(),
            next_snapshot: Some(snapshot_for("b--basic", "components/B")),
            filtered_view_ids: None,
        })
        .expect("encode"),
        facet_json::to_string(&AckRequestSnapshot {
            action: ACTION_ACK_REQUEST_SNAPSHOT.to_string(),
            timestamp: Some(2),
            entity: Some(Entity::Runner),
            request_id: "req-old-2".to_string(),
            next_snapshot: Some(snapshot_for("a--basic", "components/A")),
        })
        .expect("encode"),
    );
    device
        .state
        .lock()
        .files
        .insert(paths::PROTOCOL.to_string(), previous);

    spawn_runner(device.clone(), vec![Reply::Next(None)]);

    let summary = fast_session(&device, host.clone(), stories)
        .run()
        .await
        .expect("session");
    assert_eq!(summary.tested, 1);

    // The resumed session reported story A and never re-sent START.
    assert_eq!(host.rendered_story_id().as_deref(), Some("a--basic"));
    let protocol = device.file(paths::PROTOCOL).expect("protocol file");
    assert!(!protocol.contains("\"action\":\"START\""));
    // Resumption is visible to the runner through the retry marker.
    let state = device.file(paths::STATE).expect("state file");
    assert!(state.contains("\"retry\":true"));
}

#[tokio::test(start_paused = true)]
async fn inspector_retries_then_succeeds() {
    let device = provisioned_device();
    device.state.lock().inspector_failures_remaining = 2;
    let host = Arc::new(FakeHost::new());
    let stories = vec![story("b--basic", "components/B")];

    spawn_runner(
        device.clone(),
        vec![
            Reply::Start(Some(snapshot_for("b--basic", "components/B"))),
            Reply::Next(None),
        ],
    );

    let summary = fast_session(&device, host, stories)
        .run()
        .await
        .expect("session");
    assert_eq!(summary, SessionSummary { tested: 1, completed: true });
}

#[tokio::test]
async fn untrusted_config_is_fatal_for_the_session() {
    let device = FakeDevice::new()
        .with_file(paths::CONFIG, CONFIG_JSON)
        .with_file(paths::CONFIG_SIGNATURE, "tampered");
    let host = Arc::new(FakeHost::new());

    let err = fast_session(&device, host, vec![story("a--basic", "components/A")])
        .run()
        .await
        .expect_err("must fail");
    assert!(matches!(err, RuntimeError::Bridge(_)));
}
