//! The "test all stories" traversal.
//!
//! One [`TestSession`] drives a whole testing run: it opens (or resumes)
//! the session with the runner, walks the snapshot list one story at a
//! time, and for each story waits for the render, stabilizes the frame,
//! collects and reconciles metadata, and reports the result through the
//! bridge. The runner answers every report with the next snapshot to
//! render; the session ends when no snapshot comes back.
//!
//! Failure policy: a story that crashes while rendering is still
//! reported (`hasError`), capability failures abort only the current
//! iteration, and a process restart resumes from the mailbox rather
//! than starting over.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sherlo_bridge::{BridgeError, RunnerBridge};
use sherlo_device::{DeviceAutomation, DeviceError};
use sherlo_types::{
    DeviceConfig, RequestSnapshotMessage, RunnerAck, RunnerState, SafeAreaMetadata, Snapshot,
    StoryRegistry, TargetPlatform,
};
use tracing::{info, warn};

use crate::effects::EffectRegistry;
use crate::metadata::{FiberTree, collect_metadata};
use crate::prepare::{PrepareOptions, SnapshotFilter, index_of_view_id, prepare_snapshots};
use crate::reconcile::prepare_inspector_data;
use crate::{RuntimeError, SessionState};

/// Error text the story framework renders when a story throws; its
/// presence anywhere in the collected texts marks the capture as failed.
pub const STORY_CRASH_SENTINEL: &str = "Something went wrong rendering your story";

/// Safe-area insets in logical units, as reported by the host UI.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafeAreaInsets {
    pub top: f64,
    pub bottom: f64,
}

/// What the engine needs from the UI layer that actually renders
/// stories. The host owns the component tree; the engine only ever sees
/// snapshots of it.
#[async_trait]
pub trait StoryHost: Send + Sync {
    /// Asks the host to render the given story. Returns once the request
    /// is dispatched; completion is observed via [`rendered_story_id`].
    ///
    /// [`rendered_story_id`]: StoryHost::rendered_story_id
    async fn render_story(&self, story_id: &str);

    /// Story id the host believes is currently on screen.
    fn rendered_story_id(&self) -> Option<String>;

    /// Current in-process component tree, both root generations.
    fn fiber_tree(&self) -> FiberTree;

    /// Whether the error boundary tripped for the current story.
    fn rendered_story_has_error(&self) -> bool;

    fn safe_area_insets(&self) -> SafeAreaInsets;
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Platform this process runs on, for `sherlo.platform` filtering.
    pub platform: Option<TargetPlatform>,
    /// How often the host is re-checked while waiting for a story to
    /// actually appear on screen.
    pub render_poll_interval: Duration,
    /// Give up waiting for the render after this long and capture
    /// whatever is there; the report will carry the consequences.
    pub render_timeout: Duration,
    /// Settle time after the story is on screen. The render callback
    /// fires slightly before the frame is really complete.
    pub post_render_settle: Duration,
    /// Settle time when a story effect ran; effects kick off animations
    /// and loads that need real time.
    pub effect_settle: Duration,
    /// Inspector capture is retried this many times before the iteration
    /// is abandoned.
    pub inspector_attempts: u32,
    /// Guardrail for the scroll sub-protocol.
    pub scroll_max_index: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            platform: None,
            render_poll_interval: Duration::from_millis(500),
            render_timeout: Duration::from_secs(60),
            post_render_settle: Duration::from_millis(100),
            effect_settle: Duration::from_secs(10),
            inspector_attempts: 20,
            scroll_max_index: 50,
        }
    }
}

/// How a finished session went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Snapshots reported to the runner.
    pub tested: u32,
    /// False when a capability failure ended the session early; the next
    /// launch resumes from the persisted state.
    pub completed: bool,
}

struct RequestIdSource {
    counter: u64,
}

impl RequestIdSource {
    fn new() -> Self {
        Self { counter: 0 }
    }

    fn next(&mut self) -> String {
        self.counter += 1;
        format!("req-{}-{}", sherlo_wire::now_ms(), self.counter)
    }
}

pub struct TestSession<H: StoryHost> {
    bridge: RunnerBridge,
    automation: Arc<dyn DeviceAutomation>,
    host: Arc<H>,
    effects: Arc<EffectRegistry>,
    registry: StoryRegistry,
    options: SessionOptions,
    state: SessionState,
    request_ids: RequestIdSource,
}

impl<H: StoryHost> TestSession<H> {
    pub fn new(
        bridge: RunnerBridge,
        automation: Arc<dyn DeviceAutomation>,
        host: Arc<H>,
        effects: Arc<EffectRegistry>,
        registry: StoryRegistry,
        options: SessionOptions,
    ) -> Self {
        Self {
            bridge,
            automation,
            host,
            effects,
            registry,
            options,
            state: SessionState::Idle,
            request_ids: RequestIdSource::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the whole traversal. Only a missing/invalid signed config or
    /// a broken transport during session setup is fatal; everything after
    /// that degrades per iteration.
    pub async fn run(mut self) -> Result<SessionSummary, RuntimeError> {
        if let Err(error) = self.bridge.send_js_loaded().await {
            // The runner can survive without the marker; the session may
            // still be able to proceed.
            warn!(%error, "failed to announce bundle load");
        }

        let config = self.bridge.get_config().await?;

        let mut snapshots = prepare_snapshots(
            &self.registry,
            &PrepareOptions {
                split_by_mode: true,
                filter: Some(SnapshotFilter {
                    include: config.include.clone().unwrap_or_default(),
                    exclude: config.exclude.clone().unwrap_or_default(),
                    platform: self.options.platform,
                }),
            },
        );
        self.bridge.log("snapshots prepared", None).await;

        self.state = SessionState::AwaitingStart;
        let (mut current, mut resumed) = (None, false);

        if let Some(mailbox_state) = self.bridge.get_last_state().await {
            if let Some(ids) = &mailbox_state.filtered_view_ids {
                snapshots.retain(|snapshot| ids.contains(&snapshot.view_id));
            }
            current = mailbox_state.next_snapshot;
            resumed = current.is_some();
        }

        if current.is_none() {
            if let Ok(state) = self.bridge.get_state().await {
                // The state file alone has no acknowledged snapshot to
                // resume onto; it only tells us this is a retry. The
                // runner re-establishes the position via START.
                info!(index = state.snapshot_index, "state file found, restarting session");
                resumed = true;
            }

            self.bridge.create().await?;
            let ack = self.bridge.send_start(snapshots.clone()).await?;
            if let Some(ids) = ack.filtered_view_ids {
                snapshots.retain(|snapshot| ids.contains(&snapshot.view_id));
            }
            current = ack.next_snapshot;
        }

        let mut tested = 0u32;
        while let Some(snapshot) = current.take() {
            self.persist_position(&snapshots, &snapshot, resumed).await;
            resumed = false;

            match self.test_one(&config, &snapshot).await {
                Ok(next) => {
                    tested += 1;
                    current = next;
                }
                Err(error) => {
                    // Log, persist the retry marker, and end this run
                    // without crashing the host; the next launch resumes
                    // here.
                    warn!(%error, story_id = %snapshot.story_id, "story capture failed");
                    self.bridge.log("story capturing failed", None).await;
                    self.mark_retry(&snapshots, &snapshot).await;
                    self.state = SessionState::Done;
                    return Ok(SessionSummary { tested, completed: false });
                }
            }
        }

        self.state = SessionState::Done;
        if let Err(error) = self.bridge.send_end().await {
            warn!(%error, "failed to send session end");
        }
        Ok(SessionSummary { tested, completed: true })
    }

    /// One full iteration: render, stabilize, collect, report. Returns
    /// the next snapshot to render, if the runner supplied one.
    async fn test_one(
        &mut self,
        config: &DeviceConfig,
        snapshot: &Snapshot,
    ) -> Result<Option<Snapshot>, IterationError> {
        self.state = SessionState::Rendering;
        self.bridge.log("attempt to test story", None).await;

        self.host.render_story(&snapshot.story_id).await;
        self.await_render(snapshot).await;

        if snapshot.sherlo_parameters.defocus == Some(true)
            && let Err(error) = self.automation.clear_focus().await
        {
            warn!(%error, "defocus failed");
        }

        // Story effects fire only once the story is really on screen;
        // give their consequences time to settle before capturing.
        let had_effect = self.effects.execute();
        let settle = if had_effect {
            self.options.effect_settle
        } else {
            self.options.post_render_settle
        };
        tokio::time::sleep(settle).await;

        self.state = SessionState::Stabilizing;
        if let Err(error) = self.automation.clear_focus().await {
            warn!(%error, "clearing focus before stabilization failed");
        }
        let is_stable = self
            .automation
            .stabilize(&config.stabilization)
            .await
            .map_err(IterationError::Stabilize)?;
        self.bridge.log("checked if stable", None).await;

        self.state = SessionState::CollectingMetadata;
        let metadata = collect_metadata(&self.host.fiber_tree());
        let has_error = metadata.contains_text(STORY_CRASH_SENTINEL)
            || self.host.rendered_story_has_error();

        let inspector = self.capture_inspector().await?;
        self.bridge.log("got inspector data", None).await;

        let mut message = RequestSnapshotMessage::new(self.request_ids.next());
        message.has_error = has_error;
        message.is_stable = is_stable;

        if has_error {
            // Report the raw capture; measuring a broken layout would
            // only produce misleading geometry.
            message.inspector_data = encode_inspector(&inspector);
        } else {
            let prepared = prepare_inspector_data(&inspector, &metadata, &snapshot.story_id);
            message.has_network_image = Some(prepared.has_network_image);
            message.inspector_data = encode_inspector(&prepared.inspector_data);

            message.is_scrollable_snapshot = match self.automation.is_scrollable_snapshot().await {
                Ok(scrollable) => scrollable,
                Err(error) => {
                    warn!(%error, "scrollability check failed");
                    false
                }
            };

            let insets = self.host.safe_area_insets();
            message.safe_area_metadata = Some(SafeAreaMetadata {
                should_add_safe_area: snapshot.parameters.no_safe_area != Some(true),
                inset_top: (insets.top * inspector.density).round() as i64,
                inset_bottom: (insets.bottom * inspector.density).round() as i64,
            });
        }

        self.state = SessionState::Reporting;
        self.report(config, message).await
    }

    /// Sends the report and, when the runner asks for more of a
    /// scrollable snapshot, pages through it: same cycle, one extra
    /// field.
    async fn report(
        &mut self,
        config: &DeviceConfig,
        mut message: RequestSnapshotMessage,
    ) -> Result<Option<Snapshot>, IterationError> {
        loop {
            let response = self
                .bridge
                .send_request_snapshot(message.clone())
                .await
                .map_err(IterationError::Bridge)?;

            match response {
                RunnerAck::ScrollRequest(ack) => {
                    self.bridge.log("received scroll request", None).await;
                    if ack.scroll_index > 0 {
                        let result = self
                            .automation
                            .scroll_to_checkpoint(
                                ack.scroll_index,
                                ack.offset_px,
                                self.options.scroll_max_index,
                            )
                            .await
                            .map_err(IterationError::Scroll)?;
                        if result.reached_bottom {
                            self.bridge.log("reached bottom during scroll", None).await;
                        }
                        match self.automation.stabilize(&config.stabilization).await {
                            Ok(true) => {}
                            Ok(false) => {
                                self.bridge.log("unstable after scroll", None).await;
                            }
                            Err(error) => return Err(IterationError::Stabilize(error)),
                        }
                    }
                    message.scroll_index = Some(ack.scroll_index);
                    message.is_stable = true;
                    message.request_id = self.request_ids.next();
                }
                RunnerAck::RequestSnapshot(ack) => {
                    self.bridge.log("received next snapshot", None).await;
                    return Ok(ack.next_snapshot);
                }
                RunnerAck::End | RunnerAck::Start(_) => return Ok(None),
            }
        }
    }

    /// Waits until the target story is really on screen. The host flips
    /// its rendered id slightly before the subtree exists, so the walked
    /// texts must mention the story too.
    async fn await_render(&self, snapshot: &Snapshot) {
        let started = tokio::time::Instant::now();
        loop {
            let rendered = self.host.rendered_story_id();
            if rendered.as_deref() == Some(snapshot.story_id.as_str()) {
                let metadata = collect_metadata(&self.host.fiber_tree());
                if metadata.contains_text(&snapshot.story_id) {
                    self.bridge.log("story is displayed", None).await;
                    return;
                }
            }
            if started.elapsed() >= self.options.render_timeout {
                warn!(story_id = %snapshot.story_id, "story never reported rendered; capturing anyway");
                self.bridge.log("story render wait timed out", None).await;
                return;
            }
            tokio::time::sleep(self.options.render_poll_interval).await;
        }
    }

    async fn capture_inspector(
        &self,
    ) -> Result<sherlo_types::InspectorData, IterationError> {
        let mut last_error = None;
        for _ in 0..self.options.inspector_attempts.max(1) {
            match self.automation.get_inspector_data().await {
                Ok(inspector) => return Ok(inspector),
                Err(error) => {
                    warn!(%error, "inspector capture failed, retrying");
                    last_error = Some(error);
                    tokio::time::sleep(self.options.render_poll_interval).await;
                }
            }
        }
        Err(IterationError::Inspector(last_error.unwrap_or(
            DeviceError::Unavailable("inspector data"),
        )))
    }

    async fn persist_position(&self, snapshots: &[Snapshot], snapshot: &Snapshot, retry: bool) {
        let Some(index) = index_of_view_id(snapshots, &snapshot.view_id) else {
            return;
        };
        let state = RunnerState {
            snapshot_index: index as u32,
            filtered_view_ids: Some(
                snapshots
                    .iter()
                    .map(|snapshot| snapshot.view_id.clone())
                    .collect(),
            ),
            update_timestamp: sherlo_wire::now_ms(),
            retry: retry.then_some(true),
        };
        if let Err(error) = self.bridge.update_state(&state).await {
            warn!(%error, "failed to persist session position");
        }
    }

    async fn mark_retry(&self, snapshots: &[Snapshot], snapshot: &Snapshot) {
        self.persist_position(snapshots, snapshot, true).await;
    }
}

fn encode_inspector(inspector: &sherlo_types::InspectorData) -> Option<String> {
    match facet_json::to_string(inspector) {
        Ok(json) => Some(json),
        Err(error) => {
            warn!(%error, "failed to encode inspector data");
            None
        }
    }
}

/// Failure of a single traversal iteration. Never crashes the host; the
/// session persists its position and stops so the next launch resumes.
#[derive(Debug)]
enum IterationError {
    Stabilize(DeviceError),
    Inspector(DeviceError),
    Scroll(DeviceError),
    Bridge(BridgeError),
}

impl std::fmt::Display for IterationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stabilize(error) => write!(f, "stabilization failed: {error}"),
            Self::Inspector(error) => write!(f, "inspector capture failed: {error}"),
            Self::Scroll(error) => write!(f, "scroll to checkpoint failed: {error}"),
            Self::Bridge(error) => write!(f, "reporting failed: {error}"),
        }
    }
}

#[cfg(test)]
mod tests;
