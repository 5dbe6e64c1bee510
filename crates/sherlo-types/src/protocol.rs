use facet::Facet;

use crate::snapshot::Snapshot;

pub const ACTION_JS_LOADED: &str = "JS_LOADED";
pub const ACTION_START: &str = "START";
pub const ACTION_REQUEST_SNAPSHOT: &str = "REQUEST_SNAPSHOT";
pub const ACTION_END: &str = "END";

pub const ACTION_ACK_START: &str = "ACK_START";
pub const ACTION_ACK_REQUEST_SNAPSHOT: &str = "ACK_REQUEST_SNAPSHOT";
pub const ACTION_ACK_SCROLL_REQUEST: &str = "ACK_SCROLL_REQUEST";
pub const ACTION_ACK_END: &str = "ACK_END";

/// Which side of the mailbox wrote a line.
#[derive(Facet, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum Entity {
    App,
    Runner,
}

/// Minimal view of a mailbox line, read before dispatching on `action`.
#[derive(Facet, Debug, Clone)]
pub struct ActionPeek {
    pub action: String,
    pub entity: Option<Entity>,
}

/// Announces that the JS bundle finished loading.
#[derive(Facet, Debug, Clone)]
#[facet(rename_all = "camelCase")]
pub struct JsLoadedMessage {
    pub action: String,
    pub timestamp: i64,
    pub entity: Entity,
}

impl JsLoadedMessage {
    pub fn new() -> Self {
        Self {
            action: ACTION_JS_LOADED.to_string(),
            timestamp: 0,
            entity: Entity::App,
        }
    }
}

impl Default for JsLoadedMessage {
    fn default() -> Self {
        Self::new()
    }
}

/// Closes the session explicitly. Modern runners also treat an ack
/// without `nextSnapshot` as the end; both signals are sent so either
/// lineage of runner stops cleanly.
#[derive(Facet, Debug, Clone)]
#[facet(rename_all = "camelCase")]
pub struct EndMessage {
    pub action: String,
    pub timestamp: i64,
    pub entity: Entity,
}

impl EndMessage {
    pub fn new() -> Self {
        Self {
            action: ACTION_END.to_string(),
            timestamp: 0,
            entity: Entity::App,
        }
    }
}

impl Default for EndMessage {
    fn default() -> Self {
        Self::new()
    }
}

/// Opens a testing session and hands the runner the full traversal plan.
#[derive(Facet, Debug, Clone)]
#[facet(rename_all = "camelCase")]
pub struct StartMessage {
    pub action: String,
    pub timestamp: i64,
    pub entity: Entity,
    pub snapshots: Vec<Snapshot>,
}

impl StartMessage {
    pub fn new(snapshots: Vec<Snapshot>) -> Self {
        Self {
            action: ACTION_START.to_string(),
            timestamp: 0,
            entity: Entity::App,
            snapshots,
        }
    }
}

/// Reports the snapshot just rendered and asks for the next one.
///
/// `request_id` correlates the eventual acknowledgement; the runner echoes
/// it back. Stabilization and inspector results ride along so failures are
/// visible to the runner, not just the console.
#[derive(Facet, Debug, Clone)]
#[facet(rename_all = "camelCase")]
pub struct RequestSnapshotMessage {
    pub action: String,
    pub timestamp: i64,
    pub entity: Entity,
    pub request_id: String,
    pub has_error: bool,
    pub is_stable: bool,
    pub is_scrollable_snapshot: bool,
    /// Reconciled inspector tree, pre-serialized to JSON.
    pub inspector_data: Option<String>,
    pub has_network_image: Option<bool>,
    pub safe_area_metadata: Option<crate::inspector::SafeAreaMetadata>,
    /// Present while paging through a scrollable snapshot.
    pub scroll_index: Option<u32>,
}

impl RequestSnapshotMessage {
    pub fn new(request_id: String) -> Self {
        Self {
            action: ACTION_REQUEST_SNAPSHOT.to_string(),
            timestamp: 0,
            entity: Entity::App,
            request_id,
            has_error: false,
            is_stable: false,
            is_scrollable_snapshot: false,
            inspector_data: None,
            has_network_image: None,
            safe_area_metadata: None,
            scroll_index: None,
        }
    }
}

/// Acknowledges `START`; carries the first snapshot to render and the
/// runner-side filter verdict.
#[derive(Facet, Debug, Clone)]
#[facet(rename_all = "camelCase")]
pub struct AckStart {
    pub action: String,
    pub timestamp: Option<i64>,
    pub entity: Option<Entity>,
    pub request_id: String,
    pub next_snapshot: Option<Snapshot>,
    pub filtered_view_ids: Option<Vec<String>>,
}

/// Acknowledges `REQUEST_SNAPSHOT`; an absent `next_snapshot` ends the
/// session.
#[derive(Facet, Debug, Clone)]
#[facet(rename_all = "camelCase")]
pub struct AckRequestSnapshot {
    pub action: String,
    pub timestamp: Option<i64>,
    pub entity: Option<Entity>,
    pub request_id: String,
    pub next_snapshot: Option<Snapshot>,
}

/// Asks the app to page a scrollable snapshot to the given checkpoint
/// before capturing the next part.
#[derive(Facet, Debug, Clone)]
#[facet(rename_all = "camelCase")]
pub struct AckScrollRequest {
    pub action: String,
    pub timestamp: Option<i64>,
    pub entity: Option<Entity>,
    pub request_id: String,
    pub scroll_index: u32,
    pub offset_px: f64,
}

/// Every runner-side line the app understands.
#[derive(Debug, Clone)]
pub enum RunnerAck {
    Start(AckStart),
    RequestSnapshot(AckRequestSnapshot),
    ScrollRequest(AckScrollRequest),
    /// Legacy end-of-session marker; modern mailboxes signal the end by
    /// omitting `nextSnapshot` instead.
    End,
}

impl RunnerAck {
    pub fn action(&self) -> &'static str {
        match self {
            RunnerAck::Start(_) => ACTION_ACK_START,
            RunnerAck::RequestSnapshot(_) => ACTION_ACK_REQUEST_SNAPSHOT,
            RunnerAck::ScrollRequest(_) => ACTION_ACK_SCROLL_REQUEST,
            RunnerAck::End => ACTION_ACK_END,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            RunnerAck::Start(ack) => Some(&ack.request_id),
            RunnerAck::RequestSnapshot(ack) => Some(&ack.request_id),
            RunnerAck::ScrollRequest(ack) => Some(&ack.request_id),
            RunnerAck::End => None,
        }
    }
}

/// Recovery record persisted to `state.sherlo`.
///
/// Kept index-based so it agrees with the legacy recovery path: the index
/// of the snapshot to render next, when it was written, and whether the
/// session is resuming after a failure.
#[derive(Facet, Debug, Clone, PartialEq)]
#[facet(rename_all = "camelCase")]
pub struct RunnerState {
    pub snapshot_index: u32,
    pub filtered_view_ids: Option<Vec<String>>,
    pub update_timestamp: i64,
    pub retry: Option<bool>,
}

/// One diagnostic line in `log.sherlo`.
#[derive(Facet, Debug, Clone)]
pub struct LogRecord {
    pub key: String,
    pub timestamp: i64,
    /// Human-readable counterpart of `timestamp`.
    pub time: String,
    pub parameters: Option<facet_value::Value>,
}
