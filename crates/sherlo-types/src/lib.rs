//! Core data model for the sherlo testing SDK.
//!
//! Everything that crosses a process boundary lives here: the [`Snapshot`]
//! records that make up a testing session's traversal plan, the protocol
//! items exchanged with the runner through the file mailbox, the recovery
//! state record, the device configuration envelope, and the inspector /
//! metadata trees produced while a story is on screen.
//!
//! Types in this crate are plain data. Behavior (preparing snapshots,
//! driving the traversal, framing mailbox lines) lives in the downstream
//! crates.

mod config;
mod inspector;
mod protocol;
mod registry;
mod snapshot;

pub use config::{DeviceConfig, StabilizationConfig};
pub use inspector::{
    InspectorData, InspectorNode, Metadata, NodeProperties, SafeAreaMetadata, ScrollResult,
};
pub use protocol::{
    ACTION_ACK_END, ACTION_ACK_REQUEST_SNAPSHOT, ACTION_ACK_SCROLL_REQUEST, ACTION_ACK_START,
    ACTION_END, ACTION_JS_LOADED, ACTION_REQUEST_SNAPSHOT, ACTION_START, AckRequestSnapshot,
    AckScrollRequest, AckStart, ActionPeek, EndMessage, Entity, JsLoadedMessage, LogRecord,
    RequestSnapshotMessage, RunnerAck, RunnerState, StartMessage,
};
pub use registry::{DesignParameters, RawStory, StoryParameters, StoryRegistry, TargetPlatform};
pub use snapshot::{
    SherloParameters, SherloParametersEnvelope, Snapshot, SnapshotMode, sherlo_parameters,
};

use std::error::Error;
use std::fmt;

/// Structural invariant violations raised while constructing model types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantError {
    EmptyField(&'static str),
    UnknownMode(String),
    UnknownAction(String),
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyField(field) => write!(f, "{field} must be non-empty"),
            Self::UnknownMode(mode) => write!(f, "unknown snapshot mode: {mode}"),
            Self::UnknownAction(action) => write!(f, "unknown protocol action: {action}"),
        }
    }
}

impl Error for InvariantError {}
