//! Story traversal engine.
//!
//! Builds the traversal plan from the live story registry, then drives
//! the "test all stories" loop against the runner: render a story, wait
//! for it to really be on screen, stabilize, collect and reconcile
//! metadata, report, advance. See [`engine::TestSession`] for the loop
//! itself and [`prepare::prepare_snapshots`] for the plan.

pub mod effects;
pub mod engine;
pub mod metadata;
mod mode;
pub mod prepare;
pub mod reconcile;

pub use effects::EffectRegistry;
pub use engine::{
    STORY_CRASH_SENTINEL, SafeAreaInsets, SessionOptions, SessionSummary, StoryHost, TestSession,
};
pub use metadata::{FiberNode, FiberTree, collect_metadata, is_network_image_uri};
pub use mode::{SherloMode, determine_mode};
pub use prepare::{PrepareOptions, SnapshotFilter, index_of_view_id, prepare_snapshots};
pub use reconcile::{PreparedInspectorData, prepare_inspector_data};

use std::error::Error;
use std::fmt;

use sherlo_bridge::BridgeError;

/// Where the traversal currently is. Purely observational; transitions
/// are driven by [`engine::TestSession::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingStart,
    Rendering,
    Stabilizing,
    CollectingMetadata,
    Reporting,
    Done,
}

#[derive(Debug)]
pub enum RuntimeError {
    /// Session setup failed: untrusted config or a dead transport.
    Bridge(BridgeError),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bridge(error) => write!(f, "session setup failed: {error}"),
        }
    }
}

impl Error for RuntimeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Bridge(error) => Some(error),
        }
    }
}

impl From<BridgeError> for RuntimeError {
    fn from(error: BridgeError) -> Self {
        Self::Bridge(error)
    }
}
