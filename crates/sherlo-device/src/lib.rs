//! Native capability surface.
//!
//! The SDK never touches the device directly; everything platform-bound
//! goes through the two traits here. [`DeviceFs`] is the app-private
//! sandbox the mailbox files live in; [`DeviceAutomation`] covers the
//! capture-adjacent capabilities (frame stabilization, inspector-data
//! retrieval, focus clearing, scrolling).
//!
//! [`fake::FakeDevice`] implements both in memory and is what the bridge
//! and runtime test against.

pub mod fake;
mod fs;

pub use fs::SandboxFs;

use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use sherlo_types::{InspectorData, ScrollResult, StabilizationConfig};

#[derive(Debug)]
pub enum DeviceError {
    Io {
        context: &'static str,
        source: std::io::Error,
    },
    /// The capability exists but could not produce a result, e.g. the
    /// inspector returned nothing for this frame.
    Unavailable(&'static str),
}

impl DeviceError {
    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { context, source } => write!(f, "device io failed while {context}: {source}"),
            Self::Unavailable(capability) => write!(f, "device capability unavailable: {capability}"),
        }
    }
}

impl Error for DeviceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Unavailable(_) => None,
        }
    }
}

/// How the app was launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Launched by the runner for a testing session.
    Testing,
    /// Regular launch; the SDK stays out of the way.
    Default,
}

/// File access inside the app-private sandbox directory. All paths are
/// relative to the sandbox root.
#[async_trait]
pub trait DeviceFs: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<String, DeviceError>;
    async fn append_file(&self, path: &str, contents: &str) -> Result<(), DeviceError>;
    async fn write_file(&self, path: &str, contents: &str) -> Result<(), DeviceError>;
    async fn mkdir(&self, path: &str) -> Result<(), DeviceError>;
}

/// Capture-adjacent device capabilities.
#[async_trait]
pub trait DeviceAutomation: Send + Sync {
    /// Polls rendered frames until a run of identical ones is observed.
    /// Returns whether stability was reached before the timeout.
    async fn stabilize(&self, config: &StabilizationConfig) -> Result<bool, DeviceError>;

    /// Captures the native view-geometry tree for the current frame.
    async fn get_inspector_data(&self) -> Result<InspectorData, DeviceError>;

    /// Dismisses the keyboard and defocuses any focused input.
    async fn clear_focus(&self) -> Result<(), DeviceError>;

    /// Whether the current snapshot's content exceeds the viewport.
    async fn is_scrollable_snapshot(&self) -> Result<bool, DeviceError>;

    /// Scrolls a scrollable snapshot to the given checkpoint.
    async fn scroll_to_checkpoint(
        &self,
        index: u32,
        offset_px: f64,
        max_index: u32,
    ) -> Result<ScrollResult, DeviceError>;

    fn launch_mode(&self) -> LaunchMode;
}
