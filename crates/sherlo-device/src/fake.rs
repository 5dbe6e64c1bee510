//! In-memory device used by bridge and runtime tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sherlo_types::{InspectorData, InspectorNode, ScrollResult, StabilizationConfig};

use crate::{DeviceAutomation, DeviceError, DeviceFs, LaunchMode};

/// Scripted behavior for one [`FakeDevice`].
pub struct FakeDeviceState {
    pub files: HashMap<String, String>,
    pub stable: bool,
    pub stabilize_failures_remaining: u32,
    pub inspector: Option<InspectorData>,
    pub inspector_failures_remaining: u32,
    pub scrollable: bool,
    pub viewport_px: f64,
    pub content_px: f64,
    pub launch_mode: LaunchMode,
    pub clear_focus_calls: u32,
    pub stabilize_calls: u32,
    pub scroll_calls: Vec<(u32, f64)>,
}

impl Default for FakeDeviceState {
    fn default() -> Self {
        Self {
            files: HashMap::new(),
            stable: true,
            stabilize_failures_remaining: 0,
            inspector: Some(InspectorData {
                density: 1.0,
                view_hierarchy: Some(InspectorNode::default()),
            }),
            inspector_failures_remaining: 0,
            scrollable: false,
            viewport_px: 800.0,
            content_px: 800.0,
            launch_mode: LaunchMode::Testing,
            clear_focus_calls: 0,
            stabilize_calls: 0,
            scroll_calls: Vec::new(),
        }
    }
}

/// Both capability traits backed by a shared, scriptable state bag.
#[derive(Clone)]
pub struct FakeDevice {
    pub state: Arc<Mutex<FakeDeviceState>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeDeviceState::default())),
        }
    }

    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.state
            .lock()
            .files
            .insert(path.to_string(), contents.to_string());
        self
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state.lock().files.get(path).cloned()
    }
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceFs for FakeDevice {
    async fn read_file(&self, path: &str) -> Result<String, DeviceError> {
        self.state.lock().files.get(path).cloned().ok_or_else(|| {
            DeviceError::io(
                "reading file",
                std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()),
            )
        })
    }

    async fn append_file(&self, path: &str, contents: &str) -> Result<(), DeviceError> {
        self.state
            .lock()
            .files
            .entry(path.to_string())
            .or_default()
            .push_str(contents);
        Ok(())
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), DeviceError> {
        self.state
            .lock()
            .files
            .insert(path.to_string(), contents.to_string());
        Ok(())
    }

    async fn mkdir(&self, _path: &str) -> Result<(), DeviceError> {
        Ok(())
    }
}

#[async_trait]
impl DeviceAutomation for FakeDevice {
    async fn stabilize(&self, _config: &StabilizationConfig) -> Result<bool, DeviceError> {
        let mut state = self.state.lock();
        state.stabilize_calls += 1;
        if state.stabilize_failures_remaining > 0 {
            state.stabilize_failures_remaining -= 1;
            return Err(DeviceError::Unavailable("stabilization"));
        }
        Ok(state.stable)
    }

    async fn get_inspector_data(&self) -> Result<InspectorData, DeviceError> {
        let mut state = self.state.lock();
        if state.inspector_failures_remaining > 0 {
            state.inspector_failures_remaining -= 1;
            return Err(DeviceError::Unavailable("inspector data"));
        }
        state
            .inspector
            .clone()
            .ok_or(DeviceError::Unavailable("inspector data"))
    }

    async fn clear_focus(&self) -> Result<(), DeviceError> {
        self.state.lock().clear_focus_calls += 1;
        Ok(())
    }

    async fn is_scrollable_snapshot(&self) -> Result<bool, DeviceError> {
        Ok(self.state.lock().scrollable)
    }

    async fn scroll_to_checkpoint(
        &self,
        index: u32,
        offset_px: f64,
        max_index: u32,
    ) -> Result<ScrollResult, DeviceError> {
        let mut state = self.state.lock();
        state.scroll_calls.push((index, offset_px));
        let applied_index = index.min(max_index);
        let applied_offset_px = offset_px + f64::from(applied_index) * state.viewport_px;
        Ok(ScrollResult {
            reached_bottom: applied_offset_px + state.viewport_px >= state.content_px,
            applied_index,
            applied_offset_px,
            viewport_px: state.viewport_px,
            content_px: state.content_px,
        })
    }

    fn launch_mode(&self) -> LaunchMode {
        self.state.lock().launch_mode
    }
}
