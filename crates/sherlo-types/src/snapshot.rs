use facet::Facet;

use crate::{InvariantError, registry::RawStory, registry::TargetPlatform};

/// Presentation mode for a captured snapshot.
///
/// `DeviceHeight` captures exactly one viewport; `FullHeight` lets the
/// runner page through content taller than the viewport via the scroll
/// sub-protocol.
#[derive(Facet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[facet(rename_all = "camelCase")]
pub enum SnapshotMode {
    DeviceHeight,
    FullHeight,
}

impl SnapshotMode {
    pub const ALL: [SnapshotMode; 2] = [SnapshotMode::DeviceHeight, SnapshotMode::FullHeight];

    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotMode::DeviceHeight => "deviceHeight",
            SnapshotMode::FullHeight => "fullHeight",
        }
    }

    pub fn parse(value: &str) -> Result<Self, InvariantError> {
        match value {
            "deviceHeight" => Ok(SnapshotMode::DeviceHeight),
            "fullHeight" => Ok(SnapshotMode::FullHeight),
            other => Err(InvariantError::UnknownMode(other.to_string())),
        }
    }
}

/// Per-story knobs authors attach under `parameters.sherlo`.
#[derive(Facet, Debug, Clone, Default, PartialEq)]
#[facet(rename_all = "camelCase")]
pub struct SherloParameters {
    /// Hide the keyboard and defocus any focused input before capturing.
    /// Focused inputs carry animated carets that never stabilize.
    pub defocus: Option<bool>,
    /// Skip this story during testing.
    pub exclude: Option<bool>,
    /// Figma frame holding the designs for this component, shown during
    /// review next to the captured screenshot.
    pub figma_url: Option<String>,
    /// Restrict the story to a single platform.
    pub platform: Option<TargetPlatform>,
    /// Restart the app after testing this story, for stories that leave
    /// persistent overlays behind.
    pub restart: Option<bool>,
    /// Requested presentation modes, honored when snapshots are split by
    /// mode.
    pub mode: Option<Vec<String>>,
}

/// Wraps [`SherloParameters`] in the `parameters.sherlo` envelope story
/// authors spread into their story definitions.
pub fn sherlo_parameters(parameters: SherloParameters) -> SherloParametersEnvelope {
    SherloParametersEnvelope { sherlo: parameters }
}

#[derive(Facet, Debug, Clone, PartialEq)]
pub struct SherloParametersEnvelope {
    pub sherlo: SherloParameters,
}

/// One (story, presentation mode) pair scheduled for capture.
///
/// Identity is `view_id`, derived as `{story_id}-{mode}`. The ordered
/// sequence of snapshots is the traversal plan for one session; records
/// are immutable once constructed and only ever indexed by position or
/// looked up by id.
#[derive(Facet, Debug, Clone, PartialEq)]
#[facet(rename_all = "camelCase")]
pub struct Snapshot {
    pub view_id: String,
    pub mode: SnapshotMode,
    pub display_name: String,
    pub sherlo_parameters: SherloParameters,

    pub component_id: String,
    pub component_title: String,
    pub story_id: String,
    pub story_title: String,

    pub parameters: crate::registry::StoryParameters,
    pub arg_types: Option<facet_value::Value>,
    pub args: Option<facet_value::Value>,
}

impl Snapshot {
    /// Builds the snapshot for one story under one presentation mode.
    ///
    /// The figma-derived url is merged in first so an explicit
    /// `sherlo.figmaUrl` always crowds out the inferred one.
    pub fn from_story(story: &RawStory, mode: SnapshotMode) -> Self {
        let mut sherlo_parameters = story
            .parameters
            .sherlo
            .clone()
            .unwrap_or_default();

        if sherlo_parameters.figma_url.is_none()
            && let Some(design) = &story.parameters.design
        {
            sherlo_parameters.figma_url = Some(design.url.clone());
        }

        Snapshot {
            view_id: format!("{}-{}", story.id, mode.as_str()),
            mode,
            display_name: format!("{} - {}", story.title, story.name),
            sherlo_parameters,
            component_id: story.component_id.clone(),
            component_title: story.title.clone(),
            story_id: story.id.clone(),
            story_title: story.name.clone(),
            parameters: story.parameters.clone(),
            arg_types: story.arg_types.clone(),
            args: story.initial_args.clone(),
        }
    }
}
