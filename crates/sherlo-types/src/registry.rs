use facet::Facet;

use crate::snapshot::SherloParameters;

/// Platform a story can be restricted to.
#[derive(Facet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum TargetPlatform {
    Ios,
    Android,
}

impl TargetPlatform {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetPlatform::Ios => "ios",
            TargetPlatform::Android => "android",
        }
    }
}

/// Link to the design source for a story, as attached by the storybook
/// designs addon under `parameters.design`.
#[derive(Facet, Debug, Clone, PartialEq)]
pub struct DesignParameters {
    pub url: String,
}

/// The subset of story parameters the SDK inspects. Unknown parameter
/// keys are dropped at registry-construction time; the runner only ever
/// sees what is modeled here.
#[derive(Facet, Debug, Clone, Default, PartialEq)]
#[facet(rename_all = "camelCase")]
pub struct StoryParameters {
    pub sherlo: Option<SherloParameters>,
    pub design: Option<DesignParameters>,
    /// Disables safe-area inset reporting for this story.
    pub no_safe_area: Option<bool>,
}

/// One prepared story as registered by the story framework.
#[derive(Facet, Debug, Clone, PartialEq)]
#[facet(rename_all = "camelCase")]
pub struct RawStory {
    /// Story id in the framework's `component--story` scheme.
    pub id: String,
    pub component_id: String,
    /// Component title, e.g. `components/Button`.
    pub title: String,
    /// Story name, e.g. `Primary`.
    pub name: String,
    pub parameters: StoryParameters,
    pub arg_types: Option<facet_value::Value>,
    pub initial_args: Option<facet_value::Value>,
}

/// Ordered view over the live story registry.
///
/// Iteration order is the framework's registration order; snapshot
/// preparation reverses it (see `sherlo-runtime`).
#[derive(Facet, Debug, Clone, Default)]
pub struct StoryRegistry {
    pub stories: Vec<RawStory>,
}

impl StoryRegistry {
    pub fn new(stories: Vec<RawStory>) -> Self {
        Self { stories }
    }

    pub fn is_empty(&self) -> bool {
        self.stories.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stories.len()
    }

    pub fn get(&self, story_id: &str) -> Option<&RawStory> {
        self.stories.iter().find(|story| story.id == story_id)
    }
}
