use std::collections::{BTreeMap, BTreeSet};

use facet::Facet;

/// Props recovered for a native view during the metadata walk, attached
/// to the matching inspector node during reconciliation.
#[derive(Facet, Debug, Clone, Default, PartialEq)]
#[facet(rename_all = "camelCase")]
pub struct NodeProperties {
    pub style: Option<facet_value::Value>,
    pub test_id: Option<String>,
    pub native_id: Option<String>,
    /// Component name from the in-process tree; native class names can be
    /// obfuscated, so this wins when present.
    pub name: Option<String>,
    /// The node is an image view whose source points at the network.
    pub has_network_image: Option<bool>,
}

/// One node of the natively captured view-geometry tree.
#[derive(Facet, Debug, Clone, Default, PartialEq)]
#[facet(rename_all = "camelCase")]
pub struct InspectorNode {
    /// Native view tag; the join key against [`Metadata::view_props`].
    pub id: i64,
    pub class_name: Option<String>,
    pub is_visible: bool,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub children: Option<Vec<InspectorNode>>,
    /// `width` divided by density, rounded; filled during reconciliation.
    pub adjusted_width: Option<i64>,
    pub adjusted_height: Option<i64>,
    pub properties: Option<NodeProperties>,
}

/// The envelope the native layer hands back for one capture: pixel
/// density plus the root of the view hierarchy.
#[derive(Facet, Debug, Clone, PartialEq)]
#[facet(rename_all = "camelCase")]
pub struct InspectorData {
    pub density: f64,
    pub view_hierarchy: Option<InspectorNode>,
}

/// What the in-process tree walk recovers: per-native-tag props and every
/// string rendered anywhere in the tree.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub view_props: BTreeMap<i64, NodeProperties>,
    pub texts: BTreeSet<String>,
}

impl Metadata {
    pub fn contains_text(&self, needle: &str) -> bool {
        self.texts.iter().any(|text| text.contains(needle))
    }
}

/// Safe-area insets in physical pixels, reported only for error-free
/// captures.
#[derive(Facet, Debug, Clone, PartialEq)]
#[facet(rename_all = "camelCase")]
pub struct SafeAreaMetadata {
    pub should_add_safe_area: bool,
    pub inset_top: i64,
    pub inset_bottom: i64,
}

/// Result of scrolling a scrollable snapshot to a checkpoint.
#[derive(Facet, Debug, Clone, PartialEq)]
#[facet(rename_all = "camelCase")]
pub struct ScrollResult {
    pub reached_bottom: bool,
    pub applied_index: u32,
    pub applied_offset_px: f64,
    pub viewport_px: f64,
    pub content_px: f64,
}
