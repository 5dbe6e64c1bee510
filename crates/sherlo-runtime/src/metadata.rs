//! In-process component-tree walk.
//!
//! The rendering engine keeps two parallel trees, "current" and its
//! "alternate", and either may hold the live data when we look, so the
//! walk starts from both roots and deduplicates by node identity. The
//! host adapter supplies the tree as an arena of nodes; links are arena
//! indices, which makes the alternate back-pointers representable
//! without reference cycles.

use std::collections::HashSet;

use sherlo_types::{Metadata, NodeProperties};

/// Native image-view class names whose `source` prop can point at the
/// network.
const REMOTE_IMAGE_COMPONENTS: [&str; 6] = [
    "ReactImageView",
    "RCTImageView",
    "FFFastImageView",
    "FastImageView",
    "ViewManagerAdapter_ExpoImage",
    "TurboImageView",
];

/// Whether an image source uri loads over the network. Addresses on the
/// local 192.168.* segment are dev-server traffic, not network images.
pub fn is_network_image_uri(uri: &str) -> bool {
    uri.starts_with("http") && !uri.contains("://192.168.")
}

/// One node of the host's component tree.
#[derive(Debug, Clone, Default)]
pub struct FiberNode {
    /// Tag of the backing native view, when this node owns one.
    pub native_tag: Option<i64>,
    pub component_name: Option<String>,
    pub style: Option<facet_value::Value>,
    pub test_id: Option<String>,
    pub native_id: Option<String>,
    /// Image source uris, for nodes that render images.
    pub image_sources: Vec<String>,
    /// Values of string-typed props other than the ones above.
    pub string_props: Vec<String>,
    /// String (or array-of-string) `children` content.
    pub text_children: Vec<String>,
    pub child: Option<usize>,
    pub sibling: Option<usize>,
    pub alternate: Option<usize>,
}

impl FiberNode {
    fn has_network_image(&self) -> bool {
        self.component_name
            .as_deref()
            .is_some_and(|name| REMOTE_IMAGE_COMPONENTS.contains(&name))
            && self
                .image_sources
                .iter()
                .any(|uri| is_network_image_uri(uri))
    }
}

/// Arena of fiber nodes plus the roots to start walking from.
#[derive(Debug, Clone, Default)]
pub struct FiberTree {
    pub nodes: Vec<FiberNode>,
    pub roots: Vec<usize>,
}

impl FiberTree {
    pub fn node(&self, index: usize) -> Option<&FiberNode> {
        self.nodes.get(index)
    }
}

/// Breadth-first walk over both trees, recovering per-native-view props
/// and every piece of text anywhere in the hierarchy.
///
/// Texts exist purely so a known crash-sentinel phrase can be detected
/// afterwards; they are deduplicated, order is irrelevant.
pub fn collect_metadata(tree: &FiberTree) -> Metadata {
    let mut metadata = Metadata::default();
    let mut visited: HashSet<usize> = HashSet::new();
    let mut queue: Vec<usize> = tree.roots.clone();

    while let Some(index) = queue.pop() {
        if !visited.insert(index) {
            continue;
        }
        let Some(node) = tree.node(index) else {
            continue;
        };

        if let Some(tag) = node.native_tag {
            let has_network_image = node.has_network_image();
            metadata.view_props.insert(
                tag,
                NodeProperties {
                    style: node.style.clone(),
                    test_id: node.test_id.clone(),
                    native_id: node.native_id.clone(),
                    name: node.component_name.clone(),
                    has_network_image: has_network_image.then_some(true),
                },
            );
        }

        for text in node.string_props.iter().chain(node.text_children.iter()) {
            metadata.texts.insert(text.clone());
        }
        if let Some(test_id) = &node.test_id {
            metadata.texts.insert(test_id.clone());
        }

        for link in [node.child, node.sibling, node.alternate] {
            if let Some(next) = link {
                queue.push(next);
            }
        }
    }

    metadata
}
