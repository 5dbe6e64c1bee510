//! Reconciliation of the natively captured geometry tree with the
//! in-process metadata walk.
//!
//! The two trees describe the same views from different sides and join
//! on the native view tag. Reconciliation attaches the walked props as
//! `properties`, converts raw pixel geometry to density-independent
//! units, and cuts away the harness chrome around the story's own render
//! output.

use sherlo_types::{InspectorData, InspectorNode, Metadata};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone)]
pub struct PreparedInspectorData {
    pub inspector_data: InspectorData,
    /// Any node in the reconciled tree renders an image from the network.
    pub has_network_image: bool,
}

/// Merges `metadata` into `inspector` and re-roots the hierarchy at the
/// story's own boundary.
///
/// Every node gets `adjusted_width/height = round(px / density)` and, when
/// the metadata walk saw its native tag, the walked props as `properties`
/// (the walked component name also wins over the native class name, which
/// can be obfuscated). A node whose merged `testID` equals `story_id` and
/// that has at least one child marks the harness boundary: the returned
/// hierarchy starts at that node's first child. With no children the
/// hierarchy is left as captured.
pub fn prepare_inspector_data(
    inspector: &InspectorData,
    metadata: &Metadata,
    story_id: &str,
) -> PreparedInspectorData {
    let density = if inspector.density > 0.0 {
        inspector.density
    } else {
        1.0
    };

    let mut prepared = inspector.clone();
    let mut has_network_image = false;

    if let Some(root) = prepared.view_hierarchy.take() {
        let mut root = enhance_node(root, metadata, density, &mut has_network_image);
        if let Some(story_child) = take_story_root(&mut root, story_id) {
            prepared.view_hierarchy = Some(story_child);
        } else {
            prepared.view_hierarchy = Some(root);
        }
    }

    PreparedInspectorData {
        inspector_data: prepared,
        has_network_image,
    }
}

fn enhance_node(
    mut node: InspectorNode,
    metadata: &Metadata,
    density: f64,
    has_network_image: &mut bool,
) -> InspectorNode {
    node.adjusted_width = Some((node.width / density).round() as i64);
    node.adjusted_height = Some((node.height / density).round() as i64);

    if let Some(props) = metadata.view_props.get(&node.id) {
        if let Some(name) = &props.name {
            node.class_name = Some(name.clone());
        }
        if props.has_network_image == Some(true) {
            *has_network_image = true;
        }
        node.properties = Some(props.clone());
    }

    if let Some(children) = node.children.take() {
        node.children = Some(
            children
                .into_iter()
                .map(|child| enhance_node(child, metadata, density, has_network_image))
                .collect(),
        );
    }

    node
}

/// Finds the outermost node whose merged `testID` equals the story id and
/// detaches its first child, the root of what the story actually
/// rendered. Pre-order, first match wins.
fn take_story_root(node: &mut InspectorNode, story_id: &str) -> Option<InspectorNode> {
    let is_boundary = node
        .properties
        .as_ref()
        .and_then(|props| props.test_id.as_deref())
        == Some(story_id);

    if is_boundary
        && let Some(children) = &mut node.children
        && !children.is_empty()
    {
        return Some(children.remove(0));
    }

    if let Some(children) = &mut node.children {
        for child in children.iter_mut() {
            if let Some(found) = take_story_root(child, story_id) {
                return Some(found);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use sherlo_types::NodeProperties;
    use std::collections::BTreeMap;

    fn node(id: i64, width: f64, height: f64, children: Vec<InspectorNode>) -> InspectorNode {
        InspectorNode {
            id,
            class_name: Some("View".to_string()),
            is_visible: true,
            width,
            height,
            children: if children.is_empty() {
                None
            } else {
                Some(children)
            },
            ..InspectorNode::default()
        }
    }

    fn metadata_with(entries: Vec<(i64, NodeProperties)>) -> Metadata {
        Metadata {
            view_props: entries.into_iter().collect::<BTreeMap<_, _>>(),
            texts: Default::default(),
        }
    }

    fn props_with_test_id(test_id: &str) -> NodeProperties {
        NodeProperties {
            test_id: Some(test_id.to_string()),
            ..NodeProperties::default()
        }
    }

    #[test]
    fn adjusted_dimensions_divide_by_density() {
        let inspector = InspectorData {
            density: 3.0,
            view_hierarchy: Some(node(1, 900.0, 1800.0, vec![])),
        };
        let prepared =
            prepare_inspector_data(&inspector, &Metadata::default(), "story").inspector_data;

        let root = prepared.view_hierarchy.expect("hierarchy");
        assert_eq!(root.adjusted_width, Some(300));
        assert_eq!(root.adjusted_height, Some(600));
    }

    #[test]
    fn density_one_passes_dimensions_through() {
        let inspector = InspectorData {
            density: 1.0,
            view_hierarchy: Some(node(1, 300.0, 600.0, vec![])),
        };
        let prepared =
            prepare_inspector_data(&inspector, &Metadata::default(), "story").inspector_data;

        let root = prepared.view_hierarchy.expect("hierarchy");
        assert_eq!(root.adjusted_width, Some(300));
        assert_eq!(root.adjusted_height, Some(600));
    }

    #[test]
    fn walked_props_attach_by_native_tag() {
        let inspector = InspectorData {
            density: 1.0,
            view_hierarchy: Some(node(42, 10.0, 10.0, vec![])),
        };
        let metadata = metadata_with(vec![(
            42,
            NodeProperties {
                test_id: Some("my-button".to_string()),
                name: Some("TouchableOpacity".to_string()),
                ..NodeProperties::default()
            },
        )]);

        let prepared = prepare_inspector_data(&inspector, &metadata, "story").inspector_data;
        let root = prepared.view_hierarchy.expect("hierarchy");
        assert_eq!(root.class_name.as_deref(), Some("TouchableOpacity"));
        assert_eq!(
            root.properties.and_then(|p| p.test_id).as_deref(),
            Some("my-button")
        );
    }

    #[test]
    fn boundary_node_reroots_to_its_first_child() {
        let story_content = node(3, 100.0, 100.0, vec![]);
        let boundary = node(2, 200.0, 200.0, vec![story_content, node(4, 1.0, 1.0, vec![])]);
        let wrapper = node(1, 300.0, 300.0, vec![boundary]);
        let inspector = InspectorData {
            density: 1.0,
            view_hierarchy: Some(wrapper),
        };
        let metadata = metadata_with(vec![(2, props_with_test_id("btn--primary"))]);

        let prepared = prepare_inspector_data(&inspector, &metadata, "btn--primary").inspector_data;
        assert_eq!(prepared.view_hierarchy.expect("hierarchy").id, 3);
    }

    #[test]
    fn boundary_without_children_leaves_root_unchanged() {
        let boundary = node(2, 200.0, 200.0, vec![]);
        let wrapper = node(1, 300.0, 300.0, vec![boundary]);
        let inspector = InspectorData {
            density: 1.0,
            view_hierarchy: Some(wrapper),
        };
        let metadata = metadata_with(vec![(2, props_with_test_id("btn--primary"))]);

        let prepared = prepare_inspector_data(&inspector, &metadata, "btn--primary").inspector_data;
        assert_eq!(prepared.view_hierarchy.expect("hierarchy").id, 1);
    }

    #[test]
    fn unrelated_test_ids_do_not_reroot() {
        let child = node(2, 1.0, 1.0, vec![]);
        let root = node(1, 2.0, 2.0, vec![child]);
        let inspector = InspectorData {
            density: 1.0,
            view_hierarchy: Some(root),
        };
        let metadata = metadata_with(vec![(2, props_with_test_id("other-story"))]);

        let prepared = prepare_inspector_data(&inspector, &metadata, "btn--primary").inspector_data;
        assert_eq!(prepared.view_hierarchy.expect("hierarchy").id, 1);
    }

    #[test]
    fn network_image_flag_propagates_from_any_depth() {
        let deep = node(4, 1.0, 1.0, vec![]);
        let mid = node(3, 1.0, 1.0, vec![deep]);
        let root = node(1, 1.0, 1.0, vec![mid]);
        let inspector = InspectorData {
            density: 1.0,
            view_hierarchy: Some(root),
        };
        let metadata = metadata_with(vec![(
            4,
            NodeProperties {
                has_network_image: Some(true),
                ..NodeProperties::default()
            },
        )]);

        let prepared = prepare_inspector_data(&inspector, &metadata, "story");
        assert!(prepared.has_network_image);
    }

    #[test]
    fn original_tree_is_not_mutated() {
        let inspector = InspectorData {
            density: 2.0,
            view_hierarchy: Some(node(1, 100.0, 100.0, vec![])),
        };
        let _ = prepare_inspector_data(&inspector, &Metadata::default(), "story");
        let root = inspector.view_hierarchy.expect("hierarchy");
        assert_eq!(root.adjusted_width, None);
    }

    // Deterministic pseudo-random trees; no external randomness in tests.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            self.0 >> 33
        }

        fn below(&mut self, bound: u64) -> u64 {
            self.next() % bound
        }
    }

    fn random_tree(lcg: &mut Lcg, next_id: &mut i64, depth: u32) -> InspectorNode {
        let id = *next_id;
        *next_id += 1;
        let child_count = if depth == 0 { 0 } else { lcg.below(3) };
        let children = (0..child_count)
            .map(|_| random_tree(lcg, next_id, depth - 1))
            .collect();
        node(id, 10.0, 10.0, children)
    }

    fn find_node(root: &InspectorNode, id: i64) -> Option<&InspectorNode> {
        if root.id == id {
            return Some(root);
        }
        root.children
            .as_deref()
            .into_iter()
            .flatten()
            .find_map(|child| find_node(child, id))
    }

    #[test]
    fn rerooting_holds_for_arbitrary_tree_shapes() {
        let mut lcg = Lcg(0x5EED);
        for _ in 0..200 {
            let mut next_id = 1;
            let root = random_tree(&mut lcg, &mut next_id, 4);
            let boundary_id = 1 + lcg.below((next_id - 1) as u64) as i64;

            let inspector = InspectorData {
                density: 1.0,
                view_hierarchy: Some(root.clone()),
            };
            let metadata = metadata_with(vec![(boundary_id, props_with_test_id("story"))]);

            let prepared =
                prepare_inspector_data(&inspector, &metadata, "story").inspector_data;
            let new_root = prepared.view_hierarchy.expect("hierarchy");

            let boundary = find_node(&root, boundary_id).expect("boundary exists");
            match boundary.children.as_deref().and_then(|c| c.first()) {
                Some(first_child) => assert_eq!(new_root.id, first_child.id),
                None => assert_eq!(new_root.id, root.id),
            }
        }
    }
}
