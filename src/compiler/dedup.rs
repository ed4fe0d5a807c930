//! Structural deduplication
//!
//! Nodes with equal operations and equal (already deduplicated) children
//! collapse into one, turning repeated sub-expressions into shared ones.

use rustc_hash::FxHashMap;

use crate::compiler::ast::{AstGraph, AstOp, OpId};

impl AstGraph {
    /// Collapse structurally identical nodes reachable from `root`
    ///
    /// Returns the root of the deduplicated graph. Nodes whose children did
    /// not change are reused, so a graph without duplicates keeps its root.
    pub fn deduplicate(&mut self, root: OpId) -> OpId {
        let order = self.post_order(root);
        let mut canonical: FxHashMap<AstOp, OpId> = FxHashMap::default();
        let mut remap: FxHashMap<OpId, OpId> = FxHashMap::default();
        let before = order.len();

        for id in order {
            let mut changed = false;
            let op = self.op(id).clone_with(|child| {
                let mapped = remap.get(&child).copied().unwrap_or(child);
                changed |= mapped != child;
                mapped
            });

            let target = match canonical.get(&op) {
                Some(existing) => *existing,
                None => {
                    let target = if changed { self.add(op.clone()) } else { id };
                    canonical.insert(op, target);
                    target
                }
            };
            remap.insert(id, target);
        }

        let new_root = remap.get(&root).copied().unwrap_or(root);
        log::debug!(
            "Deduplication kept {} of {} nodes",
            self.reachable_count(new_root),
            before
        );
        new_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::Scalar;
    use crate::compiler::constant::ConstantResource;
    use crate::layout::{Layout, LayoutBlock};
    use crate::runtime::DataType;
    use glam::IVec2;

    fn layout_constant(graph: &mut AstGraph, id: u64) -> OpId {
        let mut layout = Layout::new(IVec2::new(2, 2));
        layout.add_block(LayoutBlock::new(IVec2::ZERO, IVec2::ONE, id));
        let constant = ConstantResource::new(layout, None).expect("Constant should succeed");
        graph.add(AstOp::ConstantResource(constant))
    }

    #[test]
    fn test_identical_subgraphs_collapse() {
        let mut graph = AstGraph::new();
        let a = layout_constant(&mut graph, 1);
        let b = layout_constant(&mut graph, 1);
        let pack_a = graph.add(AstOp::LayoutPack { source: Some(a) });
        let pack_b = graph.add(AstOp::LayoutPack { source: Some(b) });
        let root = graph.add(AstOp::LayoutMerge {
            base: Some(pack_a),
            added: Some(pack_b),
        });
        assert!(graph.is_equal(a, b));
        assert!(!graph.is_equal(pack_a, pack_b));

        let root = graph.deduplicate(root);
        let children = graph.children(root);
        assert_eq!(children[0], children[1]);
        assert_eq!(graph.reachable_count(root), 3);
    }

    #[test]
    fn test_differing_parameter_keeps_both() {
        let mut graph = AstGraph::new();
        let condition = graph.add(AstOp::ConstantBool(true));
        let a = graph.add(AstOp::ConstantScalar(Scalar::new(1.0)));
        let b = graph.add(AstOp::ConstantScalar(Scalar::new(2.0)));
        let root = graph.add(AstOp::Conditional {
            kind: DataType::Scalar,
            condition: Some(condition),
            yes: Some(a),
            no: Some(b),
        });
        let len = graph.len();
        assert_eq!(graph.deduplicate(root), root);
        assert_eq!(graph.len(), len);
    }

    #[test]
    fn test_original_nodes_are_not_modified() {
        let mut graph = AstGraph::new();
        let a = layout_constant(&mut graph, 7);
        let b = layout_constant(&mut graph, 7);
        let root = graph.add(AstOp::LayoutMerge {
            base: Some(a),
            added: Some(b),
        });
        let new_root = graph.deduplicate(root);
        assert_ne!(new_root, root);
        assert_eq!(graph.children(root), vec![a, b]);
        assert_eq!(graph.children(new_root), vec![a, a]);
    }

    #[test]
    fn test_constants_from_different_sources_stay_apart() {
        fn sourced(graph: &mut AstGraph, source: &str) -> OpId {
            let constant = ConstantResource::new(Layout::new(IVec2::new(4, 4)), None)
                .expect("Constant should succeed")
                .with_source_descriptor(source);
            graph.add(AstOp::ConstantResource(constant))
        }

        let mut graph = AstGraph::new();
        let a = sourced(&mut graph, "A");
        let b = sourced(&mut graph, "B");
        let a_again = sourced(&mut graph, "A");
        let ab = graph.add(AstOp::LayoutMerge {
            base: Some(a),
            added: Some(b),
        });
        let root = graph.add(AstOp::LayoutMerge {
            base: Some(ab),
            added: Some(a_again),
        });

        let new_root = graph.deduplicate(root);
        let children = graph.children(new_root);
        assert_eq!(children[1], a);
        assert_eq!(graph.children(children[0]), vec![a, b]);
        assert_eq!(graph.reachable_count(new_root), 4);
    }
}
