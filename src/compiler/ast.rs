//! Operation graph
//!
//! Nodes live in an append-only arena and refer to their children by
//! `OpId`. Rewrite passes never edit a node in place: they add new nodes and
//! return the id of the new root, so ids held elsewhere stay valid.

use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashSet, FxHasher};

use crate::compiler::constant::ConstantResource;
use crate::image::ImageFormat;
use crate::ops::MeshFormatFlags;
use crate::runtime::{DataType, OpAddress};

/// Handle to a node of an `AstGraph`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(u32);

impl OpId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// `f32` stored by bit pattern so nodes can be hashed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Scalar(u32);

impl Scalar {
    pub fn new(value: f32) -> Self {
        Self(value.to_bits())
    }

    pub fn get(self) -> f32 {
        f32::from_bits(self.0)
    }
}

impl From<f32> for Scalar {
    fn from(value: f32) -> Self {
        Self::new(value)
    }
}

/// One operation of the graph
///
/// Child slots are `Option<OpId>`; an empty slot links to the null
/// operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AstOp {
    ConstantResource(ConstantResource),
    ConstantBool(bool),
    ConstantInt(i32),
    ConstantScalar(Scalar),
    ParameterBool {
        name: String,
        default: bool,
    },
    ParameterInt {
        name: String,
        default: i32,
    },
    ParameterScalar {
        name: String,
        default: Scalar,
    },

    MeshFormat {
        source: Option<OpId>,
        format: Option<OpId>,
        flags: MeshFormatFlags,
    },
    MeshMerge {
        base: Option<OpId>,
        added: Option<OpId>,
        new_surface_id: u32,
    },
    MeshMorph {
        base: Option<OpId>,
        target: Option<OpId>,
        factor: Option<OpId>,
    },
    MeshInterpolate {
        base: Option<OpId>,
        targets: Vec<Option<OpId>>,
        factor: Option<OpId>,
    },
    MeshApplyPose {
        base: Option<OpId>,
        pose: Option<OpId>,
    },
    MeshClipMorphPlane {
        source: Option<OpId>,
        origin: [Scalar; 3],
        normal: [Scalar; 3],
        distance: Scalar,
        factor: Scalar,
    },
    MeshTransformWithMesh {
        source: Option<OpId>,
        bounding_mesh: Option<OpId>,
        matrix: [Scalar; 16],
    },
    MeshAddTags {
        source: Option<OpId>,
        tags: Vec<String>,
    },
    MeshRemoveMask {
        source: Option<OpId>,
        masks: Vec<Option<OpId>>,
    },
    MeshApplyLayout {
        mesh: Option<OpId>,
        layout: Option<OpId>,
        channel: u16,
    },
    /// Replace the skeleton of `source` with the one of `skeleton`
    MeshSetSkeleton {
        source: Option<OpId>,
        skeleton: Option<OpId>,
    },
    MeshDifference {
        base: Option<OpId>,
        target: Option<OpId>,
        ignore_texcoords: bool,
    },

    Conditional {
        kind: DataType,
        condition: Option<OpId>,
        yes: Option<OpId>,
        no: Option<OpId>,
    },
    Switch {
        kind: DataType,
        variable: Option<OpId>,
        default: Option<OpId>,
        cases: Vec<(i32, Option<OpId>)>,
    },

    LayoutMerge {
        base: Option<OpId>,
        added: Option<OpId>,
    },
    LayoutFromMesh {
        mesh: Option<OpId>,
        layout_index: u8,
    },
    LayoutRemoveBlocks {
        source: Option<OpId>,
        reference: Option<OpId>,
    },
    LayoutPack {
        source: Option<OpId>,
    },

    ImageBlankLayout {
        layout: Option<OpId>,
        block_size: [u16; 2],
        format: ImageFormat,
        mipmaps: u8,
    },
    ImageCompose {
        layout: Option<OpId>,
        base: Option<OpId>,
        block_image: Option<OpId>,
        mask: Option<OpId>,
        block_id: u64,
    },
}

// Calls `$visit` on every child slot in declaration order. The same body
// serves shared and mutable access through match ergonomics.
macro_rules! visit_child_slots {
    ($op:expr, $visit:expr) => {{
        let mut visit = $visit;
        match $op {
            AstOp::ConstantResource(_)
            | AstOp::ConstantBool(_)
            | AstOp::ConstantInt(_)
            | AstOp::ConstantScalar(_)
            | AstOp::ParameterBool { .. }
            | AstOp::ParameterInt { .. }
            | AstOp::ParameterScalar { .. } => {}
            AstOp::MeshFormat { source, format, .. } => {
                visit(source);
                visit(format);
            }
            AstOp::MeshMerge { base, added, .. } => {
                visit(base);
                visit(added);
            }
            AstOp::MeshMorph { base, target, factor } => {
                visit(base);
                visit(target);
                visit(factor);
            }
            AstOp::MeshInterpolate { base, targets, factor } => {
                visit(base);
                for target in targets {
                    visit(target);
                }
                visit(factor);
            }
            AstOp::MeshApplyPose { base, pose } => {
                visit(base);
                visit(pose);
            }
            AstOp::MeshClipMorphPlane { source, .. } | AstOp::MeshAddTags { source, .. } => visit(source),
            AstOp::MeshTransformWithMesh { source, bounding_mesh, .. } => {
                visit(source);
                visit(bounding_mesh);
            }
            AstOp::MeshRemoveMask { source, masks } => {
                visit(source);
                for mask in masks {
                    visit(mask);
                }
            }
            AstOp::MeshApplyLayout { mesh, layout, .. } => {
                visit(mesh);
                visit(layout);
            }
            AstOp::MeshSetSkeleton { source, skeleton } => {
                visit(source);
                visit(skeleton);
            }
            AstOp::MeshDifference { base, target, .. } => {
                visit(base);
                visit(target);
            }
            AstOp::Conditional { condition, yes, no, .. } => {
                visit(condition);
                visit(yes);
                visit(no);
            }
            AstOp::Switch { variable, default, cases, .. } => {
                visit(variable);
                visit(default);
                for (_, branch) in cases {
                    visit(branch);
                }
            }
            AstOp::LayoutMerge { base, added } => {
                visit(base);
                visit(added);
            }
            AstOp::LayoutFromMesh { mesh, .. } => visit(mesh),
            AstOp::LayoutRemoveBlocks { source, reference } => {
                visit(source);
                visit(reference);
            }
            AstOp::LayoutPack { source } => visit(source),
            AstOp::ImageBlankLayout { layout, .. } => visit(layout),
            AstOp::ImageCompose { layout, base, block_image, mask, .. } => {
                visit(layout);
                visit(base);
                visit(block_image);
                visit(mask);
            }
        }
    }};
}

impl AstOp {
    pub fn for_each_child(&self, mut f: impl FnMut(OpId)) {
        visit_child_slots!(self, |slot: &Option<OpId>| {
            if let Some(child) = slot {
                f(*child);
            }
        });
    }

    pub fn for_each_child_mut(&mut self, f: impl FnMut(&mut Option<OpId>)) {
        visit_child_slots!(self, f);
    }

    /// Shallow copy with every child replaced through `map`
    pub fn clone_with(&self, mut map: impl FnMut(OpId) -> OpId) -> AstOp {
        let mut op = self.clone();
        op.for_each_child_mut(|slot| {
            if let Some(child) = slot {
                *child = map(*child);
            }
        });
        op
    }

    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            AstOp::ConstantResource(_) | AstOp::ConstantBool(_) | AstOp::ConstantInt(_) | AstOp::ConstantScalar(_)
        )
    }

    pub fn data_type(&self) -> DataType {
        match self {
            AstOp::ConstantResource(constant) => constant.data_type(),
            AstOp::ConstantBool(_) | AstOp::ParameterBool { .. } => DataType::Bool,
            AstOp::ConstantInt(_) | AstOp::ParameterInt { .. } => DataType::Int,
            AstOp::ConstantScalar(_) | AstOp::ParameterScalar { .. } => DataType::Scalar,
            AstOp::MeshFormat { .. }
            | AstOp::MeshMerge { .. }
            | AstOp::MeshMorph { .. }
            | AstOp::MeshInterpolate { .. }
            | AstOp::MeshApplyPose { .. }
            | AstOp::MeshClipMorphPlane { .. }
            | AstOp::MeshTransformWithMesh { .. }
            | AstOp::MeshAddTags { .. }
            | AstOp::MeshRemoveMask { .. }
            | AstOp::MeshApplyLayout { .. }
            | AstOp::MeshSetSkeleton { .. }
            | AstOp::MeshDifference { .. } => DataType::Mesh,
            AstOp::Conditional { kind, .. } | AstOp::Switch { kind, .. } => *kind,
            AstOp::LayoutMerge { .. }
            | AstOp::LayoutFromMesh { .. }
            | AstOp::LayoutRemoveBlocks { .. }
            | AstOp::LayoutPack { .. } => DataType::Layout,
            AstOp::ImageBlankLayout { .. } | AstOp::ImageCompose { .. } => DataType::Image,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AstNode {
    pub(crate) op: AstOp,
    pub(crate) linked_address: Option<OpAddress>,
}

/// Arena of operations
#[derive(Debug, Clone, Default)]
pub struct AstGraph {
    pub(crate) nodes: Vec<AstNode>,
}

impl AstGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node whose children are already in the graph
    pub fn add(&mut self, op: AstOp) -> OpId {
        let len = self.nodes.len();
        op.for_each_child(|child| {
            assert!(child.index() < len, "Child {child:?} is not in the graph");
        });
        self.nodes.push(AstNode {
            op,
            linked_address: None,
        });
        OpId(len as u32)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn op(&self, id: OpId) -> &AstOp {
        &self.nodes[id.index()].op
    }

    /// Mutable access for graph construction
    ///
    /// Edits must keep children pointing at earlier nodes.
    pub fn op_mut(&mut self, id: OpId) -> &mut AstOp {
        &mut self.nodes[id.index()].op
    }

    pub fn children(&self, id: OpId) -> Vec<OpId> {
        let mut children = Vec::new();
        self.op(id).for_each_child(|child| children.push(child));
        children
    }

    /// Add a shallow copy of `id` with its children remapped
    pub fn clone_op(&mut self, id: OpId, map: impl FnMut(OpId) -> OpId) -> OpId {
        let op = self.op(id).clone_with(map);
        self.add(op)
    }

    /// Structural equality: same operation, parameters and child ids
    pub fn is_equal(&self, a: OpId, b: OpId) -> bool {
        a == b || self.op(a) == self.op(b)
    }

    pub fn op_hash(&self, id: OpId) -> u64 {
        let mut hasher = FxHasher::default();
        self.op(id).hash(&mut hasher);
        hasher.finish()
    }

    pub fn data_type(&self, id: OpId) -> DataType {
        self.op(id).data_type()
    }

    pub fn linked_address(&self, id: OpId) -> Option<OpAddress> {
        self.nodes[id.index()].linked_address
    }

    /// Nodes reachable from `root`, children before parents
    pub fn post_order(&self, root: OpId) -> Vec<OpId> {
        let mut order = Vec::new();
        let mut visited = FxHashSet::default();
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            stack.push((id, true));
            let children = self.children(id);
            for child in children.into_iter().rev() {
                if !visited.contains(&child) {
                    stack.push((child, false));
                }
            }
        }
        order
    }

    /// Number of distinct nodes reachable from `root`
    pub fn reachable_count(&self, root: OpId) -> usize {
        self.post_order(root).len()
    }
}
