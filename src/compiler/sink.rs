//! Mesh format sinking
//!
//! Moves a format operation below the operations it commutes with, so each
//! source mesh is reformatted once near the leaves instead of after every
//! combination. Morph targets get a format restricted to one interleaved
//! vertex buffer, and posed meshes always keep their skinning channels.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::compiler::ast::{AstGraph, AstOp, OpId};
use crate::compiler::constant::{ConstantResource, ResourceValue};
use crate::error::ForgeResult;
use crate::mesh::{Mesh, MeshBufferChannel, MeshBufferFormat, MeshBufferSemantic};
use crate::ops::MeshFormatFlags;

/// Bone influences per vertex of the generic skinning buffer
pub const MAX_TOTAL_INFLUENCES: u16 = 12;

/// Format with every vertex channel of `format` packed into one buffer
pub fn make_morph_target_format(format: &Mesh) -> Mesh {
    let vertices = format.vertex_buffers();
    let mut channels = Vec::new();
    let mut offset = 0usize;
    for b in 0..vertices.buffer_count() {
        for channel in vertices.buffer(b).channels() {
            channels.push(MeshBufferChannel {
                offset: offset as u16,
                ..*channel
            });
            offset += channel.size();
        }
    }

    let mut morph_format = Mesh::new();
    let buffers = morph_format.vertex_buffers_mut();
    buffers.set_buffer_count(1);
    buffers.set_buffer(0, offset, &channels);
    morph_format
}

/// `format`, with a generic skinning buffer added when it has no bone indices
pub fn ensure_format_has_skinning_buffers(format: &Arc<Mesh>) -> Arc<Mesh> {
    if format
        .vertex_buffers()
        .find_channel(MeshBufferSemantic::BoneIndices, 0)
        .is_some()
    {
        return format.clone();
    }

    let mut mesh = (**format).clone();
    let vertices = mesh.vertex_buffers_mut();
    let buffer = vertices.buffer_count();
    vertices.set_buffer_count(buffer + 1);
    vertices.set_buffer(
        buffer,
        MAX_TOTAL_INFLUENCES as usize * 4,
        &[
            MeshBufferChannel::new(
                MeshBufferSemantic::BoneIndices,
                0,
                MeshBufferFormat::UInt16,
                MAX_TOTAL_INFLUENCES,
                0,
            ),
            MeshBufferChannel::new(
                MeshBufferSemantic::BoneWeights,
                0,
                MeshBufferFormat::NUInt16,
                MAX_TOTAL_INFLUENCES,
                MAX_TOTAL_INFLUENCES * 2,
            ),
        ],
    );
    Arc::new(mesh)
}

/// Format waiting to be applied below the node being visited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PendingFormat {
    format: Option<OpId>,
    flags: MeshFormatFlags,
}

struct MeshFormatSinker<'a> {
    graph: &'a mut AstGraph,
    initial_source: Option<OpId>,
    old_to_new: FxHashMap<(OpId, PendingFormat), OpId>,
    morph_formats: FxHashMap<OpId, OpId>,
    skinning_formats: FxHashMap<OpId, OpId>,
}

impl<'a> MeshFormatSinker<'a> {
    fn new(graph: &'a mut AstGraph) -> Self {
        Self {
            graph,
            initial_source: None,
            old_to_new: FxHashMap::default(),
            morph_formats: FxHashMap::default(),
            skinning_formats: FxHashMap::default(),
        }
    }

    /// Replacement for the format node `root`, if sinking changed anything
    fn apply(&mut self, root: OpId) -> ForgeResult<Option<OpId>> {
        let AstOp::MeshFormat { source, format, flags } = self.graph.op(root).clone() else {
            return Ok(None);
        };
        self.old_to_new.clear();
        self.initial_source = source;
        let pending = PendingFormat { format, flags };
        let new_source = self.visit(source, pending)?;
        if new_source != source {
            Ok(new_source)
        } else {
            Ok(None)
        }
    }

    /// Constant mesh behind the pending format, if it is one
    fn format_mesh(&self, pending: PendingFormat) -> ForgeResult<Option<Arc<Mesh>>> {
        let Some(format) = pending.format else {
            return Ok(None);
        };
        match self.graph.op(format) {
            AstOp::ConstantResource(constant) => Ok(constant.value()?.as_mesh().cloned()),
            _ => Ok(None),
        }
    }

    /// New format constant derived from the constant `origin`, keeping its source descriptor
    fn add_mesh_constant(&mut self, mesh: Mesh, origin: OpId) -> ForgeResult<OpId> {
        let mut constant = ConstantResource::new(ResourceValue::Mesh(Arc::new(mesh)), None)?;
        if let AstOp::ConstantResource(original) = self.graph.op(origin) {
            if let Some(source) = original.source_descriptor() {
                constant = constant.with_source_descriptor(source);
            }
        }
        Ok(self.graph.add(AstOp::ConstantResource(constant)))
    }

    /// Pending format for morph targets of a base formatted with `pending`
    fn morph_target_format(&mut self, pending: PendingFormat) -> ForgeResult<Option<PendingFormat>> {
        let Some(format) = pending.format else {
            return Ok(None);
        };
        if let Some(existing) = self.morph_formats.get(&format) {
            return Ok(Some(Self::morph_pending(*existing)));
        }
        let Some(mesh) = self.format_mesh(pending)? else {
            return Ok(None);
        };
        let constant = self.add_mesh_constant(make_morph_target_format(&mesh), format)?;
        self.morph_formats.insert(format, constant);
        Ok(Some(Self::morph_pending(constant)))
    }

    fn morph_pending(format: OpId) -> PendingFormat {
        PendingFormat {
            format: Some(format),
            flags: MeshFormatFlags::VERTEX | MeshFormatFlags::IGNORE_MISSING,
        }
    }

    /// Pending format for the base of a pose application
    fn skinning_format(&mut self, pending: PendingFormat) -> ForgeResult<Option<PendingFormat>> {
        let Some(format) = pending.format else {
            return Ok(None);
        };
        let flags = pending.flags | MeshFormatFlags::OPTIMIZE_BUFFERS;
        if let Some(existing) = self.skinning_formats.get(&format) {
            return Ok(Some(PendingFormat {
                format: Some(*existing),
                flags,
            }));
        }
        let Some(mesh) = self.format_mesh(pending)? else {
            return Ok(None);
        };
        let skinned = ensure_format_has_skinning_buffers(&mesh);
        let constant = if Arc::ptr_eq(&skinned, &mesh) {
            format
        } else {
            self.add_mesh_constant((*skinned).clone(), format)?
        };
        self.skinning_formats.insert(format, constant);
        Ok(Some(PendingFormat {
            format: Some(constant),
            flags,
        }))
    }

    fn wrap(&mut self, at: OpId, pending: PendingFormat) -> OpId {
        if Some(at) == self.initial_source {
            return at;
        }
        self.graph.add(AstOp::MeshFormat {
            source: Some(at),
            format: pending.format,
            flags: pending.flags,
        })
    }

    fn visit(&mut self, at: Option<OpId>, pending: PendingFormat) -> ForgeResult<Option<OpId>> {
        let Some(at) = at else {
            return Ok(None);
        };
        if let Some(cached) = self.old_to_new.get(&(at, pending)) {
            return Ok(Some(*cached));
        }

        let mut op = self.graph.op(at).clone();
        let rewritten = match &mut op {
            AstOp::MeshApplyLayout { mesh: source, .. }
            | AstOp::MeshSetSkeleton { source, .. }
            | AstOp::MeshAddTags { source, .. }
            | AstOp::MeshClipMorphPlane { source, .. }
            | AstOp::MeshRemoveMask { source, .. } => {
                *source = self.visit(*source, pending)?;
                true
            }

            // The bounding mesh needs its own format and is left alone
            AstOp::MeshTransformWithMesh { source, .. } => {
                *source = self.visit(*source, pending)?;
                true
            }

            AstOp::MeshMerge { base, added, .. } => {
                *base = self.visit(*base, pending)?;
                *added = self.visit(*added, pending)?;
                true
            }

            AstOp::MeshMorph { base, target, .. } => match self.morph_target_format(pending)? {
                Some(target_format) => {
                    *base = self.visit(*base, pending)?;
                    *target = self.visit(*target, target_format)?;
                    true
                }
                None => false,
            },

            AstOp::MeshInterpolate { base, targets, .. } => match self.morph_target_format(pending)? {
                Some(target_format) => {
                    *base = self.visit(*base, pending)?;
                    for target in targets.iter_mut() {
                        *target = self.visit(*target, target_format)?;
                    }
                    true
                }
                None => false,
            },

            AstOp::MeshApplyPose { base, .. } => match self.skinning_format(pending)? {
                Some(skinning_format) => {
                    *base = self.visit(*base, skinning_format)?;
                    true
                }
                None => false,
            },

            AstOp::Conditional { yes, no, .. } => {
                *yes = self.visit(*yes, pending)?;
                *no = self.visit(*no, pending)?;
                true
            }

            AstOp::Switch { default, cases, .. } => {
                *default = self.visit(*default, pending)?;
                for (_, branch) in cases.iter_mut() {
                    *branch = self.visit(*branch, pending)?;
                }
                true
            }

            // Differences compare exact source data and must not be reformatted
            _ => false,
        };
        let new_at = if rewritten {
            self.graph.add(op)
        } else {
            self.wrap(at, pending)
        };

        log::trace!("Mesh format sink rewrote {at:?} as {new_at:?}");
        self.old_to_new.insert((at, pending), new_at);
        Ok(Some(new_at))
    }
}

impl AstGraph {
    /// Push every mesh format reachable from `root` towards the leaves
    ///
    /// Returns the new root, which equals `root` when nothing moved.
    pub fn sink_mesh_formats(&mut self, root: OpId) -> ForgeResult<OpId> {
        let order = self.post_order(root);
        let mut remap: FxHashMap<OpId, OpId> = FxHashMap::default();
        let mut sunk = 0usize;

        for id in order {
            let mut changed = false;
            let op = self.op(id).clone_with(|child| {
                let mapped = remap.get(&child).copied().unwrap_or(child);
                changed |= mapped != child;
                mapped
            });
            let current = if changed { self.add(op) } else { id };

            let replacement = if matches!(self.op(current), AstOp::MeshFormat { .. }) {
                MeshFormatSinker::new(self).apply(current)?
            } else {
                None
            };
            let target = match replacement {
                Some(new_id) => {
                    sunk += 1;
                    new_id
                }
                None => current,
            };
            if target != id {
                remap.insert(id, target);
            }
        }

        if sunk > 0 {
            log::debug!("Sank {sunk} mesh format operations");
        }
        Ok(remap.get(&root).copied().unwrap_or(root))
    }
}
