//! Flattening the graph into a program
//!
//! Children are linked before their parents, so every argument refers to an
//! address that already exists. A node is linked once; linking it again
//! returns the stored address. Constants hand their payload to the program
//! and release it.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::compiler::ast::{AstGraph, AstOp, OpId};
use crate::compiler::constant::ResourceValue;
use crate::config::LinkerConfig;
use crate::error::ForgeResult;
use crate::image::Image;
use crate::mesh::{Mesh, MeshCopyFlags};
use crate::runtime::{DataType, ImageConstant, OpAddress, OpArgs, ParamValue, ParameterDesc, Program, NO_INDEX};
use crate::serialisation::write_versioned;

/// Counters of one link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub ops: usize,
    pub mesh_constants: usize,
    pub shared_mesh_constants: usize,
    pub image_lods: usize,
    pub shared_image_lods: usize,
}

/// Link-time state shared by every node of one program
pub struct Linker<'a> {
    program: &'a mut Program,
    config: &'a LinkerConfig,
    mesh_constants: FxHashMap<Vec<u8>, u32>,
    image_lods: FxHashMap<Vec<u8>, u32>,
    stats: LinkStats,
}

impl<'a> Linker<'a> {
    pub fn new(program: &'a mut Program, config: &'a LinkerConfig) -> Self {
        Self {
            program,
            config,
            mesh_constants: FxHashMap::default(),
            image_lods: FxHashMap::default(),
            stats: LinkStats::default(),
        }
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    fn push(&mut self, args: &OpArgs) -> OpAddress {
        self.stats.ops += 1;
        self.program.push_op(args)
    }

    /// Mesh constant without skeleton and physics body, which go to their own tables
    fn add_mesh(&mut self, mesh: &Arc<Mesh>) -> ForgeResult<OpArgs> {
        let skeleton = mesh
            .skeleton()
            .map(|s| self.program.add_constant_skeleton(s))
            .unwrap_or(NO_INDEX);
        let physics_body = mesh
            .physics_body()
            .map(|b| self.program.add_constant_physics_body(b))
            .unwrap_or(NO_INDEX);

        let stripped = if skeleton != NO_INDEX || physics_body != NO_INDEX {
            let mut stripped =
                mesh.clone_with_flags(MeshCopyFlags::ALL_FLAGS - MeshCopyFlags::WITH_SKELETON - MeshCopyFlags::WITH_PHYSICS_BODY);
            stripped.set_skeleton(None);
            stripped.set_physics_body(None);
            Arc::new(stripped)
        } else {
            mesh.clone()
        };

        self.stats.mesh_constants += 1;
        let value = if self.config.deduplicate_constants {
            let key = write_versioned(&*stripped)?;
            match self.mesh_constants.get(&key) {
                Some(index) => {
                    self.stats.shared_mesh_constants += 1;
                    *index
                }
                None => {
                    let index = self.program.push_constant_mesh(stripped);
                    self.mesh_constants.insert(key, index);
                    index
                }
            }
        } else {
            self.program.push_constant_mesh(stripped)
        };
        Ok(OpArgs::MeshConstant {
            value,
            skeleton,
            physics_body,
        })
    }

    fn add_image_lod(&mut self, lod: Image) -> ForgeResult<u32> {
        self.stats.image_lods += 1;
        if !self.config.deduplicate_constants {
            return Ok(self.program.push_constant_image_lod(Arc::new(lod)));
        }
        let key = write_versioned(&lod)?;
        if let Some(index) = self.image_lods.get(&key) {
            self.stats.shared_image_lods += 1;
            return Ok(*index);
        }
        let index = self.program.push_constant_image_lod(Arc::new(lod));
        self.image_lods.insert(key, index);
        Ok(index)
    }

    fn add_image(&mut self, image: &Arc<Image>) -> ForgeResult<OpArgs> {
        let lods = if self.config.separate_image_mips && image.lod_count() > 1 {
            (0..image.lod_count())
                .map(|lod| self.add_image_lod(image.extract_lod(lod)))
                .collect::<ForgeResult<Vec<_>>>()?
        } else {
            vec![self.add_image_lod((**image).clone())?]
        };
        let value = self.program.push_constant_image(ImageConstant { lods });
        Ok(OpArgs::ImageConstant { value })
    }

    fn add_source(&mut self, args: &OpArgs, descriptor: &str) {
        let (kind, index) = match args {
            OpArgs::MeshConstant { value, .. } => (DataType::Mesh, *value),
            OpArgs::ImageConstant { value } => (DataType::Image, *value),
            OpArgs::LayoutConstant { value } => (DataType::Layout, *value),
            _ => return,
        };
        self.program.add_constant_source(kind, index, descriptor);
    }

    fn add_parameter(&mut self, name: &str, default: ParamValue) -> u32 {
        self.program.add_parameter(ParameterDesc {
            name: name.to_string(),
            default,
        })
    }
}

fn address(graph: &AstGraph, child: Option<OpId>) -> OpAddress {
    child.and_then(|c| graph.linked_address(c)).unwrap_or(0)
}

impl AstGraph {
    /// Link `root` and everything below it into `linker`'s program
    pub fn link(&mut self, root: OpId, linker: &mut Linker<'_>) -> ForgeResult<OpAddress> {
        if let Some(address) = self.linked_address(root) {
            return Ok(address);
        }
        for child in self.children(root) {
            self.link(child, linker)?;
        }

        let graph = &*self;
        let a = |child: Option<OpId>| address(graph, child);
        let args = match self.op(root) {
            AstOp::ConstantResource(constant) => {
                let args = match constant.value()? {
                    ResourceValue::Mesh(mesh) => Some(linker.add_mesh(&mesh)?),
                    ResourceValue::Image(image) if image.is_empty() => None,
                    ResourceValue::Image(image) => Some(linker.add_image(&image)?),
                    ResourceValue::Layout(layout) => Some(OpArgs::LayoutConstant {
                        value: linker.program.add_constant_layout(layout),
                    }),
                };
                if let (Some(args), Some(source)) = (&args, constant.source_descriptor()) {
                    linker.add_source(args, source);
                }
                args
            }
            AstOp::ConstantBool(value) => Some(OpArgs::BoolConstant { value: *value }),
            AstOp::ConstantInt(value) => Some(OpArgs::IntConstant { value: *value }),
            AstOp::ConstantScalar(value) => Some(OpArgs::ScalarConstant { value: value.get() }),
            AstOp::ParameterBool { name, default } => Some(OpArgs::BoolParameter {
                parameter: linker.add_parameter(name, ParamValue::Bool(*default)),
            }),
            AstOp::ParameterInt { name, default } => Some(OpArgs::IntParameter {
                parameter: linker.add_parameter(name, ParamValue::Int(*default)),
            }),
            AstOp::ParameterScalar { name, default } => Some(OpArgs::ScalarParameter {
                parameter: linker.add_parameter(name, ParamValue::Scalar(default.get())),
            }),

            AstOp::MeshFormat { source, format, flags } => Some(OpArgs::MeshFormat {
                source: a(*source),
                format: a(*format),
                flags: flags.bits(),
            }),
            AstOp::MeshMerge { base, added, new_surface_id } => Some(OpArgs::MeshMerge {
                base: a(*base),
                added: a(*added),
                new_surface_id: *new_surface_id,
            }),
            AstOp::MeshMorph { base, target, factor } => Some(OpArgs::MeshMorph {
                base: a(*base),
                target: a(*target),
                factor: a(*factor),
            }),
            AstOp::MeshInterpolate { base, targets, factor } => Some(OpArgs::MeshInterpolate {
                base: a(*base),
                factor: a(*factor),
                targets: targets.iter().map(|t| a(*t)).collect(),
            }),
            AstOp::MeshApplyPose { base, pose } => Some(OpArgs::MeshApplyPose {
                base: a(*base),
                pose: a(*pose),
            }),
            AstOp::MeshClipMorphPlane { source, origin, normal, distance, factor } => {
                Some(OpArgs::MeshClipMorphPlane {
                    source: a(*source),
                    origin: origin.map(|v| v.get()),
                    normal: normal.map(|v| v.get()),
                    distance: distance.get(),
                    factor: factor.get(),
                })
            }
            AstOp::MeshTransformWithMesh { source, bounding_mesh, matrix } => {
                Some(OpArgs::MeshTransformWithMesh {
                    source: a(*source),
                    bounding_mesh: a(*bounding_mesh),
                    matrix: matrix.map(|v| v.get()),
                })
            }
            AstOp::MeshAddTags { source, tags } => Some(OpArgs::MeshAddTags {
                source: a(*source),
                tags: tags.iter().map(|t| linker.program.add_string(t)).collect(),
            }),
            AstOp::MeshRemoveMask { source, masks } => Some(OpArgs::MeshRemoveMask {
                source: a(*source),
                masks: masks.iter().map(|m| a(*m)).collect(),
            }),
            AstOp::MeshApplyLayout { mesh, layout, channel } => Some(OpArgs::MeshApplyLayout {
                mesh: a(*mesh),
                layout: a(*layout),
                channel: *channel,
            }),
            AstOp::MeshSetSkeleton { source, skeleton } => Some(OpArgs::MeshSetSkeleton {
                source: a(*source),
                skeleton: a(*skeleton),
            }),
            AstOp::MeshDifference { base, target, ignore_texcoords } => Some(OpArgs::MeshDifference {
                base: a(*base),
                target: a(*target),
                ignore_texcoords: *ignore_texcoords,
            }),

            AstOp::Conditional { kind, condition, yes, no } => Some(OpArgs::Conditional {
                kind: *kind,
                condition: a(*condition),
                yes: a(*yes),
                no: a(*no),
            }),
            AstOp::Switch { kind, variable, default, cases } => Some(OpArgs::Switch {
                kind: *kind,
                variable: a(*variable),
                default: a(*default),
                cases: cases.iter().map(|(condition, branch)| (*condition, a(*branch))).collect(),
            }),

            AstOp::LayoutMerge { base, added } => Some(OpArgs::LayoutMerge {
                base: a(*base),
                added: a(*added),
            }),
            AstOp::LayoutFromMesh { mesh, layout_index } => Some(OpArgs::LayoutFromMesh {
                mesh: a(*mesh),
                layout_index: *layout_index,
            }),
            AstOp::LayoutRemoveBlocks { source, reference } => Some(OpArgs::LayoutRemoveBlocks {
                source: a(*source),
                reference: a(*reference),
            }),
            AstOp::LayoutPack { source } => Some(OpArgs::LayoutPack { source: a(*source) }),

            AstOp::ImageBlankLayout { layout, block_size, format, mipmaps } => Some(OpArgs::ImageBlankLayout {
                layout: a(*layout),
                block_size: *block_size,
                format: *format,
                mipmaps: *mipmaps,
            }),
            AstOp::ImageCompose { layout, base, block_image, mask, block_id } => Some(OpArgs::ImageCompose {
                layout: a(*layout),
                base: a(*base),
                block_image: a(*block_image),
                mask: a(*mask),
                block_id: *block_id,
            }),
        };

        let address = match args {
            Some(args) => linker.push(&args),
            None => 0,
        };
        let node = &mut self.nodes[root.index()];
        node.linked_address = Some(address);
        if let AstOp::ConstantResource(constant) = &mut node.op {
            constant.release();
        }
        Ok(address)
    }
}
