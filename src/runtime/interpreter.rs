//! Program evaluation
//!
//! Builds resources by walking the byte code from a root address. Every
//! operation is evaluated at most once per build call; shared sub-expressions
//! reuse the memoised value.

use std::collections::HashMap;
use std::sync::Arc;

use glam::UVec2;
use rustc_hash::FxHashMap;

use crate::error::{invalid_program, ForgeError, ForgeResult};
use crate::image::Image;
use crate::layout::{layout_from_mesh_remove_blocks, layout_merge, layout_pack, layout_remove_blocks, Layout};
use crate::mesh::Mesh;
use crate::ops::{image_blank_layout, image_compose, mesh_format, mesh_merge, mesh_optimize_buffers, MeshFormatFlags};
use crate::runtime::op::{OpAddress, OpArgs, NO_INDEX};
use crate::runtime::program::{ParamValue, Program};

/// Parameter values of one build, by name
///
/// Parameters without a value use the default stored in the program.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    values: HashMap<String, ParamValue>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: ParamValue) -> &mut Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn set_bool(&mut self, name: impl Into<String>, value: bool) -> &mut Self {
        self.set(name, ParamValue::Bool(value))
    }

    pub fn set_int(&mut self, name: impl Into<String>, value: i32) -> &mut Self {
        self.set(name, ParamValue::Int(value))
    }

    pub fn set_scalar(&mut self, name: impl Into<String>, value: f32) -> &mut Self {
        self.set(name, ParamValue::Scalar(value))
    }

    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.values.get(name).copied()
    }
}

#[derive(Debug, Clone)]
enum Value {
    None,
    Bool(bool),
    Int(i32),
    Scalar(f32),
    Mesh(Arc<Mesh>),
    Image(Arc<Image>),
    Layout(Arc<Layout>),
}

/// Evaluates the operations of a program
#[derive(Debug, Clone, Copy)]
pub struct Interpreter<'a> {
    program: &'a Program,
}

impl<'a> Interpreter<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self { program }
    }

    /// Mesh produced at `address`; the null operation gives an empty mesh
    pub fn build_mesh(&self, address: OpAddress, params: &Parameters) -> ForgeResult<Arc<Mesh>> {
        let mut build = Build::new(self.program, params);
        Ok(build.mesh(address)?.unwrap_or_else(|| Arc::new(Mesh::new())))
    }

    pub fn build_image(&self, address: OpAddress, params: &Parameters) -> ForgeResult<Arc<Image>> {
        let mut build = Build::new(self.program, params);
        Ok(build
            .image(address)?
            .unwrap_or_else(|| Arc::new(Image::new(0, 0, 1, crate::image::ImageFormat::None))))
    }

    pub fn build_layout(&self, address: OpAddress, params: &Parameters) -> ForgeResult<Arc<Layout>> {
        let mut build = Build::new(self.program, params);
        Ok(build.layout(address)?.unwrap_or_default())
    }

    pub fn build_bool(&self, address: OpAddress, params: &Parameters) -> ForgeResult<bool> {
        Build::new(self.program, params).bool(address)
    }

    pub fn build_int(&self, address: OpAddress, params: &Parameters) -> ForgeResult<i32> {
        Build::new(self.program, params).int(address)
    }

    pub fn build_scalar(&self, address: OpAddress, params: &Parameters) -> ForgeResult<f32> {
        match Build::new(self.program, params).eval(address)? {
            Value::Scalar(v) => Ok(v),
            Value::None => Ok(0.0),
            _ => Err(invalid_program(format!("Operation {address} is not a scalar"))),
        }
    }
}

struct Build<'a> {
    program: &'a Program,
    params: &'a Parameters,
    cache: FxHashMap<OpAddress, Value>,
}

impl<'a> Build<'a> {
    fn new(program: &'a Program, params: &'a Parameters) -> Self {
        Self {
            program,
            params,
            cache: FxHashMap::default(),
        }
    }

    fn mesh(&mut self, address: OpAddress) -> ForgeResult<Option<Arc<Mesh>>> {
        match self.eval(address)? {
            Value::Mesh(mesh) => Ok(Some(mesh)),
            Value::None => Ok(None),
            _ => Err(invalid_program(format!("Operation {address} is not a mesh"))),
        }
    }

    fn image(&mut self, address: OpAddress) -> ForgeResult<Option<Arc<Image>>> {
        match self.eval(address)? {
            Value::Image(image) => Ok(Some(image)),
            Value::None => Ok(None),
            _ => Err(invalid_program(format!("Operation {address} is not an image"))),
        }
    }

    fn layout(&mut self, address: OpAddress) -> ForgeResult<Option<Arc<Layout>>> {
        match self.eval(address)? {
            Value::Layout(layout) => Ok(Some(layout)),
            Value::None => Ok(None),
            _ => Err(invalid_program(format!("Operation {address} is not a layout"))),
        }
    }

    fn bool(&mut self, address: OpAddress) -> ForgeResult<bool> {
        match self.eval(address)? {
            Value::Bool(v) => Ok(v),
            Value::None => Ok(false),
            _ => Err(invalid_program(format!("Operation {address} is not a bool"))),
        }
    }

    fn int(&mut self, address: OpAddress) -> ForgeResult<i32> {
        match self.eval(address)? {
            Value::Int(v) => Ok(v),
            Value::None => Ok(0),
            _ => Err(invalid_program(format!("Operation {address} is not an int"))),
        }
    }

    fn parameter(&self, index: u32) -> ForgeResult<ParamValue> {
        let desc = self
            .program
            .parameters()
            .get(index as usize)
            .ok_or_else(|| ForgeError::MissingParameter(format!("#{index}")))?;
        let Some(value) = self.params.get(&desc.name) else {
            return Ok(desc.default);
        };
        if std::mem::discriminant(&value) != std::mem::discriminant(&desc.default) {
            return Err(ForgeError::MissingParameter(format!(
                "{} expects {:?} but was given {:?}",
                desc.name, desc.default, value
            )));
        }
        Ok(value)
    }

    fn eval(&mut self, address: OpAddress) -> ForgeResult<Value> {
        if let Some(value) = self.cache.get(&address) {
            return Ok(value.clone());
        }
        let value = self.eval_op(address)?;
        self.cache.insert(address, value.clone());
        Ok(value)
    }

    fn eval_op(&mut self, address: OpAddress) -> ForgeResult<Value> {
        let args = self.program.op_args(address)?;
        let value = match args {
            OpArgs::None => Value::None,

            OpArgs::BoolConstant { value } => Value::Bool(value),
            OpArgs::IntConstant { value } => Value::Int(value),
            OpArgs::ScalarConstant { value } => Value::Scalar(value),
            OpArgs::BoolParameter { parameter }
            | OpArgs::IntParameter { parameter }
            | OpArgs::ScalarParameter { parameter } => match self.parameter(parameter)? {
                ParamValue::Bool(v) => Value::Bool(v),
                ParamValue::Int(v) => Value::Int(v),
                ParamValue::Scalar(v) => Value::Scalar(v),
            },

            OpArgs::MeshConstant { value, skeleton, physics_body } => {
                let mesh = self
                    .program
                    .constant_mesh(value)
                    .ok_or_else(|| invalid_program(format!("Mesh constant {value} out of range")))?;
                if skeleton == NO_INDEX && physics_body == NO_INDEX {
                    Value::Mesh(mesh.clone())
                } else {
                    let mut mesh = (**mesh).clone();
                    if skeleton != NO_INDEX {
                        mesh.set_skeleton(self.program.constant_skeleton(skeleton).cloned());
                    }
                    if physics_body != NO_INDEX {
                        mesh.set_physics_body(self.program.constant_physics_body(physics_body).cloned());
                    }
                    Value::Mesh(Arc::new(mesh))
                }
            }
            OpArgs::ImageConstant { value } => Value::Image(self.program.constant_image(value)?),
            OpArgs::LayoutConstant { value } => Value::Layout(
                self.program
                    .constant_layout(value)
                    .cloned()
                    .ok_or_else(|| invalid_program(format!("Layout constant {value} out of range")))?,
            ),

            OpArgs::MeshFormat { source, format, flags } => {
                let Some(source) = self.mesh(source)? else {
                    return Ok(Value::None);
                };
                let Some(format) = self.mesh(format)? else {
                    return Ok(Value::Mesh(source));
                };
                let flags = MeshFormatFlags::from_bits_truncate(flags);
                let mut result = mesh_format(
                    &source,
                    &format,
                    true,
                    flags.contains(MeshFormatFlags::VERTEX),
                    flags.contains(MeshFormatFlags::INDEX),
                    flags.contains(MeshFormatFlags::IGNORE_MISSING),
                );
                if flags.contains(MeshFormatFlags::OPTIMIZE_BUFFERS) {
                    mesh_optimize_buffers(&mut result);
                }
                Value::Mesh(Arc::new(result))
            }
            OpArgs::MeshMerge { base, added, new_surface_id } => {
                match (self.mesh(base)?, self.mesh(added)?) {
                    (Some(base), Some(added)) => Value::Mesh(Arc::new(mesh_merge(&base, &added, new_surface_id))),
                    (Some(only), None) | (None, Some(only)) => Value::Mesh(only),
                    (None, None) => Value::None,
                }
            }
            OpArgs::MeshAddTags { source, tags } => {
                let Some(source) = self.mesh(source)? else {
                    return Ok(Value::None);
                };
                let mut mesh = (*source).clone();
                for tag in tags {
                    let tag = self
                        .program
                        .string(tag)
                        .ok_or_else(|| invalid_program(format!("String {tag} out of range")))?;
                    mesh.add_tag(tag);
                }
                Value::Mesh(Arc::new(mesh))
            }
            OpArgs::MeshSetSkeleton { source, skeleton } => {
                let Some(source) = self.mesh(source)? else {
                    return Ok(Value::None);
                };
                let Some(skeleton_mesh) = self.mesh(skeleton)? else {
                    return Ok(Value::Mesh(source));
                };
                let mut mesh = (*source).clone();
                mesh.set_skeleton(skeleton_mesh.skeleton().cloned());
                Value::Mesh(Arc::new(mesh))
            }
            OpArgs::MeshApplyLayout { mesh, layout, channel } => {
                let Some(source) = self.mesh(mesh)? else {
                    return Ok(Value::None);
                };
                let Some(layout) = self.layout(layout)? else {
                    return Ok(Value::Mesh(source));
                };
                let mut mesh = (*source).clone();
                mesh.set_layout(channel as usize, layout);
                Value::Mesh(Arc::new(mesh))
            }

            OpArgs::Conditional { condition, yes, no, .. } => {
                let branch = if self.bool(condition)? { yes } else { no };
                self.eval(branch)?
            }
            OpArgs::Switch { variable, default, cases, .. } => {
                let selector = self.int(variable)?;
                let branch = cases
                    .iter()
                    .find(|(condition, _)| *condition == selector)
                    .map(|(_, branch)| *branch)
                    .unwrap_or(default);
                self.eval(branch)?
            }

            OpArgs::LayoutMerge { base, added } => match (self.layout(base)?, self.layout(added)?) {
                (Some(base), Some(added)) => Value::Layout(Arc::new(layout_merge(&base, &added))),
                (Some(only), None) | (None, Some(only)) => Value::Layout(only),
                (None, None) => Value::None,
            },
            OpArgs::LayoutFromMesh { mesh, layout_index } => {
                let Some(mesh) = self.mesh(mesh)? else {
                    return Ok(Value::None);
                };
                match layout_from_mesh_remove_blocks(&mesh, layout_index as usize) {
                    Some(layout) => Value::Layout(Arc::new(layout)),
                    None => Value::None,
                }
            }
            OpArgs::LayoutRemoveBlocks { source, reference } => {
                let Some(source) = self.layout(source)? else {
                    return Ok(Value::None);
                };
                match self.layout(reference)? {
                    Some(reference) => Value::Layout(Arc::new(layout_remove_blocks(&source, &reference))),
                    None => Value::Layout(source),
                }
            }
            OpArgs::LayoutPack { source } => match self.layout(source)? {
                Some(source) => Value::Layout(Arc::new(layout_pack(&source))),
                None => Value::None,
            },

            OpArgs::ImageBlankLayout { layout, block_size, format, mipmaps } => {
                let Some(layout) = self.layout(layout)? else {
                    return Ok(Value::None);
                };
                let block = UVec2::new(block_size[0] as u32, block_size[1] as u32);
                Value::Image(Arc::new(image_blank_layout(&layout, block, format, mipmaps as u32)))
            }
            OpArgs::ImageCompose { layout, base, block_image, mask, block_id } => {
                let Some(base) = self.image(base)? else {
                    return Ok(Value::None);
                };
                let (Some(layout), Some(block)) = (self.layout(layout)?, self.image(block_image)?) else {
                    return Ok(Value::Image(base));
                };
                let mask = self.image(mask)?;
                Value::Image(Arc::new(image_compose(&layout, &base, &block, mask.as_deref(), block_id)))
            }

            OpArgs::MeshMorph { .. }
            | OpArgs::MeshInterpolate { .. }
            | OpArgs::MeshApplyPose { .. }
            | OpArgs::MeshClipMorphPlane { .. }
            | OpArgs::MeshTransformWithMesh { .. }
            | OpArgs::MeshRemoveMask { .. }
            | OpArgs::MeshDifference { .. } => {
                let op_type = args.op_type();
                log::warn!("Operation {op_type:?} at {address} cannot be evaluated");
                return Err(ForgeError::UnsupportedOperation(op_type));
            }
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutBlock;
    use crate::runtime::program::ParameterDesc;
    use glam::IVec2;

    fn layout_program() -> (Program, OpAddress, OpAddress) {
        let mut program = Program::new();
        let mut small = Layout::new(IVec2::new(2, 2));
        small.add_block(LayoutBlock::new(IVec2::ZERO, IVec2::ONE, 1));
        let mut large = Layout::new(IVec2::new(4, 4));
        large.add_block(LayoutBlock::new(IVec2::ZERO, IVec2::ONE, 2));

        let small = program.add_constant_layout(Arc::new(small));
        let large = program.add_constant_layout(Arc::new(large));
        let small = program.push_op(&OpArgs::LayoutConstant { value: small });
        let large = program.push_op(&OpArgs::LayoutConstant { value: large });
        let parameter = program.add_parameter(ParameterDesc {
            name: "large".into(),
            default: ParamValue::Bool(false),
        });
        let condition = program.push_op(&OpArgs::BoolParameter { parameter });
        let root = program.push_op(&OpArgs::Conditional {
            kind: crate::runtime::op::DataType::Layout,
            condition,
            yes: large,
            no: small,
        });
        (program, root, condition)
    }

    #[test]
    fn test_conditional_follows_parameter() {
        let (program, root, condition) = layout_program();
        let interpreter = Interpreter::new(&program);

        let default = interpreter
            .build_layout(root, &Parameters::new())
            .expect("Building should succeed");
        assert_eq!(default.grid_size(), IVec2::new(2, 2));

        let mut params = Parameters::new();
        params.set_bool("large", true);
        assert!(interpreter.build_bool(condition, &params).expect("Building should succeed"));
        let chosen = interpreter.build_layout(root, &params).expect("Building should succeed");
        assert_eq!(chosen.blocks()[0].id, 2);
    }

    #[test]
    fn test_parameter_type_mismatch() {
        let (program, root, _) = layout_program();
        let mut params = Parameters::new();
        params.set_int("large", 1);
        let result = Interpreter::new(&program).build_layout(root, &params);
        assert!(matches!(result, Err(ForgeError::MissingParameter(_))));
    }

    #[test]
    fn test_switch_selects_case_or_default() {
        let mut program = Program::new();
        let a = program.push_op(&OpArgs::IntConstant { value: 10 });
        let b = program.push_op(&OpArgs::IntConstant { value: 20 });
        let parameter = program.add_parameter(ParameterDesc {
            name: "option".into(),
            default: ParamValue::Int(0),
        });
        let variable = program.push_op(&OpArgs::IntParameter { parameter });
        let root = program.push_op(&OpArgs::Switch {
            kind: crate::runtime::op::DataType::Int,
            variable,
            default: a,
            cases: vec![(3, b)],
        });
        let interpreter = Interpreter::new(&program);

        let mut params = Parameters::new();
        assert_eq!(interpreter.build_int(root, &params).expect("Building should succeed"), 10);
        params.set_int("option", 3);
        assert_eq!(interpreter.build_int(root, &params).expect("Building should succeed"), 20);
    }

    #[test]
    fn test_unsupported_operation_is_reported() {
        let mut program = Program::new();
        let root = program.push_op(&OpArgs::MeshMorph {
            base: 0,
            target: 0,
            factor: 0,
        });
        let result = Interpreter::new(&program).build_mesh(root, &Parameters::new());
        assert!(matches!(
            result,
            Err(ForgeError::UnsupportedOperation(crate::runtime::op::OpType::MeshMorph))
        ));
    }

    #[test]
    fn test_null_address_builds_empty_values() {
        let program = Program::new();
        let interpreter = Interpreter::new(&program);
        let params = Parameters::new();
        let mesh = interpreter.build_mesh(0, &params).expect("Building should succeed");
        assert_eq!(mesh.vertex_count(), 0);
        assert!(interpreter.build_image(0, &params).expect("Building should succeed").is_empty());
        assert_eq!(
            interpreter.build_layout(0, &params).expect("Building should succeed").block_count(),
            0
        );
    }
}
