//! Linked programs
//!
//! A program is a flat byte code buffer addressed through `op_address`, plus
//! the constant tables the operations index into. Address 0 always holds the
//! null operation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{invalid_program, ForgeResult};
use crate::image::Image;
use crate::layout::Layout;
use crate::mesh::{Mesh, PhysicsBody, Skeleton};
use crate::runtime::op::{DataType, OpAddress, OpArgs, OpType};
use crate::serialisation::Versioned;

/// Runtime value of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Bool(bool),
    Int(i32),
    Scalar(f32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDesc {
    pub name: String,
    pub default: ParamValue,
}

/// Image constant as a list of lod entries, largest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageConstant {
    pub lods: Vec<u32>,
}

/// Asset a linked constant was generated from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantSource {
    pub kind: DataType,
    /// Index into the constant table of `kind`
    pub index: u32,
    pub descriptor: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    op_address: Vec<u32>,
    byte_code: Vec<u8>,
    parameters: Vec<ParameterDesc>,
    strings: Vec<String>,
    constant_meshes: Vec<Arc<Mesh>>,
    constant_skeletons: Vec<Arc<Skeleton>>,
    constant_physics_bodies: Vec<Arc<PhysicsBody>>,
    constant_layouts: Vec<Arc<Layout>>,
    constant_images: Vec<ImageConstant>,
    constant_image_lods: Vec<Arc<Image>>,
    constant_sources: Vec<ConstantSource>,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Versioned for Program {
    const VERSION: u32 = 2;
    const KIND: [u8; 4] = *b"PROG";
}

impl Program {
    pub fn new() -> Self {
        let mut program = Self {
            op_address: Vec::new(),
            byte_code: Vec::new(),
            parameters: Vec::new(),
            strings: Vec::new(),
            constant_meshes: Vec::new(),
            constant_skeletons: Vec::new(),
            constant_physics_bodies: Vec::new(),
            constant_layouts: Vec::new(),
            constant_images: Vec::new(),
            constant_image_lods: Vec::new(),
            constant_sources: Vec::new(),
        };
        program.push_op(&OpArgs::None);
        program
    }

    /// Number of operations, including the null operation
    pub fn op_count(&self) -> usize {
        self.op_address.len()
    }

    pub fn byte_code_size(&self) -> usize {
        self.byte_code.len()
    }

    /// Append an operation and return its address
    pub fn push_op(&mut self, args: &OpArgs) -> OpAddress {
        let address = self.op_address.len() as OpAddress;
        self.op_address.push(self.byte_code.len() as u32);
        args.encode(&mut self.byte_code);
        address
    }

    fn op_code(&self, address: OpAddress) -> ForgeResult<&[u8]> {
        let start = *self
            .op_address
            .get(address as usize)
            .ok_or_else(|| invalid_program(format!("Address {address} out of range")))? as usize;
        let end = self
            .op_address
            .get(address as usize + 1)
            .map(|e| *e as usize)
            .unwrap_or(self.byte_code.len());
        self.byte_code
            .get(start..end)
            .ok_or_else(|| invalid_program(format!("Operation {address} points outside the byte code")))
    }

    pub fn op_type(&self, address: OpAddress) -> ForgeResult<OpType> {
        Ok(self.op_args(address)?.op_type())
    }

    pub fn op_args(&self, address: OpAddress) -> ForgeResult<OpArgs> {
        OpArgs::decode(self.op_code(address)?)
    }

    pub fn parameters(&self) -> &[ParameterDesc] {
        &self.parameters
    }

    pub fn find_parameter(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name == name)
    }

    /// Register a parameter, reusing an existing one with the same name
    pub fn add_parameter(&mut self, desc: ParameterDesc) -> u32 {
        if let Some(index) = self.find_parameter(&desc.name) {
            return index as u32;
        }
        self.parameters.push(desc);
        (self.parameters.len() - 1) as u32
    }

    pub fn string(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(String::as_str)
    }

    pub fn add_string(&mut self, value: &str) -> u32 {
        if let Some(index) = self.strings.iter().position(|s| s == value) {
            return index as u32;
        }
        self.strings.push(value.to_string());
        (self.strings.len() - 1) as u32
    }

    pub fn constant_mesh_count(&self) -> usize {
        self.constant_meshes.len()
    }

    pub fn constant_mesh(&self, index: u32) -> Option<&Arc<Mesh>> {
        self.constant_meshes.get(index as usize)
    }

    pub(crate) fn push_constant_mesh(&mut self, mesh: Arc<Mesh>) -> u32 {
        self.constant_meshes.push(mesh);
        (self.constant_meshes.len() - 1) as u32
    }

    pub fn constant_skeleton(&self, index: u32) -> Option<&Arc<Skeleton>> {
        self.constant_skeletons.get(index as usize)
    }

    /// Add a skeleton, sharing the slot of an equal one
    pub(crate) fn add_constant_skeleton(&mut self, skeleton: &Arc<Skeleton>) -> u32 {
        if let Some(index) = self.constant_skeletons.iter().position(|s| **s == **skeleton) {
            return index as u32;
        }
        self.constant_skeletons.push(skeleton.clone());
        (self.constant_skeletons.len() - 1) as u32
    }

    pub fn constant_skeleton_count(&self) -> usize {
        self.constant_skeletons.len()
    }

    pub fn constant_physics_body(&self, index: u32) -> Option<&Arc<PhysicsBody>> {
        self.constant_physics_bodies.get(index as usize)
    }

    pub(crate) fn add_constant_physics_body(&mut self, body: &Arc<PhysicsBody>) -> u32 {
        if let Some(index) = self.constant_physics_bodies.iter().position(|b| **b == **body) {
            return index as u32;
        }
        self.constant_physics_bodies.push(body.clone());
        (self.constant_physics_bodies.len() - 1) as u32
    }

    pub fn constant_layout_count(&self) -> usize {
        self.constant_layouts.len()
    }

    pub fn constant_layout(&self, index: u32) -> Option<&Arc<Layout>> {
        self.constant_layouts.get(index as usize)
    }

    pub(crate) fn add_constant_layout(&mut self, layout: Arc<Layout>) -> u32 {
        if let Some(index) = self.constant_layouts.iter().position(|l| **l == *layout) {
            return index as u32;
        }
        self.constant_layouts.push(layout);
        (self.constant_layouts.len() - 1) as u32
    }

    pub fn constant_image_count(&self) -> usize {
        self.constant_images.len()
    }

    pub fn constant_image_lod_count(&self) -> usize {
        self.constant_image_lods.len()
    }

    pub(crate) fn push_constant_image_lod(&mut self, image: Arc<Image>) -> u32 {
        self.constant_image_lods.push(image);
        (self.constant_image_lods.len() - 1) as u32
    }

    pub(crate) fn push_constant_image(&mut self, constant: ImageConstant) -> u32 {
        self.constant_images.push(constant);
        (self.constant_images.len() - 1) as u32
    }

    pub fn constant_sources(&self) -> &[ConstantSource] {
        &self.constant_sources
    }

    /// Source descriptors recorded for one constant table entry
    pub fn constant_source(&self, kind: DataType, index: u32) -> impl Iterator<Item = &str> {
        self.constant_sources
            .iter()
            .filter(move |s| s.kind == kind && s.index == index)
            .map(|s| s.descriptor.as_str())
    }

    /// Record the asset behind a constant; shared slots may collect several
    pub(crate) fn add_constant_source(&mut self, kind: DataType, index: u32, descriptor: &str) {
        if self.constant_source(kind, index).any(|d| d == descriptor) {
            return;
        }
        self.constant_sources.push(ConstantSource {
            kind,
            index,
            descriptor: descriptor.to_string(),
        });
    }

    /// Reassemble an image constant from its lod entries
    pub fn constant_image(&self, index: u32) -> ForgeResult<Arc<Image>> {
        let constant = self
            .constant_images
            .get(index as usize)
            .ok_or_else(|| invalid_program(format!("Image constant {index} out of range")))?;
        let lods = constant
            .lods
            .iter()
            .map(|l| {
                self.constant_image_lods
                    .get(*l as usize)
                    .ok_or_else(|| invalid_program(format!("Image lod {l} out of range")))
            })
            .collect::<ForgeResult<Vec<_>>>()?;

        match lods.as_slice() {
            [] => Err(invalid_program(format!("Image constant {index} has no data"))),
            [single] => Ok(Arc::clone(single)),
            [first, ..] => {
                let size = first.size();
                let mut image = Image::new(size.x, size.y, lods.len() as u32, first.format());
                for (lod, part) in lods.iter().enumerate() {
                    image.lod_data_mut(lod as u32).copy_from_slice(part.lod_data(0));
                }
                Ok(Arc::new(image))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageFormat;
    use crate::serialisation::{read_versioned, write_versioned};

    #[test]
    fn test_address_zero_is_null() {
        let program = Program::new();
        assert_eq!(program.op_count(), 1);
        assert_eq!(program.op_type(0).expect("Reading op should succeed"), OpType::None);
        assert!(program.op_args(1).is_err());
    }

    #[test]
    fn test_push_and_read_ops() {
        let mut program = Program::new();
        let a = program.push_op(&OpArgs::IntConstant { value: -4 });
        let b = program.push_op(&OpArgs::LayoutPack { source: a });
        assert_eq!((a, b), (1, 2));
        assert_eq!(
            program.op_args(b).expect("Reading op should succeed"),
            OpArgs::LayoutPack { source: 1 }
        );
    }

    #[test]
    fn test_tables_share_equal_entries() {
        let mut program = Program::new();
        assert_eq!(program.add_string("red"), 0);
        assert_eq!(program.add_string("blue"), 1);
        assert_eq!(program.add_string("red"), 0);

        let desc = ParameterDesc {
            name: "size".into(),
            default: ParamValue::Int(2),
        };
        assert_eq!(program.add_parameter(desc.clone()), 0);
        assert_eq!(program.add_parameter(desc), 0);
    }

    #[test]
    fn test_image_reassembled_from_lods() {
        let mut full = Image::new(2, 2, 2, ImageFormat::L8);
        full.lod_data_mut(0).copy_from_slice(&[1, 2, 3, 4]);
        full.lod_data_mut(1).copy_from_slice(&[9]);

        let mut program = Program::new();
        let lods = (0..2)
            .map(|l| program.push_constant_image_lod(Arc::new(full.extract_lod(l))))
            .collect();
        let index = program.push_constant_image(ImageConstant { lods });
        let image = program.constant_image(index).expect("Reassembly should succeed");
        assert_eq!(*image, full);
    }

    #[test]
    fn test_constant_sources_collect_per_slot() {
        let mut program = Program::new();
        program.add_constant_source(DataType::Mesh, 0, "body");
        program.add_constant_source(DataType::Mesh, 0, "body");
        program.add_constant_source(DataType::Mesh, 0, "torso");
        program.add_constant_source(DataType::Layout, 0, "body");
        assert_eq!(program.constant_sources().len(), 3);
        assert_eq!(
            program.constant_source(DataType::Mesh, 0).collect::<Vec<_>>(),
            vec!["body", "torso"]
        );
        assert_eq!(program.constant_source(DataType::Image, 0).count(), 0);
    }

    #[test]
    fn test_program_archive() {
        let mut program = Program::new();
        program.push_op(&OpArgs::BoolConstant { value: true });
        program.add_constant_source(DataType::Image, 0, "skin");
        let data = write_versioned(&program).expect("Writing should succeed");
        let back: Program = read_versioned(&data).expect("Reading should succeed");
        assert_eq!(back, program);
    }
}
