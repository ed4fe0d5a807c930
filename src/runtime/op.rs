//! Byte code operations
//!
//! Every operation is a little-endian `u16` opcode followed by a fixed
//! argument block. Child references are `u32` program addresses where 0 is
//! the null operation. Operations with a variable number of children append
//! a `u16` count and the repeated fields.

use serde::{Deserialize, Serialize};

use crate::error::{invalid_program, ForgeResult};
use crate::image::ImageFormat;

/// Address of an operation in a program; 0 is the null operation
pub type OpAddress = u32;

/// Sentinel for absent table indices
pub const NO_INDEX: u32 = u32::MAX;

/// Type of the value an operation produces
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    None = 0,
    Bool = 1,
    Int = 2,
    Scalar = 3,
    Mesh = 4,
    Image = 5,
    Layout = 6,
}

impl DataType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => DataType::None,
            1 => DataType::Bool,
            2 => DataType::Int,
            3 => DataType::Scalar,
            4 => DataType::Mesh,
            5 => DataType::Image,
            6 => DataType::Layout,
            _ => return None,
        })
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    None = 0,

    BoolConstant,
    IntConstant,
    ScalarConstant,
    BoolParameter,
    IntParameter,
    ScalarParameter,

    MeshConstant,
    ImageConstant,
    LayoutConstant,

    MeshFormat,
    MeshMerge,
    MeshMorph,
    MeshInterpolate,
    MeshApplyPose,
    MeshClipMorphPlane,
    MeshTransformWithMesh,
    MeshAddTags,
    MeshRemoveMask,
    MeshApplyLayout,
    MeshSetSkeleton,
    MeshDifference,

    Conditional,
    Switch,

    LayoutMerge,
    LayoutFromMesh,
    LayoutRemoveBlocks,
    LayoutPack,

    ImageBlankLayout,
    ImageCompose,
}

impl OpType {
    const ALL: [OpType; 30] = [
        OpType::None,
        OpType::BoolConstant,
        OpType::IntConstant,
        OpType::ScalarConstant,
        OpType::BoolParameter,
        OpType::IntParameter,
        OpType::ScalarParameter,
        OpType::MeshConstant,
        OpType::ImageConstant,
        OpType::LayoutConstant,
        OpType::MeshFormat,
        OpType::MeshMerge,
        OpType::MeshMorph,
        OpType::MeshInterpolate,
        OpType::MeshApplyPose,
        OpType::MeshClipMorphPlane,
        OpType::MeshTransformWithMesh,
        OpType::MeshAddTags,
        OpType::MeshRemoveMask,
        OpType::MeshApplyLayout,
        OpType::MeshSetSkeleton,
        OpType::MeshDifference,
        OpType::Conditional,
        OpType::Switch,
        OpType::LayoutMerge,
        OpType::LayoutFromMesh,
        OpType::LayoutRemoveBlocks,
        OpType::LayoutPack,
        OpType::ImageBlankLayout,
        OpType::ImageCompose,
    ];

    pub fn from_u16(value: u16) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }
}

fn image_format_code(format: ImageFormat) -> u8 {
    match format {
        ImageFormat::None => 0,
        ImageFormat::L8 => 1,
        ImageFormat::RGB8 => 2,
        ImageFormat::RGBA8 => 3,
    }
}

fn image_format_from_code(code: u8) -> ForgeResult<ImageFormat> {
    Ok(match code {
        0 => ImageFormat::None,
        1 => ImageFormat::L8,
        2 => ImageFormat::RGB8,
        3 => ImageFormat::RGBA8,
        _ => return Err(invalid_program(format!("Unknown image format code {code}"))),
    })
}

/// Decoded arguments of one operation
#[derive(Debug, Clone, PartialEq)]
pub enum OpArgs {
    None,

    BoolConstant { value: bool },
    IntConstant { value: i32 },
    ScalarConstant { value: f32 },
    BoolParameter { parameter: u32 },
    IntParameter { parameter: u32 },
    ScalarParameter { parameter: u32 },

    /// `skeleton` and `physics_body` are table indices or `NO_INDEX`
    MeshConstant { value: u32, skeleton: u32, physics_body: u32 },
    ImageConstant { value: u32 },
    LayoutConstant { value: u32 },

    MeshFormat { source: OpAddress, format: OpAddress, flags: u32 },
    MeshMerge { base: OpAddress, added: OpAddress, new_surface_id: u32 },
    MeshMorph { base: OpAddress, target: OpAddress, factor: OpAddress },
    MeshInterpolate { base: OpAddress, factor: OpAddress, targets: Vec<OpAddress> },
    MeshApplyPose { base: OpAddress, pose: OpAddress },
    MeshClipMorphPlane {
        source: OpAddress,
        origin: [f32; 3],
        normal: [f32; 3],
        distance: f32,
        factor: f32,
    },
    MeshTransformWithMesh { source: OpAddress, bounding_mesh: OpAddress, matrix: [f32; 16] },
    /// Tags are indices into the string table
    MeshAddTags { source: OpAddress, tags: Vec<u32> },
    MeshRemoveMask { source: OpAddress, masks: Vec<OpAddress> },
    MeshApplyLayout { mesh: OpAddress, layout: OpAddress, channel: u16 },
    MeshSetSkeleton { source: OpAddress, skeleton: OpAddress },
    MeshDifference { base: OpAddress, target: OpAddress, ignore_texcoords: bool },

    Conditional { kind: DataType, condition: OpAddress, yes: OpAddress, no: OpAddress },
    Switch { kind: DataType, variable: OpAddress, default: OpAddress, cases: Vec<(i32, OpAddress)> },

    LayoutMerge { base: OpAddress, added: OpAddress },
    LayoutFromMesh { mesh: OpAddress, layout_index: u8 },
    LayoutRemoveBlocks { source: OpAddress, reference: OpAddress },
    LayoutPack { source: OpAddress },

    ImageBlankLayout { layout: OpAddress, block_size: [u16; 2], format: ImageFormat, mipmaps: u8 },
    ImageCompose { layout: OpAddress, base: OpAddress, block_image: OpAddress, mask: OpAddress, block_id: u64 },
}

impl OpArgs {
    pub fn op_type(&self) -> OpType {
        match self {
            OpArgs::None => OpType::None,
            OpArgs::BoolConstant { .. } => OpType::BoolConstant,
            OpArgs::IntConstant { .. } => OpType::IntConstant,
            OpArgs::ScalarConstant { .. } => OpType::ScalarConstant,
            OpArgs::BoolParameter { .. } => OpType::BoolParameter,
            OpArgs::IntParameter { .. } => OpType::IntParameter,
            OpArgs::ScalarParameter { .. } => OpType::ScalarParameter,
            OpArgs::MeshConstant { .. } => OpType::MeshConstant,
            OpArgs::ImageConstant { .. } => OpType::ImageConstant,
            OpArgs::LayoutConstant { .. } => OpType::LayoutConstant,
            OpArgs::MeshFormat { .. } => OpType::MeshFormat,
            OpArgs::MeshMerge { .. } => OpType::MeshMerge,
            OpArgs::MeshMorph { .. } => OpType::MeshMorph,
            OpArgs::MeshInterpolate { .. } => OpType::MeshInterpolate,
            OpArgs::MeshApplyPose { .. } => OpType::MeshApplyPose,
            OpArgs::MeshClipMorphPlane { .. } => OpType::MeshClipMorphPlane,
            OpArgs::MeshTransformWithMesh { .. } => OpType::MeshTransformWithMesh,
            OpArgs::MeshAddTags { .. } => OpType::MeshAddTags,
            OpArgs::MeshRemoveMask { .. } => OpType::MeshRemoveMask,
            OpArgs::MeshApplyLayout { .. } => OpType::MeshApplyLayout,
            OpArgs::MeshSetSkeleton { .. } => OpType::MeshSetSkeleton,
            OpArgs::MeshDifference { .. } => OpType::MeshDifference,
            OpArgs::Conditional { .. } => OpType::Conditional,
            OpArgs::Switch { .. } => OpType::Switch,
            OpArgs::LayoutMerge { .. } => OpType::LayoutMerge,
            OpArgs::LayoutFromMesh { .. } => OpType::LayoutFromMesh,
            OpArgs::LayoutRemoveBlocks { .. } => OpType::LayoutRemoveBlocks,
            OpArgs::LayoutPack { .. } => OpType::LayoutPack,
            OpArgs::ImageBlankLayout { .. } => OpType::ImageBlankLayout,
            OpArgs::ImageCompose { .. } => OpType::ImageCompose,
        }
    }

    /// Append the opcode and arguments to `out`
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut w = CodeWriter(out);
        w.u16(self.op_type() as u16);
        match self {
            OpArgs::None => {}
            OpArgs::BoolConstant { value } => w.u8(*value as u8),
            OpArgs::IntConstant { value } => w.i32(*value),
            OpArgs::ScalarConstant { value } => w.f32(*value),
            OpArgs::BoolParameter { parameter }
            | OpArgs::IntParameter { parameter }
            | OpArgs::ScalarParameter { parameter } => w.u32(*parameter),
            OpArgs::MeshConstant { value, skeleton, physics_body } => {
                w.u32(*value);
                w.u32(*skeleton);
                w.u32(*physics_body);
            }
            OpArgs::ImageConstant { value } | OpArgs::LayoutConstant { value } => w.u32(*value),
            OpArgs::MeshFormat { source, format, flags } => {
                w.u32(*source);
                w.u32(*format);
                w.u32(*flags);
            }
            OpArgs::MeshMerge { base, added, new_surface_id } => {
                w.u32(*base);
                w.u32(*added);
                w.u32(*new_surface_id);
            }
            OpArgs::MeshMorph { base, target, factor } => {
                w.u32(*base);
                w.u32(*target);
                w.u32(*factor);
            }
            OpArgs::MeshInterpolate { base, factor, targets } => {
                w.u32(*base);
                w.u32(*factor);
                w.u16(targets.len() as u16);
                targets.iter().for_each(|t| w.u32(*t));
            }
            OpArgs::MeshApplyPose { base, pose } => {
                w.u32(*base);
                w.u32(*pose);
            }
            OpArgs::MeshClipMorphPlane { source, origin, normal, distance, factor } => {
                w.u32(*source);
                origin.iter().chain(normal.iter()).for_each(|v| w.f32(*v));
                w.f32(*distance);
                w.f32(*factor);
            }
            OpArgs::MeshTransformWithMesh { source, bounding_mesh, matrix } => {
                w.u32(*source);
                w.u32(*bounding_mesh);
                matrix.iter().for_each(|v| w.f32(*v));
            }
            OpArgs::MeshAddTags { source, tags } => {
                w.u32(*source);
                w.u16(tags.len() as u16);
                tags.iter().for_each(|t| w.u32(*t));
            }
            OpArgs::MeshRemoveMask { source, masks } => {
                w.u32(*source);
                w.u16(masks.len() as u16);
                masks.iter().for_each(|m| w.u32(*m));
            }
            OpArgs::MeshApplyLayout { mesh, layout, channel } => {
                w.u32(*mesh);
                w.u32(*layout);
                w.u16(*channel);
            }
            OpArgs::MeshSetSkeleton { source, skeleton } => {
                w.u32(*source);
                w.u32(*skeleton);
            }
            OpArgs::MeshDifference { base, target, ignore_texcoords } => {
                w.u32(*base);
                w.u32(*target);
                w.u8(*ignore_texcoords as u8);
            }
            OpArgs::Conditional { kind, condition, yes, no } => {
                w.u8(*kind as u8);
                w.u32(*condition);
                w.u32(*yes);
                w.u32(*no);
            }
            OpArgs::Switch { kind, variable, default, cases } => {
                w.u8(*kind as u8);
                w.u32(*variable);
                w.u32(*default);
                w.u16(cases.len() as u16);
                for (condition, branch) in cases {
                    w.i32(*condition);
                    w.u32(*branch);
                }
            }
            OpArgs::LayoutMerge { base, added } => {
                w.u32(*base);
                w.u32(*added);
            }
            OpArgs::LayoutFromMesh { mesh, layout_index } => {
                w.u32(*mesh);
                w.u8(*layout_index);
            }
            OpArgs::LayoutRemoveBlocks { source, reference } => {
                w.u32(*source);
                w.u32(*reference);
            }
            OpArgs::LayoutPack { source } => w.u32(*source),
            OpArgs::ImageBlankLayout { layout, block_size, format, mipmaps } => {
                w.u32(*layout);
                w.u16(block_size[0]);
                w.u16(block_size[1]);
                w.u8(image_format_code(*format));
                w.u8(*mipmaps);
            }
            OpArgs::ImageCompose { layout, base, block_image, mask, block_id } => {
                w.u32(*layout);
                w.u32(*base);
                w.u32(*block_image);
                w.u32(*mask);
                w.u64(*block_id);
            }
        }
    }

    /// Decode one operation from the start of `code`
    pub fn decode(code: &[u8]) -> ForgeResult<OpArgs> {
        let mut r = CodeReader { code, pos: 0 };
        let opcode = r.u16()?;
        let op_type = OpType::from_u16(opcode).ok_or_else(|| invalid_program(format!("Unknown opcode {opcode}")))?;
        let args = match op_type {
            OpType::None => OpArgs::None,
            OpType::BoolConstant => OpArgs::BoolConstant { value: r.u8()? != 0 },
            OpType::IntConstant => OpArgs::IntConstant { value: r.i32()? },
            OpType::ScalarConstant => OpArgs::ScalarConstant { value: r.f32()? },
            OpType::BoolParameter => OpArgs::BoolParameter { parameter: r.u32()? },
            OpType::IntParameter => OpArgs::IntParameter { parameter: r.u32()? },
            OpType::ScalarParameter => OpArgs::ScalarParameter { parameter: r.u32()? },
            OpType::MeshConstant => OpArgs::MeshConstant {
                value: r.u32()?,
                skeleton: r.u32()?,
                physics_body: r.u32()?,
            },
            OpType::ImageConstant => OpArgs::ImageConstant { value: r.u32()? },
            OpType::LayoutConstant => OpArgs::LayoutConstant { value: r.u32()? },
            OpType::MeshFormat => OpArgs::MeshFormat {
                source: r.u32()?,
                format: r.u32()?,
                flags: r.u32()?,
            },
            OpType::MeshMerge => OpArgs::MeshMerge {
                base: r.u32()?,
                added: r.u32()?,
                new_surface_id: r.u32()?,
            },
            OpType::MeshMorph => OpArgs::MeshMorph {
                base: r.u32()?,
                target: r.u32()?,
                factor: r.u32()?,
            },
            OpType::MeshInterpolate => {
                let base = r.u32()?;
                let factor = r.u32()?;
                let count = r.u16()?;
                let targets = (0..count).map(|_| r.u32()).collect::<ForgeResult<_>>()?;
                OpArgs::MeshInterpolate { base, factor, targets }
            }
            OpType::MeshApplyPose => OpArgs::MeshApplyPose {
                base: r.u32()?,
                pose: r.u32()?,
            },
            OpType::MeshClipMorphPlane => OpArgs::MeshClipMorphPlane {
                source: r.u32()?,
                origin: [r.f32()?, r.f32()?, r.f32()?],
                normal: [r.f32()?, r.f32()?, r.f32()?],
                distance: r.f32()?,
                factor: r.f32()?,
            },
            OpType::MeshTransformWithMesh => {
                let source = r.u32()?;
                let bounding_mesh = r.u32()?;
                let mut matrix = [0.0; 16];
                for value in &mut matrix {
                    *value = r.f32()?;
                }
                OpArgs::MeshTransformWithMesh { source, bounding_mesh, matrix }
            }
            OpType::MeshAddTags => {
                let source = r.u32()?;
                let count = r.u16()?;
                let tags = (0..count).map(|_| r.u32()).collect::<ForgeResult<_>>()?;
                OpArgs::MeshAddTags { source, tags }
            }
            OpType::MeshRemoveMask => {
                let source = r.u32()?;
                let count = r.u16()?;
                let masks = (0..count).map(|_| r.u32()).collect::<ForgeResult<_>>()?;
                OpArgs::MeshRemoveMask { source, masks }
            }
            OpType::MeshApplyLayout => OpArgs::MeshApplyLayout {
                mesh: r.u32()?,
                layout: r.u32()?,
                channel: r.u16()?,
            },
            OpType::MeshSetSkeleton => OpArgs::MeshSetSkeleton {
                source: r.u32()?,
                skeleton: r.u32()?,
            },
            OpType::MeshDifference => OpArgs::MeshDifference {
                base: r.u32()?,
                target: r.u32()?,
                ignore_texcoords: r.u8()? != 0,
            },
            OpType::Conditional => OpArgs::Conditional {
                kind: r.data_type()?,
                condition: r.u32()?,
                yes: r.u32()?,
                no: r.u32()?,
            },
            OpType::Switch => {
                let kind = r.data_type()?;
                let variable = r.u32()?;
                let default = r.u32()?;
                let count = r.u16()?;
                let cases = (0..count)
                    .map(|_| -> ForgeResult<(i32, u32)> { Ok((r.i32()?, r.u32()?)) })
                    .collect::<ForgeResult<_>>()?;
                OpArgs::Switch { kind, variable, default, cases }
            }
            OpType::LayoutMerge => OpArgs::LayoutMerge {
                base: r.u32()?,
                added: r.u32()?,
            },
            OpType::LayoutFromMesh => OpArgs::LayoutFromMesh {
                mesh: r.u32()?,
                layout_index: r.u8()?,
            },
            OpType::LayoutRemoveBlocks => OpArgs::LayoutRemoveBlocks {
                source: r.u32()?,
                reference: r.u32()?,
            },
            OpType::LayoutPack => OpArgs::LayoutPack { source: r.u32()? },
            OpType::ImageBlankLayout => OpArgs::ImageBlankLayout {
                layout: r.u32()?,
                block_size: [r.u16()?, r.u16()?],
                format: image_format_from_code(r.u8()?)?,
                mipmaps: r.u8()?,
            },
            OpType::ImageCompose => OpArgs::ImageCompose {
                layout: r.u32()?,
                base: r.u32()?,
                block_image: r.u32()?,
                mask: r.u32()?,
                block_id: r.u64()?,
            },
        };
        Ok(args)
    }
}

struct CodeWriter<'a>(&'a mut Vec<u8>);

impl CodeWriter<'_> {
    fn u8(&mut self, v: u8) {
        self.0.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }
}

struct CodeReader<'a> {
    code: &'a [u8],
    pos: usize,
}

impl CodeReader<'_> {
    fn take<const N: usize>(&mut self) -> ForgeResult<[u8; N]> {
        let bytes = self
            .code
            .get(self.pos..self.pos + N)
            .ok_or_else(|| invalid_program(format!("Byte code truncated at offset {}", self.pos)))?;
        self.pos += N;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn u8(&mut self) -> ForgeResult<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> ForgeResult<u16> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    fn u32(&mut self) -> ForgeResult<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn i32(&mut self) -> ForgeResult<i32> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    fn u64(&mut self) -> ForgeResult<u64> {
        Ok(u64::from_le_bytes(self.take()?))
    }

    fn f32(&mut self) -> ForgeResult<f32> {
        Ok(f32::from_le_bytes(self.take()?))
    }

    fn data_type(&mut self) -> ForgeResult<DataType> {
        let code = self.u8()?;
        DataType::from_u8(code).ok_or_else(|| invalid_program(format!("Unknown data type {code}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_table_matches_discriminants() {
        for (i, op) in OpType::ALL.iter().enumerate() {
            assert_eq!(*op as u16 as usize, i);
        }
        assert_eq!(OpType::from_u16(OpType::ALL.len() as u16), None);
    }

    #[test]
    fn test_variable_length_ops_decode() {
        let ops = [
            OpArgs::Switch {
                kind: DataType::Mesh,
                variable: 3,
                default: 0,
                cases: vec![(1, 4), (-2, 5)],
            },
            OpArgs::MeshInterpolate {
                base: 1,
                factor: 2,
                targets: vec![3, 0, 4],
            },
            OpArgs::ImageBlankLayout {
                layout: 9,
                block_size: [16, 32],
                format: ImageFormat::RGBA8,
                mipmaps: 3,
            },
        ];
        for op in ops {
            let mut code = Vec::new();
            op.encode(&mut code);
            assert_eq!(OpArgs::decode(&code).expect("Decoding should succeed"), op);
        }
    }

    #[test]
    fn test_argument_layout_is_little_endian() {
        let mut code = Vec::new();
        OpArgs::MeshMerge {
            base: 1,
            added: 0x0203,
            new_surface_id: 7,
        }
        .encode(&mut code);
        assert_eq!(&code[0..2], &(OpType::MeshMerge as u16).to_le_bytes());
        assert_eq!(&code[2..6], &[1, 0, 0, 0]);
        assert_eq!(&code[6..10], &[3, 2, 0, 0]);
        assert_eq!(code.len(), 14);
    }

    #[test]
    fn test_truncated_code_is_rejected() {
        let mut code = Vec::new();
        OpArgs::LayoutPack { source: 5 }.encode(&mut code);
        code.pop();
        assert!(OpArgs::decode(&code).is_err());
        assert!(OpArgs::decode(&[0xff, 0xff]).is_err());
    }
}
