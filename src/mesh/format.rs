//! Channel semantics, storage formats and per-component conversion

use half::f16;
use serde::{Deserialize, Serialize};

/// Meaning of the data stored in a buffer channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeshBufferSemantic {
    None,
    /// Persistent vertex identifier, relative (u32) or absolute (u64)
    VertexIndex,
    Position,
    Normal,
    Tangent,
    Binormal,
    TexCoords,
    Colour,
    BoneWeights,
    BoneIndices,
    /// Layout block identifier, relative (u16) or absolute (u64)
    LayoutBlock,
    TangentSign,
    Other,
}

impl MeshBufferSemantic {
    /// Semantics the engine synthesises and maintains by itself
    pub fn is_system(self) -> bool {
        matches!(self, MeshBufferSemantic::VertexIndex | MeshBufferSemantic::LayoutBlock)
    }
}

/// Storage format of one channel component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeshBufferFormat {
    None,
    Float16,
    Float32,
    Float64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    NUInt8,
    NUInt16,
    NUInt32,
    NInt8,
    NInt16,
    NInt32,
    /// Unsigned byte direction, components mapped from [-1,1]
    PackedDir8,
    /// As `PackedDir8` with the tangent frame sign in the fourth component
    PackedDir8WTangentSign,
    /// Signed byte direction
    PackedDirS8,
    /// As `PackedDirS8` with the tangent frame sign in the fourth component
    PackedDirS8WTangentSign,
}

impl MeshBufferFormat {
    /// Size in bytes of one component
    pub const fn size(self) -> usize {
        match self {
            MeshBufferFormat::None => 0,
            MeshBufferFormat::UInt8
            | MeshBufferFormat::Int8
            | MeshBufferFormat::NUInt8
            | MeshBufferFormat::NInt8
            | MeshBufferFormat::PackedDir8
            | MeshBufferFormat::PackedDir8WTangentSign
            | MeshBufferFormat::PackedDirS8
            | MeshBufferFormat::PackedDirS8WTangentSign => 1,
            MeshBufferFormat::Float16
            | MeshBufferFormat::UInt16
            | MeshBufferFormat::Int16
            | MeshBufferFormat::NUInt16
            | MeshBufferFormat::NInt16 => 2,
            MeshBufferFormat::Float32
            | MeshBufferFormat::UInt32
            | MeshBufferFormat::Int32
            | MeshBufferFormat::NUInt32
            | MeshBufferFormat::NInt32 => 4,
            MeshBufferFormat::Float64 | MeshBufferFormat::UInt64 | MeshBufferFormat::Int64 => 8,
        }
    }

    pub fn is_packed_dir_with_sign(self) -> bool {
        matches!(
            self,
            MeshBufferFormat::PackedDir8WTangentSign | MeshBufferFormat::PackedDirS8WTangentSign
        )
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            MeshBufferFormat::Float16 | MeshBufferFormat::Float32 | MeshBufferFormat::Float64
        )
    }

    /// Largest raw value of an integer format, if it is one
    pub fn integer_max(self) -> Option<i128> {
        match self {
            MeshBufferFormat::UInt8 | MeshBufferFormat::NUInt8 => Some(u8::MAX as i128),
            MeshBufferFormat::UInt16 | MeshBufferFormat::NUInt16 => Some(u16::MAX as i128),
            MeshBufferFormat::UInt32 | MeshBufferFormat::NUInt32 => Some(u32::MAX as i128),
            MeshBufferFormat::UInt64 => Some(u64::MAX as i128),
            MeshBufferFormat::Int8 | MeshBufferFormat::NInt8 => Some(i8::MAX as i128),
            MeshBufferFormat::Int16 | MeshBufferFormat::NInt16 => Some(i16::MAX as i128),
            MeshBufferFormat::Int32 | MeshBufferFormat::NInt32 => Some(i32::MAX as i128),
            MeshBufferFormat::Int64 => Some(i64::MAX as i128),
            _ => None,
        }
    }

    fn integer_min(self) -> i128 {
        match self {
            MeshBufferFormat::Int8 | MeshBufferFormat::NInt8 => i8::MIN as i128,
            MeshBufferFormat::Int16 | MeshBufferFormat::NInt16 => i16::MIN as i128,
            MeshBufferFormat::Int32 | MeshBufferFormat::NInt32 => i32::MIN as i128,
            MeshBufferFormat::Int64 => i64::MIN as i128,
            _ => 0,
        }
    }
}

/// Decoded value of a single component
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Component {
    Float(f64),
    /// Normalised integer or packed direction, already mapped to a float range
    Normalised(f64),
    Integer(i128),
}

impl Component {
    pub fn as_f64(self) -> f64 {
        match self {
            Component::Float(v) | Component::Normalised(v) => v,
            Component::Integer(v) => v as f64,
        }
    }

    pub fn as_i128(self) -> i128 {
        match self {
            Component::Float(v) | Component::Normalised(v) => v as i128,
            Component::Integer(v) => v,
        }
    }
}

fn read<T: bytemuck::Pod>(data: &[u8]) -> T {
    bytemuck::pod_read_unaligned(&data[..std::mem::size_of::<T>()])
}

fn write<T: bytemuck::Pod>(out: &mut [u8], value: T) {
    out[..std::mem::size_of::<T>()].copy_from_slice(bytemuck::bytes_of(&value));
}

/// Decode the component stored at the start of `data`
pub fn read_component(data: &[u8], format: MeshBufferFormat) -> Component {
    use MeshBufferFormat as F;
    match format {
        F::None => Component::Integer(0),
        F::Float16 => Component::Float(f16::from_bits(read::<u16>(data)).to_f64()),
        F::Float32 => Component::Float(read::<f32>(data) as f64),
        F::Float64 => Component::Float(read::<f64>(data)),
        F::UInt8 => Component::Integer(data[0] as i128),
        F::UInt16 => Component::Integer(read::<u16>(data) as i128),
        F::UInt32 => Component::Integer(read::<u32>(data) as i128),
        F::UInt64 => Component::Integer(read::<u64>(data) as i128),
        F::Int8 => Component::Integer(data[0] as i8 as i128),
        F::Int16 => Component::Integer(read::<i16>(data) as i128),
        F::Int32 => Component::Integer(read::<i32>(data) as i128),
        F::Int64 => Component::Integer(read::<i64>(data) as i128),
        F::NUInt8 => Component::Normalised(data[0] as f64 / u8::MAX as f64),
        F::NUInt16 => Component::Normalised(read::<u16>(data) as f64 / u16::MAX as f64),
        F::NUInt32 => Component::Normalised(read::<u32>(data) as f64 / u32::MAX as f64),
        F::NInt8 => Component::Normalised((data[0] as i8 as f64 / i8::MAX as f64).max(-1.0)),
        F::NInt16 => Component::Normalised((read::<i16>(data) as f64 / i16::MAX as f64).max(-1.0)),
        F::NInt32 => Component::Normalised((read::<i32>(data) as f64 / i32::MAX as f64).max(-1.0)),
        F::PackedDir8 | F::PackedDir8WTangentSign => {
            Component::Normalised(data[0] as f64 / 127.5 - 1.0)
        }
        F::PackedDirS8 | F::PackedDirS8WTangentSign => {
            Component::Normalised((data[0] as i8 as f64 / 127.0).max(-1.0))
        }
    }
}

fn clamp_integer(value: i128, format: MeshBufferFormat) -> i128 {
    let max = format.integer_max().unwrap_or(0);
    value.clamp(format.integer_min(), max)
}

fn normalised_raw(value: f64, format: MeshBufferFormat) -> i128 {
    let max = format.integer_max().unwrap_or(0);
    let min = format.integer_min();
    let scaled = if min < 0 {
        value.clamp(-1.0, 1.0) * max as f64
    } else {
        value.clamp(0.0, 1.0) * max as f64
    };
    (scaled.round() as i128).clamp(min, max)
}

/// Encode a component into the start of `out`
pub fn write_component(out: &mut [u8], format: MeshBufferFormat, value: Component) {
    use MeshBufferFormat as F;
    match format {
        F::None => {}
        F::Float16 => write(out, f16::from_f64(value.as_f64()).to_bits()),
        F::Float32 => write(out, value.as_f64() as f32),
        F::Float64 => write(out, value.as_f64()),
        F::UInt8 | F::UInt16 | F::UInt32 | F::UInt64 | F::Int8 | F::Int16 | F::Int32 | F::Int64 => {
            let raw = match value {
                Component::Integer(v) => clamp_integer(v, format),
                Component::Float(v) | Component::Normalised(v) => clamp_integer(v as i128, format),
            };
            write_integer(out, format, raw);
        }
        F::NUInt8 | F::NUInt16 | F::NUInt32 | F::NInt8 | F::NInt16 | F::NInt32 => {
            let raw = match value {
                Component::Integer(v) => clamp_integer(v, format),
                Component::Float(v) | Component::Normalised(v) => normalised_raw(v, format),
            };
            write_integer(out, format, raw);
        }
        F::PackedDir8 | F::PackedDir8WTangentSign => {
            let v = value.as_f64().clamp(-1.0, 1.0);
            out[0] = ((v + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8;
        }
        F::PackedDirS8 | F::PackedDirS8WTangentSign => {
            let v = value.as_f64().clamp(-1.0, 1.0);
            out[0] = ((v * 127.0).round() as i8) as u8;
        }
    }
}

fn write_integer(out: &mut [u8], format: MeshBufferFormat, raw: i128) {
    use MeshBufferFormat as F;
    match format {
        F::UInt8 | F::NUInt8 => out[0] = raw as u8,
        F::Int8 | F::NInt8 => out[0] = raw as i8 as u8,
        F::UInt16 | F::NUInt16 => write(out, raw as u16),
        F::Int16 | F::NInt16 => write(out, raw as i16),
        F::UInt32 | F::NUInt32 => write(out, raw as u32),
        F::Int32 | F::NInt32 => write(out, raw as i32),
        F::UInt64 => write(out, raw as u64),
        F::Int64 => write(out, raw as i64),
        _ => {}
    }
}

/// Convert one component between formats
pub fn convert_component(
    out: &mut [u8],
    out_format: MeshBufferFormat,
    src: &[u8],
    src_format: MeshBufferFormat,
) {
    if out_format == src_format {
        let size = out_format.size();
        out[..size].copy_from_slice(&src[..size]);
        return;
    }
    write_component(out, out_format, read_component(src, src_format));
}
