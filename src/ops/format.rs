//! Mesh reformatting
//!
//! Rebuilds the buffers of a mesh with the channel layout of a format mesh.
//! Channels present in both are converted element by element, channels only
//! in the format are synthesised, and vertex or layout block ids are expanded
//! from their compact encodings when the format asks for absolute ids.

use bitflags::bitflags;
use glam::Mat3;
use serde::{Deserialize, Serialize};

use crate::mesh::format::{convert_component, write_component};
use crate::mesh::{
    BufferInit, ChannelReader, Component, Mesh, MeshBufferChannel, MeshBufferFormat, MeshBufferSemantic,
    MeshBufferSet, MeshCopyFlags,
};

bitflags! {
    /// Options of a mesh format operation
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MeshFormatFlags: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        /// Drop format channels the source does not have instead of synthesising them
        const IGNORE_MISSING = 1 << 2;
        const OPTIMIZE_BUFFERS = 1 << 3;
    }
}

fn channel_range(element: usize, element_size: usize, channel: &MeshBufferChannel) -> std::ops::Range<usize> {
    let start = element * element_size + channel.offset as usize;
    start..start + channel.size()
}

fn write_ids(
    target: &mut [u8],
    element_size: usize,
    channel: &MeshBufferChannel,
    source: Option<ChannelReader<'_>>,
    count: usize,
    prefix: u32,
) {
    let high = (prefix as u64) << 32;
    let absolute = channel.format == MeshBufferFormat::UInt64;
    for e in 0..count {
        let out = &mut target[channel_range(e, element_size, channel)];
        let id = match &source {
            Some(reader)
                if reader.format() == channel.format
                    && reader.components() == channel.component_count as usize =>
            {
                out.copy_from_slice(reader.bytes(e));
                continue;
            }
            Some(reader) if absolute && reader.format() != MeshBufferFormat::UInt64 => high | reader.as_u64(e),
            Some(reader) => reader.as_u64(e),
            None if absolute => high | e as u64,
            None => e as u64,
        };
        write_component(out, channel.format, Component::Integer(id as i128));
    }
}

fn fill_missing(target: &mut [u8], element_size: usize, channel: &MeshBufferChannel, count: usize) {
    use MeshBufferFormat as F;
    // Colours are synthesised white so they stay neutral when multiplied.
    let white = match (channel.semantic, channel.format) {
        (MeshBufferSemantic::Colour, f) if f.is_float() => Some(Component::Float(1.0)),
        (MeshBufferSemantic::Colour, F::NUInt8 | F::NUInt16 | F::NUInt32) => Some(Component::Normalised(1.0)),
        _ => None,
    };
    let size = channel.format.size();
    for e in 0..count {
        let out = &mut target[channel_range(e, element_size, channel)];
        match white {
            Some(value) => {
                for k in 0..channel.component_count as usize {
                    write_component(&mut out[k * size..], channel.format, value);
                }
            }
            None => out.fill(0),
        }
    }
}

fn tangent_frame(source: &MeshBufferSet, semantic_index: i32) -> Option<[ChannelReader<'_>; 3]> {
    Some([
        ChannelReader::new(source, MeshBufferSemantic::Tangent, semantic_index)?,
        ChannelReader::new(source, MeshBufferSemantic::Binormal, semantic_index)?,
        ChannelReader::new(source, MeshBufferSemantic::Normal, semantic_index)?,
    ])
}

fn tangent_sign(frame: &[ChannelReader<'_>; 3], element: usize, format: MeshBufferFormat) -> u8 {
    let basis = Mat3::from_cols(
        frame[0].as_vec3(element),
        frame[1].as_vec3(element),
        frame[2].as_vec3(element),
    );
    let negative = basis.determinant() < 0.0;
    match (format, negative) {
        (MeshBufferFormat::PackedDir8WTangentSign, true) => 0,
        (MeshBufferFormat::PackedDir8WTangentSign, false) => u8::MAX,
        (_, true) => i8::MIN as u8,
        (_, false) => i8::MAX as u8,
    }
}

/// Push the rounding error of normalised weights into the first influence
fn renormalise_weights(out: &mut [u8], format: MeshBufferFormat) {
    match format {
        MeshBufferFormat::NUInt8 => {
            let sum = out.iter().fold(0u8, |acc, w| acc.wrapping_add(*w));
            out[0] = out[0].wrapping_add(u8::MAX.wrapping_sub(sum));
        }
        MeshBufferFormat::NUInt16 => {
            let sum = out
                .chunks_exact(2)
                .fold(0u16, |acc, w| acc.wrapping_add(u16::from_ne_bytes([w[0], w[1]])));
            let first = u16::from_ne_bytes([out[0], out[1]]).wrapping_add(u16::MAX.wrapping_sub(sum));
            out[..2].copy_from_slice(&first.to_ne_bytes());
        }
        _ => {}
    }
}

fn convert_channel(
    source: &MeshBufferSet,
    reader: ChannelReader<'_>,
    target: &mut [u8],
    element_size: usize,
    channel: &MeshBufferChannel,
    count: usize,
) {
    let out_size = channel.format.size();
    let in_size = reader.format().size();
    let in_components = reader.components();
    let same = reader.format() == channel.format && in_components == channel.component_count as usize;
    let packed = channel.format.is_packed_dir_with_sign();
    let frame = if packed {
        tangent_frame(source, channel.semantic_index)
    } else {
        None
    };

    for e in 0..count {
        let out = &mut target[channel_range(e, element_size, channel)];
        let src = reader.bytes(e);
        if same {
            out.copy_from_slice(src);
        } else if packed {
            debug_assert_eq!(channel.component_count, 4, "Packed directions with sign have 4 components");
            for k in 0..in_components.min(3) {
                convert_component(&mut out[k * out_size..], channel.format, &src[k * in_size..], reader.format());
            }
            if out.len() > 3 {
                out[3] = frame
                    .as_ref()
                    .map(|f| tangent_sign(f, e, channel.format))
                    .unwrap_or(0);
            }
        } else {
            for k in 0..channel.component_count as usize {
                let dst = &mut out[k * out_size..(k + 1) * out_size];
                if k < in_components {
                    convert_component(dst, channel.format, &src[k * in_size..], reader.format());
                } else {
                    dst.fill(0);
                }
            }
            if channel.semantic == MeshBufferSemantic::BoneWeights {
                renormalise_weights(out, channel.format);
            }
        }
    }
}

/// Fill one result buffer from whatever the source set provides
///
/// `special_semantics` enables id synthesis for vertex index and layout
/// block channels, which only makes sense for vertex buffers.
fn format_buffer(
    source: &MeshBufferSet,
    result: &mut MeshBufferSet,
    buffer: usize,
    special_semantics: bool,
    prefix: u32,
) {
    let count = source.element_count();
    let element_size = result.element_size(buffer);
    if count == 0 || element_size == 0 || result.buffer_channel_count(buffer) == 0 {
        return;
    }
    debug_assert!(result.element_count() >= count);

    let channels = result.buffer(buffer).channels().to_vec();
    for channel in &channels {
        let found = source.find_channel(channel.semantic, channel.semantic_index);
        let is_id = special_semantics
            && matches!(
                channel.semantic,
                MeshBufferSemantic::VertexIndex | MeshBufferSemantic::LayoutBlock
            );
        let target = result.buffer_data_mut(buffer);
        match found {
            Some((b, c)) if is_id => {
                write_ids(target, element_size, channel, Some(ChannelReader::at(source, b, c)), count, prefix)
            }
            None if is_id && channel.semantic == MeshBufferSemantic::VertexIndex => {
                write_ids(target, element_size, channel, None, count, prefix)
            }
            Some((b, c)) => convert_channel(
                source,
                ChannelReader::at(source, b, c),
                target,
                element_size,
                channel,
                count,
            ),
            None => fill_missing(target, element_size, channel, count),
        }
    }
}

/// Reformat `source` into the buffer layouts already present in `result`
pub fn format_buffer_set(
    source: &MeshBufferSet,
    result: &mut MeshBufferSet,
    keep_system_buffers: bool,
    ignore_missing_channels: bool,
    is_vertex_buffer: bool,
    prefix: u32,
) {
    if ignore_missing_channels {
        for b in 0..result.buffer_count() {
            let mut kept: Vec<MeshBufferChannel> = Vec::new();
            let mut offset = 0usize;
            for channel in result.buffer(b).channels() {
                if source.find_channel(channel.semantic, channel.semantic_index).is_some() {
                    kept.push(MeshBufferChannel {
                        offset: offset as u16,
                        ..*channel
                    });
                    offset += channel.size();
                }
            }
            result.set_buffer(b, offset, &kept);
        }
    }

    result.set_element_count(source.element_count(), BufferInit::Uninitialized);
    for b in 0..result.buffer_count() {
        format_buffer(source, result, b, is_vertex_buffer, prefix);
    }

    if keep_system_buffers {
        for b in 0..source.buffer_count() {
            if source.buffer_channel_count(b) != 1 {
                continue;
            }
            let channel = *source.channel(b, 0);
            let is_system = channel.semantic == MeshBufferSemantic::LayoutBlock
                || (is_vertex_buffer && channel.semantic == MeshBufferSemantic::VertexIndex);
            if !is_system {
                continue;
            }
            match result.find_channel(channel.semantic, channel.semantic_index) {
                None => result.add_buffer(source, b),
                Some((existing, _)) if result.buffer_channel_count(existing) == 1 => {
                    result.replace_buffer(existing, source, b)
                }
                Some((existing, _)) => {
                    log::warn!(
                        "System channel {:?} shares buffer {existing} with other channels, keeping the formatted copy",
                        channel.semantic
                    );
                }
            }
        }
    }
}

fn widen_bone_indices(source: &MeshBufferSet, result: &mut MeshBufferSet) {
    use MeshBufferFormat as F;
    for b in 0..source.buffer_count() {
        for c in 0..source.buffer_channel_count(b) {
            let channel = *source.channel(b, c);
            if channel.semantic != MeshBufferSemantic::BoneIndices {
                continue;
            }
            let Some((rb, rc)) = result.find_channel(MeshBufferSemantic::BoneIndices, channel.semantic_index) else {
                continue;
            };

            let reader = ChannelReader::at(source, b, c);
            let max_bone = (0..reader.len())
                .flat_map(|v| reader.as_int_vec(v))
                .max()
                .unwrap_or(0);

            let format = result.channel(rb, rc).format;
            let widened = match format {
                F::UInt8 | F::UInt16 if max_bone > 0xffff => Some(F::UInt32),
                F::Int8 | F::Int16 if max_bone > 0x7fff => Some(F::UInt32),
                F::UInt8 if max_bone > 0xff => Some(F::UInt16),
                F::Int8 if max_bone > 0x7f => Some(F::Int16),
                _ => None,
            };
            if let Some(widened) = widened {
                log::debug!("Widening bone indices from {format:?} to {widened:?} for bone {max_bone}");
                result.set_channel_format(rb, rc, widened);
            }
        }
    }
}

/// Build a mesh with the buffer formats of `format` and the content of `source`
///
/// Everything but the formatted buffers is taken from `source`.
pub fn mesh_format(
    source: &Mesh,
    format: &Mesh,
    keep_system_buffers: bool,
    format_vertices: bool,
    format_indices: bool,
    ignore_missing_channels: bool,
) -> Mesh {
    let mut result = match source.memory_counter() {
        Some(counter) => Mesh::with_memory_counter(counter.clone()),
        None => Mesh::new(),
    };
    result.copy_from(format, MeshCopyFlags::ALL_FLAGS);
    let prefix = source.mesh_id_prefix();

    if format_vertices {
        widen_bone_indices(source.vertex_buffers(), result.vertex_buffers_mut());
        format_buffer_set(
            source.vertex_buffers(),
            result.vertex_buffers_mut(),
            keep_system_buffers,
            ignore_missing_channels,
            true,
            prefix,
        );
    }
    if format_indices {
        format_buffer_set(
            source.index_buffers(),
            result.index_buffers_mut(),
            keep_system_buffers,
            ignore_missing_channels,
            false,
            0,
        );
    }

    let mut rest = MeshCopyFlags::ALL_FLAGS;
    if format_vertices {
        rest.remove(MeshCopyFlags::WITH_VERTEX_BUFFERS);
    }
    if format_indices {
        rest.remove(MeshCopyFlags::WITH_INDEX_BUFFERS);
    }
    result.copy_from(source, rest);
    if result.vertex_buffers().find_channel(MeshBufferSemantic::VertexIndex, 0).is_some_and(|(b, c)| {
        result.vertex_buffers().channel(b, c).format == MeshBufferFormat::UInt64
    }) {
        result.set_mesh_id_prefix(0);
    }

    result.reset_static_format_flags();
    result.ensure_surface_data();
    result
}

/// Reduce the skinning channels to the largest number of influences in use
pub fn mesh_optimize_buffers(mesh: &mut Mesh) {
    const SEMANTIC_INDEX: i32 = 0;
    let vertices = mesh.vertex_buffers();
    let Some(weights) = ChannelReader::new(vertices, MeshBufferSemantic::BoneWeights, SEMANTIC_INDEX) else {
        return;
    };

    let buffer_influences = weights.components();
    let real_influences = (0..weights.len())
        .map(|v| {
            (0..buffer_influences)
                .filter(|k| weights.component(v, *k).as_f64() > 0.0)
                .count()
        })
        .max()
        .unwrap_or(0)
        .max(1);
    if real_influences >= buffer_influences {
        return;
    }
    log::debug!("Reducing skin influences from {buffer_influences} to {real_influences}");

    let mut optimised = vertices.clone();
    for b in 0..optimised.buffer_count() {
        let mut channels = optimised.buffer(b).channels().to_vec();
        let mut changed = false;
        for channel in &mut channels {
            if channel.semantic_index == SEMANTIC_INDEX
                && matches!(
                    channel.semantic,
                    MeshBufferSemantic::BoneWeights | MeshBufferSemantic::BoneIndices
                )
            {
                channel.component_count = real_influences as u16;
                changed = true;
            }
        }
        if !changed {
            continue;
        }
        let mut offset = 0usize;
        for channel in &mut channels {
            channel.offset = offset as u16;
            offset += channel.size();
        }
        optimised.set_buffer(b, offset, &channels);
    }

    let prefix = mesh.mesh_id_prefix();
    format_buffer_set(mesh.vertex_buffers(), &mut optimised, true, false, true, prefix);
    *mesh.vertex_buffers_mut() = optimised;
}
