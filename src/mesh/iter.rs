//! Typed access to individual channels of a buffer set

use glam::Vec3;

use crate::mesh::buffer_set::{MeshBufferChannel, MeshBufferSet};
use crate::mesh::format::{read_component, write_component, Component, MeshBufferFormat, MeshBufferSemantic};

/// Read-only view over one channel
#[derive(Clone, Copy)]
pub struct ChannelReader<'a> {
    data: &'a [u8],
    element_size: usize,
    element_count: usize,
    channel: MeshBufferChannel,
}

impl<'a> ChannelReader<'a> {
    /// View of the channel with this semantic, if present
    pub fn new(set: &'a MeshBufferSet, semantic: MeshBufferSemantic, semantic_index: i32) -> Option<Self> {
        set.find_channel(semantic, semantic_index)
            .map(|(buffer, channel)| Self::at(set, buffer, channel))
    }

    pub fn at(set: &'a MeshBufferSet, buffer: usize, channel: usize) -> Self {
        Self {
            data: set.buffer_data(buffer),
            element_size: set.element_size(buffer),
            element_count: set.element_count(),
            channel: *set.channel(buffer, channel),
        }
    }

    pub fn len(&self) -> usize {
        self.element_count
    }

    pub fn is_empty(&self) -> bool {
        self.element_count == 0
    }

    pub fn channel(&self) -> &MeshBufferChannel {
        &self.channel
    }

    pub fn format(&self) -> MeshBufferFormat {
        self.channel.format
    }

    pub fn components(&self) -> usize {
        self.channel.component_count as usize
    }

    /// Raw bytes of the channel in one element
    pub fn bytes(&self, element: usize) -> &'a [u8] {
        let start = element * self.element_size + self.channel.offset as usize;
        &self.data[start..start + self.channel.size()]
    }

    pub fn component(&self, element: usize, component: usize) -> Component {
        assert!(component < self.components(), "Component {component} out of range");
        let size = self.channel.format.size();
        read_component(&self.bytes(element)[component * size..], self.channel.format)
    }

    /// Up to four components as floats, missing ones read as zero
    pub fn as_vec4(&self, element: usize) -> [f32; 4] {
        let mut out = [0.0f32; 4];
        for (c, value) in out.iter_mut().enumerate().take(self.components().min(4)) {
            *value = self.component(element, c).as_f64() as f32;
        }
        out
    }

    pub fn as_vec3(&self, element: usize) -> Vec3 {
        let v = self.as_vec4(element);
        Vec3::new(v[0], v[1], v[2])
    }

    pub fn as_u32(&self, element: usize) -> u32 {
        self.component(element, 0).as_i128() as u32
    }

    pub fn as_u64(&self, element: usize) -> u64 {
        self.component(element, 0).as_i128() as u64
    }

    /// All components as integers
    pub fn as_int_vec(&self, element: usize) -> Vec<i64> {
        (0..self.components())
            .map(|c| self.component(element, c).as_i128() as i64)
            .collect()
    }
}

/// Mutable view over one channel
pub struct ChannelWriter<'a> {
    data: &'a mut [u8],
    element_size: usize,
    channel: MeshBufferChannel,
}

impl<'a> ChannelWriter<'a> {
    pub fn new(set: &'a mut MeshBufferSet, semantic: MeshBufferSemantic, semantic_index: i32) -> Option<Self> {
        let (buffer, channel) = set.find_channel(semantic, semantic_index)?;
        Some(Self::at(set, buffer, channel))
    }

    pub fn at(set: &'a mut MeshBufferSet, buffer: usize, channel: usize) -> Self {
        let channel = *set.channel(buffer, channel);
        let element_size = set.element_size(buffer);
        Self {
            data: set.buffer_data_mut(buffer),
            element_size,
            channel,
        }
    }

    pub fn set_component(&mut self, element: usize, component: usize, value: Component) {
        assert!(component < self.channel.component_count as usize);
        let size = self.channel.format.size();
        let start = element * self.element_size + self.channel.offset as usize + component * size;
        write_component(&mut self.data[start..], self.channel.format, value);
    }

    pub fn set_from_vec3(&mut self, element: usize, value: Vec3) {
        let count = (self.channel.component_count as usize).min(3);
        for c in 0..count {
            self.set_component(element, c, Component::Float(value[c] as f64));
        }
    }

    pub fn set_from_u32(&mut self, element: usize, value: u32) {
        self.set_component(element, 0, Component::Integer(value as i128));
    }

    pub fn set_from_u64(&mut self, element: usize, value: u64) {
        self.set_component(element, 0, Component::Integer(value as i128));
    }
}

/// Iterator over the full 64-bit id of every vertex
pub enum VertexIdIter<'a> {
    Implicit { prefix: u64, index: usize, count: usize },
    Relative { prefix: u64, index: usize, reader: ChannelReader<'a> },
    Explicit { index: usize, reader: ChannelReader<'a> },
}

impl<'a> VertexIdIter<'a> {
    pub fn new(vertices: &'a MeshBufferSet, prefix: u32) -> Self {
        let prefix = (prefix as u64) << 32;
        match ChannelReader::new(vertices, MeshBufferSemantic::VertexIndex, 0) {
            None => VertexIdIter::Implicit {
                prefix,
                index: 0,
                count: vertices.element_count(),
            },
            Some(reader) if reader.format() == MeshBufferFormat::UInt64 => {
                VertexIdIter::Explicit { index: 0, reader }
            }
            Some(reader) => {
                debug_assert_eq!(reader.format(), MeshBufferFormat::UInt32);
                VertexIdIter::Relative { prefix, index: 0, reader }
            }
        }
    }
}

impl Iterator for VertexIdIter<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        match self {
            VertexIdIter::Implicit { prefix, index, count } => {
                if *index >= *count {
                    return None;
                }
                let id = *prefix | *index as u64;
                *index += 1;
                Some(id)
            }
            VertexIdIter::Relative { prefix, index, reader } => {
                if *index >= reader.len() {
                    return None;
                }
                let id = *prefix | reader.as_u32(*index) as u64;
                *index += 1;
                Some(id)
            }
            VertexIdIter::Explicit { index, reader } => {
                if *index >= reader.len() {
                    return None;
                }
                let id = reader.as_u64(*index);
                *index += 1;
                Some(id)
            }
        }
    }
}
