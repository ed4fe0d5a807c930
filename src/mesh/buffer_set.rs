//! Interleaved element buffers with per-channel layout descriptions
//!
//! A `MeshBufferSet` holds one or more buffers that all share the same
//! element count. Each buffer stores `element_count * element_size` bytes and
//! a list of channels describing where each attribute lives inside an element.

use serde::{Deserialize, Serialize};

use crate::memory::{MemoryCounter, TrackedBytes};
use crate::mesh::format::{MeshBufferFormat, MeshBufferSemantic};
use crate::serialisation::Versioned;

/// Location and encoding of one attribute inside a buffer element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshBufferChannel {
    pub semantic: MeshBufferSemantic,
    pub semantic_index: i32,
    pub format: MeshBufferFormat,
    pub component_count: u16,
    /// Bytes from the start of the element
    pub offset: u16,
}

impl MeshBufferChannel {
    pub fn new(
        semantic: MeshBufferSemantic,
        semantic_index: i32,
        format: MeshBufferFormat,
        component_count: u16,
        offset: u16,
    ) -> Self {
        Self {
            semantic,
            semantic_index,
            format,
            component_count,
            offset,
        }
    }

    /// Bytes used by the channel in each element
    pub fn size(&self) -> usize {
        self.format.size() * self.component_count as usize
    }

    /// Same data description ignoring the offset
    pub fn same_encoding(&self, other: &MeshBufferChannel) -> bool {
        self.semantic == other.semantic
            && self.semantic_index == other.semantic_index
            && self.format == other.format
            && self.component_count == other.component_count
    }
}

/// How new bytes are initialised when a buffer grows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferInit {
    /// Contents are unspecified and will be overwritten by the caller
    Uninitialized,
    Zeroed,
}

/// One interleaved buffer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshBuffer {
    channels: Vec<MeshBufferChannel>,
    element_size: u32,
    data: TrackedBytes,
}

impl MeshBuffer {
    pub fn channels(&self) -> &[MeshBufferChannel] {
        &self.channels
    }

    pub fn element_size(&self) -> usize {
        self.element_size as usize
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Same channels and element size
    pub fn has_same_format(&self, other: &MeshBuffer) -> bool {
        self.element_size == other.element_size && self.channels == other.channels
    }

    /// Buffer holding a single channel of the given semantic
    pub fn is_single_channel(&self, semantic: MeshBufferSemantic) -> bool {
        self.channels.len() == 1 && self.channels[0].semantic == semantic
    }

    fn check_layout(&self) {
        let mut used: Vec<(usize, usize)> = self
            .channels
            .iter()
            .map(|c| (c.offset as usize, c.offset as usize + c.size()))
            .collect();
        used.sort_unstable();
        for window in used.windows(2) {
            debug_assert!(window[0].1 <= window[1].0, "Overlapping channels in mesh buffer");
        }
        if let Some(last) = used.last() {
            debug_assert!(last.1 <= self.element_size as usize, "Channel outside of buffer element");
        }
    }
}

/// Set of buffers sharing one element count
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshBufferSet {
    element_count: u32,
    buffers: Vec<MeshBuffer>,
    #[serde(skip)]
    counter: Option<MemoryCounter>,
}

impl PartialEq for MeshBufferSet {
    fn eq(&self, other: &Self) -> bool {
        self.element_count == other.element_count && self.buffers == other.buffers
    }
}

impl Versioned for MeshBufferSet {
    const VERSION: u32 = 2;
    const KIND: [u8; 4] = *b"MBUF";
}

impl MeshBufferSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty set whose storage is accounted to `counter`
    pub fn with_memory_counter(counter: MemoryCounter) -> Self {
        Self {
            counter: Some(counter),
            ..Self::default()
        }
    }

    /// Re-account every buffer to a different counter
    pub fn set_memory_counter(&mut self, counter: Option<MemoryCounter>) {
        for buffer in &mut self.buffers {
            buffer.data.set_counter(counter.clone());
        }
        self.counter = counter;
    }

    pub fn memory_counter(&self) -> Option<&MemoryCounter> {
        self.counter.as_ref()
    }

    pub fn element_count(&self) -> usize {
        self.element_count as usize
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffers(&self) -> &[MeshBuffer] {
        &self.buffers
    }

    pub fn buffer(&self, buffer: usize) -> &MeshBuffer {
        &self.buffers[buffer]
    }

    pub fn set_buffer_count(&mut self, count: usize) {
        let counter = self.counter.clone();
        self.buffers.resize_with(count, || MeshBuffer {
            data: TrackedBytes::with_counter(counter.clone()),
            ..MeshBuffer::default()
        });
    }

    /// Define the channel layout of a buffer and size its storage
    ///
    /// An empty channel list leaves the buffer with no channels and a zero
    /// element size.
    pub fn set_buffer(&mut self, buffer: usize, element_size: usize, channels: &[MeshBufferChannel]) {
        assert!(buffer < self.buffers.len(), "Buffer index {buffer} out of range");
        let element_count = self.element_count as usize;
        let target = &mut self.buffers[buffer];
        if channels.is_empty() {
            target.channels.clear();
            target.element_size = 0;
            target.data.clear();
            return;
        }
        target.channels = channels.to_vec();
        target.element_size = element_size as u32;
        target.check_layout();
        target.data.resize(element_count * element_size, 0);
    }

    /// Resize all buffers to `count` elements, keeping existing bytes
    ///
    /// Grown storage always reads as zero; `BufferInit::Uninitialized` only
    /// marks that the caller overwrites every new element.
    pub fn set_element_count(&mut self, count: usize, init: BufferInit) {
        if init == BufferInit::Uninitialized {
            log::trace!("Resizing mesh buffers to {count} elements without clearing");
        }
        self.element_count = count as u32;
        for buffer in &mut self.buffers {
            let element_size = buffer.element_size as usize;
            buffer.data.resize(count * element_size, 0);
        }
    }

    pub fn buffer_channel_count(&self, buffer: usize) -> usize {
        self.buffers[buffer].channels.len()
    }

    pub fn element_size(&self, buffer: usize) -> usize {
        self.buffers[buffer].element_size as usize
    }

    /// Channel description; out of range indices are a caller bug
    pub fn channel(&self, buffer: usize, channel: usize) -> &MeshBufferChannel {
        let channels = &self.buffers[buffer].channels;
        assert!(
            channel < channels.len(),
            "Channel {channel} out of range for buffer {buffer} with {} channels",
            channels.len()
        );
        &channels[channel]
    }

    pub fn buffer_data(&self, buffer: usize) -> &[u8] {
        &self.buffers[buffer].data
    }

    pub fn buffer_data_mut(&mut self, buffer: usize) -> &mut [u8] {
        &mut self.buffers[buffer].data
    }

    /// Locate a channel by semantic, as `(buffer, channel)`
    pub fn find_channel(
        &self,
        semantic: MeshBufferSemantic,
        semantic_index: i32,
    ) -> Option<(usize, usize)> {
        self.buffers.iter().enumerate().find_map(|(b, buffer)| {
            buffer
                .channels
                .iter()
                .position(|c| c.semantic == semantic && c.semantic_index == semantic_index)
                .map(|c| (b, c))
        })
    }

    /// Locate the first channel of a semantic regardless of its index
    pub fn find_any_channel(&self, semantic: MeshBufferSemantic) -> Option<(usize, usize)> {
        self.buffers.iter().enumerate().find_map(|(b, buffer)| {
            buffer
                .channels
                .iter()
                .position(|c| c.semantic == semantic)
                .map(|c| (b, c))
        })
    }

    pub fn has_any_vertex_skin_weights(&self) -> bool {
        self.find_any_channel(MeshBufferSemantic::BoneWeights).is_some()
    }

    /// Append a copy of another set's buffer; element counts must match
    pub fn add_buffer(&mut self, source: &MeshBufferSet, buffer: usize) {
        assert_eq!(
            source.element_count, self.element_count,
            "Cannot add a buffer with a different element count"
        );
        let mut copy = source.buffers[buffer].clone();
        copy.data.set_counter(self.counter.clone());
        self.buffers.push(copy);
    }

    /// Replace one buffer with a copy of another set's buffer
    pub fn replace_buffer(&mut self, index: usize, source: &MeshBufferSet, buffer: usize) {
        assert_eq!(source.element_count, self.element_count);
        let mut copy = source.buffers[buffer].clone();
        copy.data.set_counter(self.counter.clone());
        self.buffers[index] = copy;
    }

    pub fn remove_buffer(&mut self, buffer: usize) {
        self.buffers.remove(buffer);
    }

    /// Copy the raw bytes of one element over another, in every buffer
    pub fn copy_element(&mut self, from: usize, to: usize) {
        assert!(from < self.element_count as usize && to < self.element_count as usize);
        if from == to {
            return;
        }
        for buffer in &mut self.buffers {
            let size = buffer.element_size as usize;
            buffer.data.copy_within(from * size..(from + 1) * size, to * size);
        }
    }

    /// Pack the channels of a buffer densely in channel order
    pub fn update_offsets(&mut self, buffer: usize) {
        let element_count = self.element_count as usize;
        let target = &mut self.buffers[buffer];
        let mut offset = 0usize;
        for channel in &mut target.channels {
            channel.offset = offset as u16;
            offset += channel.size();
        }
        target.element_size = offset as u32;
        target.data.resize(element_count * offset, 0);
    }

    /// Change the storage format of one channel and repack its buffer
    pub fn set_channel_format(&mut self, buffer: usize, channel: usize, format: MeshBufferFormat) {
        self.buffers[buffer].channels[channel].format = format;
        self.update_offsets(buffer);
    }

    /// Same buffer count and identical layouts for every buffer
    pub fn has_same_format(&self, other: &MeshBufferSet) -> bool {
        self.buffers.len() == other.buffers.len()
            && self
                .buffers
                .iter()
                .zip(&other.buffers)
                .all(|(a, b)| a.has_same_format(b))
    }

    /// Bytes of element storage held by the set
    pub fn data_size(&self) -> usize {
        self.buffers.iter().map(|b| b.data.len()).sum()
    }

    fn is_ignored_buffer(buffer: &MeshBuffer, compare_layout_blocks: bool) -> bool {
        buffer.is_single_channel(MeshBufferSemantic::VertexIndex)
            || (!compare_layout_blocks && buffer.is_single_channel(MeshBufferSemantic::LayoutBlock))
    }

    /// Content equality that skips system id buffers and element padding
    pub fn is_similar_robust(&self, other: &MeshBufferSet, compare_layout_blocks: bool) -> bool {
        if self.element_count != other.element_count {
            return false;
        }
        let ours: Vec<&MeshBuffer> = self
            .buffers
            .iter()
            .filter(|b| !Self::is_ignored_buffer(b, compare_layout_blocks))
            .collect();
        let theirs: Vec<&MeshBuffer> = other
            .buffers
            .iter()
            .filter(|b| !Self::is_ignored_buffer(b, compare_layout_blocks))
            .collect();
        if ours.len() != theirs.len() {
            return false;
        }

        for (a, b) in ours.iter().zip(&theirs) {
            if a.channels.len() != b.channels.len() {
                return false;
            }
            for (ca, cb) in a.channels.iter().zip(&b.channels) {
                if !ca.same_encoding(cb) {
                    return false;
                }
                let size = ca.size();
                for e in 0..self.element_count as usize {
                    let sa = e * a.element_size as usize + ca.offset as usize;
                    let sb = e * b.element_size as usize + cb.offset as usize;
                    if a.data[sa..sa + size] != b.data[sb..sb + size] {
                        return false;
                    }
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::format::{MeshBufferFormat as F, MeshBufferSemantic as S};

    fn position_channels() -> Vec<MeshBufferChannel> {
        vec![
            MeshBufferChannel::new(S::Position, 0, F::Float32, 3, 0),
            MeshBufferChannel::new(S::TexCoords, 1, F::Float16, 2, 12),
            MeshBufferChannel::new(S::Colour, 0, F::NUInt8, 4, 16),
        ]
    }

    #[test]
    fn test_set_buffer_roundtrip_channels() {
        let mut set = MeshBufferSet::new();
        set.set_buffer_count(1);
        set.set_element_count(3, BufferInit::Zeroed);
        let channels = position_channels();
        set.set_buffer(0, 20, &channels);

        assert_eq!(set.buffer_channel_count(0), channels.len());
        for (i, expected) in channels.iter().enumerate() {
            assert_eq!(set.channel(0, i), expected);
        }
        assert_eq!(set.buffer_data(0).len(), 60);
        assert_eq!(set.find_channel(S::TexCoords, 1), Some((0, 1)));
        assert_eq!(set.find_channel(S::TexCoords, 0), None);
    }

    #[test]
    fn test_empty_channel_list_clears_buffer() {
        let mut set = MeshBufferSet::new();
        set.set_buffer_count(1);
        set.set_element_count(4, BufferInit::Zeroed);
        set.set_buffer(0, 20, &position_channels());
        set.set_buffer(0, 20, &[]);
        assert_eq!(set.buffer_channel_count(0), 0);
        assert_eq!(set.element_size(0), 0);
        assert!(set.buffer_data(0).is_empty());
    }

    #[test]
    #[should_panic]
    fn test_channel_out_of_range_panics() {
        let mut set = MeshBufferSet::new();
        set.set_buffer_count(1);
        set.set_buffer(0, 20, &position_channels());
        let _ = set.channel(0, 3);
    }

    #[test]
    fn test_element_count_preserves_bytes() {
        let mut set = MeshBufferSet::new();
        set.set_buffer_count(1);
        set.set_element_count(2, BufferInit::Zeroed);
        set.set_buffer(0, 4, &[MeshBufferChannel::new(S::Other, 0, F::UInt32, 1, 0)]);
        set.buffer_data_mut(0).copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        set.set_element_count(3, BufferInit::Zeroed);
        assert_eq!(set.buffer_data(0), &[1, 2, 3, 4, 5, 6, 7, 8, 0, 0, 0, 0]);
        set.set_element_count(1, BufferInit::Zeroed);
        assert_eq!(set.buffer_data(0), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_copy_element() {
        let mut set = MeshBufferSet::new();
        set.set_buffer_count(1);
        set.set_element_count(3, BufferInit::Zeroed);
        set.set_buffer(0, 2, &[MeshBufferChannel::new(S::Other, 0, F::UInt16, 1, 0)]);
        set.buffer_data_mut(0).copy_from_slice(&[1, 1, 2, 2, 3, 3]);
        set.copy_element(2, 0);
        assert_eq!(set.buffer_data(0), &[3, 3, 2, 2, 3, 3]);
    }

    #[test]
    fn test_update_offsets_packs_channels() {
        let mut set = MeshBufferSet::new();
        set.set_buffer_count(1);
        set.set_element_count(1, BufferInit::Zeroed);
        set.set_buffer(
            0,
            32,
            &[
                MeshBufferChannel::new(S::Position, 0, F::Float32, 3, 4),
                MeshBufferChannel::new(S::BoneIndices, 0, F::UInt8, 4, 20),
            ],
        );
        set.update_offsets(0);
        assert_eq!(set.channel(0, 0).offset, 0);
        assert_eq!(set.channel(0, 1).offset, 12);
        assert_eq!(set.element_size(0), 16);
        assert_eq!(set.buffer_data(0).len(), 16);
    }

    #[test]
    fn test_similar_robust_ignores_padding_and_ids() {
        let mut a = MeshBufferSet::new();
        a.set_buffer_count(2);
        a.set_element_count(2, BufferInit::Zeroed);
        a.set_buffer(0, 4, &[MeshBufferChannel::new(S::Other, 0, F::UInt16, 1, 0)]);
        a.set_buffer(1, 4, &[MeshBufferChannel::new(S::VertexIndex, 0, F::UInt32, 1, 0)]);
        a.buffer_data_mut(0).copy_from_slice(&[1, 0, 9, 9, 2, 0, 9, 9]);
        a.buffer_data_mut(1).copy_from_slice(&[0, 0, 0, 0, 1, 0, 0, 0]);

        let mut b = MeshBufferSet::new();
        b.set_buffer_count(1);
        b.set_element_count(2, BufferInit::Zeroed);
        b.set_buffer(0, 4, &[MeshBufferChannel::new(S::Other, 0, F::UInt16, 1, 0)]);
        b.buffer_data_mut(0).copy_from_slice(&[1, 0, 0, 0, 2, 0, 0, 0]);

        assert!(a.is_similar_robust(&b, true));
        b.buffer_data_mut(0)[4] = 3;
        assert!(!a.is_similar_robust(&b, true));
    }

    #[test]
    fn test_memory_counter_tracks_buffers() {
        let counter = MemoryCounter::new();
        let mut set = MeshBufferSet::with_memory_counter(counter.clone());
        set.set_buffer_count(1);
        set.set_element_count(10, BufferInit::Zeroed);
        set.set_buffer(0, 8, &[MeshBufferChannel::new(S::Other, 0, F::UInt64, 1, 0)]);
        assert_eq!(counter.allocated(), 80);
        drop(set);
        assert_eq!(counter.allocated(), 0);
    }
}
