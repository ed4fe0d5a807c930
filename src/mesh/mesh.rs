//! Mesh resource
//!
//! A mesh aggregates vertex and index buffers with the skinning, layout and
//! metadata a procedural operation may need. Skeletons, physics bodies and
//! layouts are shared through `Arc` and are only ever replaced, never edited.

use std::fmt::Write as _;
use std::sync::Arc;

use bitflags::bitflags;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::layout::Layout;
use crate::memory::MemoryCounter;
use crate::mesh::buffer_set::{BufferInit, MeshBufferChannel, MeshBufferSet};
use crate::mesh::format::{MeshBufferFormat, MeshBufferSemantic};
use crate::mesh::iter::{ChannelReader, ChannelWriter, VertexIdIter};
use crate::mesh::skeleton::{BoneName, PhysicsBody, Skeleton};
use crate::serialisation::Versioned;

bitflags! {
    /// Parts of a mesh duplicated by `clone_with_flags` and `copy_from`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MeshCopyFlags: u32 {
        const WITH_SKELETAL_MESH = 1 << 1;
        const WITH_SURFACES = 1 << 2;
        const WITH_SKELETON = 1 << 3;
        const WITH_PHYSICS_BODY = 1 << 4;
        const WITH_FACE_GROUPS = 1 << 5;
        const WITH_TAGS = 1 << 6;
        const WITH_VERTEX_BUFFERS = 1 << 7;
        const WITH_INDEX_BUFFERS = 1 << 8;
        const WITH_ADDITIONAL_BUFFERS = 1 << 10;
        const WITH_LAYOUTS = 1 << 11;
        const WITH_POSES = 1 << 12;
        const WITH_BONE_MAP = 1 << 13;
        const WITH_SKELETON_IDS = 1 << 14;
        const WITH_ADDITIONAL_PHYSICS = 1 << 15;
        const WITH_STREAMED_RESOURCES = 1 << 16;
        const ALL_FLAGS = 0xffff_ffff;
    }
}

bitflags! {
    /// Static properties of a mesh
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MeshFlags: u32 {
        /// Buffers match the projection vertex format
        const PROJECT_FORMAT = 1 << 0;
        /// Buffers match the projection format with a layout block buffer
        const PROJECT_WRAPPING_FORMAT = 1 << 1;
        /// The mesh only stands for an external resource
        const IS_RESOURCE_REFERENCE = 1 << 2;
        const IS_RESOURCE_FORCE_LOAD = 1 << 3;
    }
}

bitflags! {
    /// Why a bone pose is present in a mesh
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct BoneUsageFlags: u32 {
        const ROOT = 1 << 1;
        const SKINNING = 1 << 2;
        const SKINNING_PARENT = 1 << 3;
        const PHYSICS = 1 << 4;
        const PHYSICS_PARENT = 1 << 5;
        const DEFORM = 1 << 6;
        const DEFORM_PARENT = 1 << 7;
        const RESHAPED = 1 << 8;
    }
}

/// Role of an additional buffer set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeshBufferType {
    None,
    SkeletonDeformBinding,
    PhysicsBodyDeformBinding,
    PhysicsBodyDeformSelection,
    PhysicsBodyDeformOffsets,
    MeshLaplacianData,
    MeshLaplacianOffsets,
    UniqueVertexMap,
}

/// Contiguous vertex and index range of a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SurfaceSubMesh {
    pub vertex_begin: u32,
    pub vertex_end: u32,
    pub index_begin: u32,
    pub index_end: u32,
    pub external_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MeshSurface {
    pub sub_meshes: Vec<SurfaceSubMesh>,
    pub bone_map_index: u32,
    pub bone_map_count: u32,
    pub id: u32,
}

/// Ranges covered by a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceRange {
    pub vertex_begin: u32,
    pub vertex_end: u32,
    pub index_begin: u32,
    pub index_end: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform3 {
    pub rotation: Quat,
    pub translation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform3 {
    fn default() -> Self {
        Self {
            rotation: Quat::IDENTITY,
            translation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BonePose {
    pub bone: BoneName,
    pub usage: BoneUsageFlags,
    pub transform: Transform3,
}

/// Geometry resource
///
/// Field order is the archive order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mesh {
    index_buffers: MeshBufferSet,
    vertex_buffers: MeshBufferSet,
    additional_buffers: Vec<(MeshBufferType, MeshBufferSet)>,
    layouts: Vec<Arc<Layout>>,
    skeleton_ids: Vec<u32>,
    skeleton: Option<Arc<Skeleton>>,
    physics_body: Option<Arc<PhysicsBody>>,
    flags: MeshFlags,
    surfaces: Vec<MeshSurface>,
    tags: Vec<String>,
    streamed_resources: Vec<u64>,
    bone_poses: Vec<BonePose>,
    bone_map: Vec<BoneName>,
    additional_physics_bodies: Vec<Arc<PhysicsBody>>,
    mesh_id_prefix: u32,
    reference_id: u32,
    #[serde(skip)]
    internal_id: u32,
    #[serde(skip)]
    counter: Option<MemoryCounter>,
}

impl Default for Mesh {
    fn default() -> Self {
        Self {
            index_buffers: MeshBufferSet::new(),
            vertex_buffers: MeshBufferSet::new(),
            additional_buffers: Vec::new(),
            layouts: Vec::new(),
            skeleton_ids: Vec::new(),
            skeleton: None,
            physics_body: None,
            flags: MeshFlags::empty(),
            surfaces: Vec::new(),
            tags: Vec::new(),
            streamed_resources: Vec::new(),
            bone_poses: Vec::new(),
            bone_map: Vec::new(),
            additional_physics_bodies: Vec::new(),
            mesh_id_prefix: 0,
            reference_id: 0,
            internal_id: 0,
            counter: None,
        }
    }
}

impl PartialEq for Mesh {
    fn eq(&self, other: &Self) -> bool {
        self.index_buffers == other.index_buffers
            && self.vertex_buffers == other.vertex_buffers
            && self.additional_buffers == other.additional_buffers
            && self.layouts == other.layouts
            && self.skeleton_ids == other.skeleton_ids
            && self.skeleton == other.skeleton
            && self.physics_body == other.physics_body
            && self.flags == other.flags
            && self.surfaces == other.surfaces
            && self.tags == other.tags
            && self.streamed_resources == other.streamed_resources
            && self.bone_poses == other.bone_poses
            && self.bone_map == other.bone_map
            && self.additional_physics_bodies == other.additional_physics_bodies
            && self.mesh_id_prefix == other.mesh_id_prefix
            && self.reference_id == other.reference_id
    }
}

impl Versioned for Mesh {
    const VERSION: u32 = 23;
    const KIND: [u8; 4] = *b"MESH";
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty mesh whose buffer storage is accounted to `counter`
    pub fn with_memory_counter(counter: MemoryCounter) -> Self {
        Self {
            index_buffers: MeshBufferSet::with_memory_counter(counter.clone()),
            vertex_buffers: MeshBufferSet::with_memory_counter(counter.clone()),
            counter: Some(counter),
            ..Self::default()
        }
    }

    pub fn memory_counter(&self) -> Option<&MemoryCounter> {
        self.counter.as_ref()
    }

    /// Mesh standing for an external resource
    pub fn create_as_reference(reference_id: u32, force_load: bool) -> Self {
        let mut mesh = Self::new();
        mesh.reference_id = reference_id;
        mesh.flags |= MeshFlags::IS_RESOURCE_REFERENCE;
        if force_load {
            mesh.flags |= MeshFlags::IS_RESOURCE_FORCE_LOAD;
        }
        mesh
    }

    pub fn is_reference(&self) -> bool {
        self.flags.contains(MeshFlags::IS_RESOURCE_REFERENCE)
    }

    pub fn reference_id(&self) -> u32 {
        self.reference_id
    }

    pub fn flags(&self) -> MeshFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: MeshFlags) {
        self.flags = flags;
    }

    pub fn internal_id(&self) -> u32 {
        self.internal_id
    }

    pub fn set_internal_id(&mut self, id: u32) {
        self.internal_id = id;
    }

    /// Copy of the selected parts of this mesh
    pub fn clone_with_flags(&self, flags: MeshCopyFlags) -> Mesh {
        let mut result = match &self.counter {
            Some(counter) => Mesh::with_memory_counter(counter.clone()),
            None => Mesh::new(),
        };
        result.copy_from(self, flags);
        result
    }

    /// Overwrite the selected parts of this mesh with those of `other`
    ///
    /// Identity fields are always copied. Unselected parts keep their value.
    pub fn copy_from(&mut self, other: &Mesh, flags: MeshCopyFlags) {
        self.internal_id = other.internal_id;
        self.mesh_id_prefix = other.mesh_id_prefix;
        self.flags = other.flags;
        self.reference_id = other.reference_id;

        if flags.contains(MeshCopyFlags::WITH_VERTEX_BUFFERS) {
            self.vertex_buffers = other.vertex_buffers.clone();
            self.vertex_buffers.set_memory_counter(self.counter.clone());
        }
        if flags.contains(MeshCopyFlags::WITH_INDEX_BUFFERS) {
            self.index_buffers = other.index_buffers.clone();
            self.index_buffers.set_memory_counter(self.counter.clone());
        }
        if flags.contains(MeshCopyFlags::WITH_ADDITIONAL_BUFFERS) {
            self.additional_buffers = other.additional_buffers.clone();
        }
        if flags.contains(MeshCopyFlags::WITH_SURFACES) {
            self.surfaces = other.surfaces.clone();
        }
        if flags.contains(MeshCopyFlags::WITH_SKELETON) {
            self.skeleton = other.skeleton.clone();
        }
        if flags.contains(MeshCopyFlags::WITH_PHYSICS_BODY) {
            self.physics_body = other.physics_body.clone();
        }
        if flags.contains(MeshCopyFlags::WITH_ADDITIONAL_PHYSICS) {
            self.additional_physics_bodies = other.additional_physics_bodies.clone();
        }
        if flags.contains(MeshCopyFlags::WITH_LAYOUTS) {
            self.layouts = other.layouts.clone();
        }
        if flags.contains(MeshCopyFlags::WITH_TAGS) {
            self.tags = other.tags.clone();
        }
        if flags.contains(MeshCopyFlags::WITH_STREAMED_RESOURCES) {
            self.streamed_resources = other.streamed_resources.clone();
        }
        if flags.contains(MeshCopyFlags::WITH_POSES) {
            self.bone_poses = other.bone_poses.clone();
        }
        if flags.contains(MeshCopyFlags::WITH_BONE_MAP) {
            self.bone_map = other.bone_map.clone();
        }
        if flags.contains(MeshCopyFlags::WITH_SKELETON_IDS) {
            self.skeleton_ids = other.skeleton_ids.clone();
        }
    }

    pub fn vertex_buffers(&self) -> &MeshBufferSet {
        &self.vertex_buffers
    }

    pub fn vertex_buffers_mut(&mut self) -> &mut MeshBufferSet {
        &mut self.vertex_buffers
    }

    pub fn index_buffers(&self) -> &MeshBufferSet {
        &self.index_buffers
    }

    pub fn index_buffers_mut(&mut self) -> &mut MeshBufferSet {
        &mut self.index_buffers
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_buffers.element_count()
    }

    pub fn index_count(&self) -> usize {
        self.index_buffers.element_count()
    }

    pub fn face_count(&self) -> usize {
        self.index_count() / 3
    }

    pub fn additional_buffers(&self) -> &[(MeshBufferType, MeshBufferSet)] {
        &self.additional_buffers
    }

    pub fn add_additional_buffer(&mut self, kind: MeshBufferType, buffers: MeshBufferSet) {
        self.additional_buffers.push((kind, buffers));
    }

    pub fn surfaces(&self) -> &[MeshSurface] {
        &self.surfaces
    }

    pub fn surfaces_mut(&mut self) -> &mut Vec<MeshSurface> {
        &mut self.surfaces
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    /// Ranges of a surface; without surfaces the whole mesh is surface 0
    pub fn get_surface(&self, surface: usize) -> SurfaceRange {
        if self.surfaces.is_empty() {
            debug_assert_eq!(surface, 0);
            return SurfaceRange {
                vertex_begin: 0,
                vertex_end: self.vertex_count() as u32,
                index_begin: 0,
                index_end: self.index_count() as u32,
            };
        }

        let sub_meshes = &self.surfaces[surface].sub_meshes;
        if sub_meshes.is_empty() {
            return SurfaceRange::default();
        }
        SurfaceRange {
            vertex_begin: sub_meshes.iter().map(|s| s.vertex_begin).min().unwrap_or(0),
            vertex_end: sub_meshes.iter().map(|s| s.vertex_end).max().unwrap_or(0),
            index_begin: sub_meshes.iter().map(|s| s.index_begin).min().unwrap_or(0),
            index_end: sub_meshes.iter().map(|s| s.index_end).max().unwrap_or(0),
        }
    }

    /// Give a mesh with vertices but no surfaces one surface covering everything
    pub fn ensure_surface_data(&mut self) {
        if !self.surfaces.is_empty() || self.vertex_count() == 0 {
            return;
        }
        self.surfaces.push(MeshSurface {
            sub_meshes: vec![SurfaceSubMesh {
                vertex_begin: 0,
                vertex_end: self.vertex_count() as u32,
                index_begin: 0,
                index_end: self.index_count() as u32,
                external_id: 0,
            }],
            bone_map_index: 0,
            bone_map_count: self.bone_map.len() as u32,
            id: 0,
        });
    }

    pub fn mesh_id_prefix(&self) -> u32 {
        self.mesh_id_prefix
    }

    pub fn set_mesh_id_prefix(&mut self, prefix: u32) {
        self.mesh_id_prefix = prefix;
    }

    /// Ids are `prefix << 32 | vertex index` with no id buffer
    pub fn are_vertex_ids_implicit(&self) -> bool {
        self.mesh_id_prefix != 0
            && self
                .vertex_buffers
                .find_channel(MeshBufferSemantic::VertexIndex, 0)
                .is_none()
    }

    /// Ids are stored whole in a u64 buffer
    pub fn are_vertex_ids_explicit(&self) -> bool {
        let explicit = self
            .vertex_buffers
            .find_channel(MeshBufferSemantic::VertexIndex, 0)
            .map(|(b, c)| self.vertex_buffers.channel(b, c).format == MeshBufferFormat::UInt64)
            .unwrap_or(false);
        if explicit {
            debug_assert_eq!(self.mesh_id_prefix, 0, "Explicit vertex ids with a prefix");
        }
        explicit
    }

    /// Store the implicit ids in a u32 buffer relative to the prefix
    pub fn make_vertex_ids_relative(&mut self) {
        assert!(self.are_vertex_ids_implicit(), "Vertex ids must be implicit");
        let buffer = self.vertex_buffers.buffer_count();
        self.vertex_buffers.set_buffer_count(buffer + 1);
        self.vertex_buffers.set_buffer(
            buffer,
            std::mem::size_of::<u32>(),
            &[MeshBufferChannel::new(
                MeshBufferSemantic::VertexIndex,
                0,
                MeshBufferFormat::UInt32,
                1,
                0,
            )],
        );
        let count = self.vertex_count();
        let mut writer = ChannelWriter::at(&mut self.vertex_buffers, buffer, 0);
        for index in 0..count {
            writer.set_from_u32(index, index as u32);
        }
    }

    /// Turn the id schema of an empty mesh into absolute u64 ids
    pub fn make_ids_explicit(&mut self) {
        assert_eq!(self.vertex_count(), 0, "Only empty format meshes can be made explicit");

        match self.vertex_buffers.find_channel(MeshBufferSemantic::VertexIndex, 0) {
            Some((buffer, channel)) => {
                debug_assert!(channel == 0 && self.vertex_buffers.buffer_channel_count(buffer) == 1);
                let mut channels = self.vertex_buffers.buffer(buffer).channels().to_vec();
                channels[channel].format = MeshBufferFormat::UInt64;
                self.vertex_buffers
                    .set_buffer(buffer, std::mem::size_of::<u64>(), &channels);
            }
            None => {
                let buffer = self.vertex_buffers.buffer_count();
                self.vertex_buffers.set_buffer_count(buffer + 1);
                self.vertex_buffers.set_buffer(
                    buffer,
                    std::mem::size_of::<u64>(),
                    &[MeshBufferChannel::new(
                        MeshBufferSemantic::VertexIndex,
                        0,
                        MeshBufferFormat::UInt64,
                        1,
                        0,
                    )],
                );
            }
        }

        for buffer in 0..self.vertex_buffers.buffer_count() {
            if self.vertex_buffers.buffer(buffer).is_single_channel(MeshBufferSemantic::LayoutBlock) {
                let mut channels = self.vertex_buffers.buffer(buffer).channels().to_vec();
                channels[0].format = MeshBufferFormat::UInt64;
                self.vertex_buffers
                    .set_buffer(buffer, std::mem::size_of::<u64>(), &channels);
            }
        }

        self.mesh_id_prefix = 0;
    }

    /// Full 64-bit id of every vertex in order
    pub fn vertex_ids(&self) -> VertexIdIter<'_> {
        VertexIdIter::new(&self.vertex_buffers, self.mesh_id_prefix)
    }

    pub fn skeleton(&self) -> Option<&Arc<Skeleton>> {
        self.skeleton.as_ref()
    }

    pub fn set_skeleton(&mut self, skeleton: Option<Arc<Skeleton>>) {
        self.skeleton = skeleton;
    }

    pub fn physics_body(&self) -> Option<&Arc<PhysicsBody>> {
        self.physics_body.as_ref()
    }

    pub fn set_physics_body(&mut self, body: Option<Arc<PhysicsBody>>) {
        self.physics_body = body;
    }

    pub fn additional_physics_bodies(&self) -> &[Arc<PhysicsBody>] {
        &self.additional_physics_bodies
    }

    pub fn add_additional_physics_body(&mut self, body: Arc<PhysicsBody>) {
        self.additional_physics_bodies.push(body);
    }

    pub fn layouts(&self) -> &[Arc<Layout>] {
        &self.layouts
    }

    pub fn layout(&self, index: usize) -> Option<&Arc<Layout>> {
        self.layouts.get(index)
    }

    pub fn add_layout(&mut self, layout: Arc<Layout>) {
        self.layouts.push(layout);
    }

    /// Replace a layout slot
    ///
    /// An `index` past the end grows the list. Slots skipped on the way are
    /// filled with empty layouts (`Layout::default()`), so `layout(i)` is
    /// `Some` for every `i <= index` afterwards.
    pub fn set_layout(&mut self, index: usize, layout: Arc<Layout>) {
        if index >= self.layouts.len() {
            log::debug!(
                "Padding mesh layouts from {} to {} slots",
                self.layouts.len(),
                index + 1
            );
            self.layouts.resize_with(index + 1, || Arc::new(Layout::default()));
        }
        self.layouts[index] = layout;
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.push(tag.into());
    }

    pub fn streamed_resources(&self) -> &[u64] {
        &self.streamed_resources
    }

    pub fn add_streamed_resource(&mut self, resource: u64) {
        if !self.streamed_resources.contains(&resource) {
            self.streamed_resources.push(resource);
        }
    }

    pub fn skeleton_ids(&self) -> &[u32] {
        &self.skeleton_ids
    }

    pub fn add_skeleton_id(&mut self, id: u32) {
        if !self.skeleton_ids.contains(&id) {
            self.skeleton_ids.push(id);
        }
    }

    pub fn bone_poses(&self) -> &[BonePose] {
        &self.bone_poses
    }

    pub fn find_bone_pose(&self, bone: BoneName) -> Option<usize> {
        self.bone_poses.iter().position(|p| p.bone == bone)
    }

    /// Add a pose or replace the one of the same bone
    pub fn set_bone_pose(&mut self, pose: BonePose) {
        match self.find_bone_pose(pose.bone) {
            Some(index) => self.bone_poses[index] = pose,
            None => self.bone_poses.push(pose),
        }
    }

    pub fn bone_map(&self) -> &[BoneName] {
        &self.bone_map
    }

    pub fn set_bone_map(&mut self, bone_map: Vec<BoneName>) {
        self.bone_map = bone_map;
    }

    /// Same vertex and index buffer layouts
    pub fn has_compatible_format(&self, other: &Mesh) -> bool {
        self.vertex_buffers.has_same_format(&other.vertex_buffers)
            && self.index_buffers.has_same_format(&other.index_buffers)
    }

    /// Vertex indices of every triangle
    pub fn face_vertex_indices(&self) -> Vec<[u32; 3]> {
        let Some(reader) = ChannelReader::new(&self.index_buffers, MeshBufferSemantic::VertexIndex, 0) else {
            return Vec::new();
        };
        (0..self.face_count())
            .map(|f| [reader.as_u32(f * 3), reader.as_u32(f * 3 + 1), reader.as_u32(f * 3 + 2)])
            .collect()
    }

    /// Approximate bytes held by the mesh
    pub fn data_size(&self) -> usize {
        std::mem::size_of::<Mesh>()
            + self.vertex_buffers.data_size()
            + self.index_buffers.data_size()
            + self
                .additional_buffers
                .iter()
                .map(|(_, b)| b.data_size())
                .sum::<usize>()
            + self.bone_poses.len() * std::mem::size_of::<BonePose>()
            + self.bone_map.len() * std::mem::size_of::<BoneName>()
            + self.tags.iter().map(|t| t.len()).sum::<usize>()
    }

    /// Content equality used to share generated results
    pub fn is_similar(&self, other: &Mesh, compare_layouts: bool) -> bool {
        // Meshes without indices are masks and never match.
        if self.index_count() == 0 || other.index_count() == 0 {
            return false;
        }
        if self.reference_id != other.reference_id {
            return false;
        }
        if self.index_buffers != other.index_buffers {
            return false;
        }
        if compare_layouts && self.layouts.len() != other.layouts.len() {
            return false;
        }

        let skeletons_match = match (&self.skeleton, &other.skeleton) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b) || **a == **b,
            (None, None) => true,
            _ => false,
        };
        let bodies_match = match (&self.physics_body, &other.physics_body) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b) || **a == **b,
            (None, None) => true,
            _ => false,
        };
        if !skeletons_match || !bodies_match {
            return false;
        }
        if self.surfaces != other.surfaces || self.tags != other.tags {
            return false;
        }
        if compare_layouts
            && !self
                .layouts
                .iter()
                .zip(&other.layouts)
                .all(|(a, b)| a.is_similar(b))
        {
            return false;
        }

        self.vertex_buffers
            .is_similar_robust(&other.vertex_buffers, compare_layouts)
    }

    /// Validate index and bone references, logging the first problem found
    pub fn check_integrity(&self) -> bool {
        let vertex_count = self.vertex_count();
        if let Some(reader) = ChannelReader::new(&self.index_buffers, MeshBufferSemantic::VertexIndex, 0) {
            for i in 0..reader.len() {
                let index = reader.as_u32(i) as usize;
                if index >= vertex_count {
                    log::warn!("Index {i} references vertex {index} of {vertex_count}");
                    return false;
                }
            }
        }

        let bone_limit = if !self.bone_map.is_empty() {
            Some(self.bone_map.len())
        } else {
            self.skeleton.as_ref().map(|s| s.bone_count())
        };
        if let Some(limit) = bone_limit {
            if let Some(reader) = ChannelReader::new(&self.vertex_buffers, MeshBufferSemantic::BoneIndices, 0) {
                for v in 0..reader.len() {
                    if let Some(bone) = reader.as_int_vec(v).into_iter().find(|b| *b < 0 || *b as usize >= limit) {
                        log::warn!("Vertex {v} references bone {bone} of {limit}");
                        return false;
                    }
                }
            }
        }

        for (s, surface) in self.surfaces.iter().enumerate() {
            for sub in &surface.sub_meshes {
                if sub.vertex_end as usize > vertex_count
                    || sub.index_end as usize > self.index_count()
                    || sub.vertex_begin > sub.vertex_end
                    || sub.index_begin > sub.index_end
                {
                    log::warn!("Surface {s} has a sub mesh outside of the buffers");
                    return false;
                }
            }
        }
        true
    }

    pub fn debug_check_integrity(&self) {
        debug_assert!(self.check_integrity(), "Mesh integrity check failed");
    }

    /// Recompute the flags describing well known buffer layouts
    pub fn reset_static_format_flags(&mut self) {
        self.flags
            .remove(MeshFlags::PROJECT_FORMAT | MeshFlags::PROJECT_WRAPPING_FORMAT);

        let vertices = &self.vertex_buffers;
        let indices = &self.index_buffers;
        let index_match = indices.buffer_count() == 1
            && indices.buffer(0).channels()
                == [MeshBufferChannel::new(MeshBufferSemantic::VertexIndex, 0, MeshBufferFormat::UInt32, 1, 0)];
        if !index_match || vertices.buffer_count() == 0 || vertices.buffer_count() > 2 {
            return;
        }

        let project_channels = [
            MeshBufferChannel::new(MeshBufferSemantic::TexCoords, 0, MeshBufferFormat::Float32, 2, 0),
            MeshBufferChannel::new(MeshBufferSemantic::Position, 0, MeshBufferFormat::Float32, 3, 8),
            MeshBufferChannel::new(MeshBufferSemantic::Normal, 0, MeshBufferFormat::Float32, 3, 20),
        ];
        if vertices.element_size(0) != 32 || vertices.buffer(0).channels() != project_channels {
            return;
        }

        if vertices.buffer_count() == 1 {
            self.flags |= MeshFlags::PROJECT_FORMAT;
        } else if vertices.buffer(1).is_single_channel(MeshBufferSemantic::LayoutBlock) {
            self.flags |= MeshFlags::PROJECT_WRAPPING_FORMAT;
        }
    }

    /// Human readable dump of the buffers, limited to `max_elements` rows
    pub fn log(&self, max_elements: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Mesh: {} vertices, {} indices, {} surfaces, prefix {:#x}",
            self.vertex_count(),
            self.index_count(),
            self.surfaces.len(),
            self.mesh_id_prefix
        );
        log_buffer_set(&mut out, "Vertices", &self.vertex_buffers, max_elements);
        log_buffer_set(&mut out, "Indices", &self.index_buffers, max_elements);
        for (s, surface) in self.surfaces.iter().enumerate() {
            let _ = writeln!(out, "Surface {s} (id {}):", surface.id);
            for sub in &surface.sub_meshes {
                let _ = writeln!(
                    out,
                    "  vertices {}..{} indices {}..{} external id {}",
                    sub.vertex_begin, sub.vertex_end, sub.index_begin, sub.index_end, sub.external_id
                );
            }
        }
        if !self.tags.is_empty() {
            let _ = writeln!(out, "Tags: {}", self.tags.join(", "));
        }
        out
    }
}

fn log_buffer_set(out: &mut String, name: &str, set: &MeshBufferSet, max_elements: usize) {
    let _ = writeln!(out, "{name}: {} elements, {} buffers", set.element_count(), set.buffer_count());
    for b in 0..set.buffer_count() {
        let _ = writeln!(out, "  Buffer {b}, element size {}", set.element_size(b));
        for c in 0..set.buffer_channel_count(b) {
            let channel = set.channel(b, c);
            let _ = writeln!(
                out,
                "    {:?}[{}] {:?} x{} @{}",
                channel.semantic, channel.semantic_index, channel.format, channel.component_count, channel.offset
            );
        }
        for e in 0..set.element_count().min(max_elements) {
            let values: Vec<String> = (0..set.buffer_channel_count(b))
                .map(|c| {
                    let reader = ChannelReader::at(set, b, c);
                    let parts: Vec<String> = (0..reader.components())
                        .map(|k| format!("{}", reader.component(e, k).as_f64()))
                        .collect();
                    format!("({})", parts.join(", "))
                })
                .collect();
            let _ = writeln!(out, "    [{e}] {}", values.join(" "));
        }
    }
}

/// Mesh with one f32x3 position buffer and u32 indices
pub fn build_position_mesh(positions: &[Vec3], indices: &[u32]) -> Mesh {
    let mut mesh = Mesh::new();
    let vertices = mesh.vertex_buffers_mut();
    vertices.set_buffer_count(1);
    vertices.set_element_count(positions.len(), BufferInit::Zeroed);
    vertices.set_buffer(
        0,
        12,
        &[MeshBufferChannel::new(MeshBufferSemantic::Position, 0, MeshBufferFormat::Float32, 3, 0)],
    );
    {
        let mut writer = ChannelWriter::at(vertices, 0, 0);
        for (i, p) in positions.iter().enumerate() {
            writer.set_from_vec3(i, *p);
        }
    }

    let index_set = mesh.index_buffers_mut();
    index_set.set_buffer_count(1);
    index_set.set_element_count(indices.len(), BufferInit::Zeroed);
    index_set.set_buffer(
        0,
        4,
        &[MeshBufferChannel::new(MeshBufferSemantic::VertexIndex, 0, MeshBufferFormat::UInt32, 1, 0)],
    );
    {
        let mut writer = ChannelWriter::at(index_set, 0, 0);
        for (i, index) in indices.iter().enumerate() {
            writer.set_from_u32(i, *index);
        }
    }
    mesh
}
