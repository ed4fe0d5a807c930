//! Mesh merging
//!
//! The added mesh is appended after the base one: its vertices and indices
//! follow the base ranges and its surfaces become new surfaces of the result.

use std::sync::Arc;

use crate::layout::layout_merge;
use crate::mesh::{ChannelReader, ChannelWriter, Mesh, MeshBufferSemantic, MeshBufferSet, BufferInit};
use crate::ops::format::mesh_format;

fn append_elements(target: &mut MeshBufferSet, added: &MeshBufferSet) {
    debug_assert!(target.has_same_format(added), "Merged buffers must share a format");
    let base_count = target.element_count();
    target.set_element_count(base_count + added.element_count(), BufferInit::Uninitialized);
    for b in 0..target.buffer_count() {
        let size = target.element_size(b);
        target.buffer_data_mut(b)[base_count * size..].copy_from_slice(added.buffer_data(b));
    }
}

fn rebase_indices(indices: &mut MeshBufferSet, first: usize, vertex_offset: u32) {
    let Some(reader) = ChannelReader::new(indices, MeshBufferSemantic::VertexIndex, 0) else {
        return;
    };
    let values: Vec<u32> = (first..reader.len()).map(|i| reader.as_u32(i) + vertex_offset).collect();
    let Some(mut writer) = ChannelWriter::new(indices, MeshBufferSemantic::VertexIndex, 0) else {
        return;
    };
    for (i, value) in values.into_iter().enumerate() {
        writer.set_from_u32(first + i, value);
    }
}

/// Append `added` to `base`
///
/// `added` is reformatted to the buffer formats of `base` when they differ.
/// A non zero `new_surface_id` is given to every surface coming from `added`.
pub fn mesh_merge(base: &Mesh, added: &Mesh, new_surface_id: u32) -> Mesh {
    let mut added = if base.vertex_buffers().buffer_count() == 0 || base.has_compatible_format(added) {
        added.clone()
    } else {
        log::debug!("Reformatting merged mesh to the base format");
        mesh_format(added, base, false, true, true, false)
    };
    added.ensure_surface_data();
    if new_surface_id != 0 {
        for surface in added.surfaces_mut() {
            surface.id = new_surface_id;
        }
    }

    if base.vertex_count() == 0 && base.index_count() == 0 && base.vertex_buffers().buffer_count() == 0 {
        return added;
    }

    let mut result = base.clone();
    result.ensure_surface_data();

    let vertex_offset = result.vertex_count() as u32;
    let index_offset = result.index_count() as u32;
    let bone_offset = result.bone_map().len() as u32;

    append_elements(result.vertex_buffers_mut(), added.vertex_buffers());
    append_elements(result.index_buffers_mut(), added.index_buffers());
    rebase_indices(result.index_buffers_mut(), index_offset as usize, vertex_offset);

    for surface in added.surfaces() {
        let mut surface = surface.clone();
        for sub in &mut surface.sub_meshes {
            sub.vertex_begin += vertex_offset;
            sub.vertex_end += vertex_offset;
            sub.index_begin += index_offset;
            sub.index_end += index_offset;
        }
        surface.bone_map_index += bone_offset;
        result.surfaces_mut().push(surface);
    }

    let mut bone_map = result.bone_map().to_vec();
    bone_map.extend_from_slice(added.bone_map());
    result.set_bone_map(bone_map);

    for tag in added.tags() {
        if !result.tags().contains(tag) {
            result.add_tag(tag.clone());
        }
    }
    for resource in added.streamed_resources() {
        result.add_streamed_resource(*resource);
    }
    for id in added.skeleton_ids() {
        result.add_skeleton_id(*id);
    }
    for pose in added.bone_poses() {
        if result.find_bone_pose(pose.bone).is_none() {
            result.set_bone_pose(*pose);
        }
    }

    for (index, layout) in added.layouts().iter().enumerate() {
        let merged = match result.layout(index) {
            Some(existing) => Arc::new(layout_merge(existing, layout)),
            None => layout.clone(),
        };
        result.set_layout(index, merged);
    }

    if result.skeleton().is_none() {
        result.set_skeleton(added.skeleton().cloned());
    }
    if result.physics_body().is_none() {
        result.set_physics_body(added.physics_body().cloned());
    }
    for body in added.additional_physics_bodies() {
        result.add_additional_physics_body(body.clone());
    }

    result.debug_check_integrity();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Layout, LayoutBlock};
    use crate::mesh::{build_position_mesh, MeshBufferChannel, MeshBufferFormat};
    use glam::{IVec2, Vec3};

    #[test]
    fn test_merge_appends_geometry() {
        let mut base = build_position_mesh(&[Vec3::ZERO, Vec3::X, Vec3::Y], &[0, 1, 2]);
        base.add_tag("base");
        let mut added = build_position_mesh(&[Vec3::Z, Vec3::ONE, Vec3::NEG_X], &[2, 1, 0]);
        added.add_tag("added");
        added.add_tag("base");

        let merged = mesh_merge(&base, &added, 7);
        assert_eq!(merged.vertex_count(), 6);
        assert_eq!(merged.index_count(), 6);
        assert_eq!(merged.face_vertex_indices(), vec![[0, 1, 2], [5, 4, 3]]);
        assert_eq!(merged.surface_count(), 2);
        assert_eq!(merged.surfaces()[1].id, 7);
        assert_eq!(merged.get_surface(1).vertex_begin, 3);
        assert_eq!(merged.get_surface(1).index_end, 6);
        assert_eq!(merged.tags(), &["base".to_string(), "added".to_string()]);

        let positions = ChannelReader::new(merged.vertex_buffers(), MeshBufferSemantic::Position, 0)
            .expect("Positions should exist");
        assert_eq!(positions.as_vec3(4), Vec3::ONE);
        assert!(merged.check_integrity());
    }

    #[test]
    fn test_merge_reformats_added_mesh() {
        let base = build_position_mesh(&[Vec3::ZERO], &[0, 0, 0]);
        let mut added = Mesh::new();
        let vertices = added.vertex_buffers_mut();
        vertices.set_buffer_count(1);
        vertices.set_element_count(1, BufferInit::Zeroed);
        vertices.set_buffer(
            0,
            24,
            &[
                MeshBufferChannel::new(MeshBufferSemantic::Normal, 0, MeshBufferFormat::Float32, 3, 0),
                MeshBufferChannel::new(MeshBufferSemantic::Position, 0, MeshBufferFormat::Float32, 3, 12),
            ],
        );
        ChannelWriter::at(vertices, 0, 1).set_from_vec3(0, Vec3::new(4.0, 5.0, 6.0));

        let merged = mesh_merge(&base, &added, 0);
        assert!(merged.vertex_buffers().has_same_format(base.vertex_buffers()));
        let positions = ChannelReader::new(merged.vertex_buffers(), MeshBufferSemantic::Position, 0)
            .expect("Positions should exist");
        assert_eq!(positions.as_vec3(1), Vec3::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn test_merge_unions_layout_blocks() {
        let mut base = build_position_mesh(&[Vec3::ZERO], &[]);
        let mut layout = Layout::new(IVec2::new(2, 2));
        layout.add_block(LayoutBlock::new(IVec2::ZERO, IVec2::ONE, 1));
        base.add_layout(Arc::new(layout));

        let mut added = build_position_mesh(&[Vec3::ONE], &[]);
        let mut other = Layout::new(IVec2::new(2, 2));
        other.add_block(LayoutBlock::new(IVec2::ONE, IVec2::ONE, 2));
        added.add_layout(Arc::new(other));

        let merged = mesh_merge(&base, &added, 0);
        let ids: Vec<u64> = merged.layouts()[0].blocks().iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_merge_into_empty_base() {
        let added = build_position_mesh(&[Vec3::ONE], &[0, 0, 0]);
        let merged = mesh_merge(&Mesh::new(), &added, 3);
        assert_eq!(merged.vertex_count(), 1);
        assert_eq!(merged.surfaces()[0].id, 3);
    }
}
