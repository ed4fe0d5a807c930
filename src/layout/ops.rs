//! Block removal and merging

use rustc_hash::FxHashSet;

use crate::layout::Layout;
use crate::mesh::{ChannelReader, Mesh, MeshBufferFormat, MeshBufferSemantic};

/// Keep only the blocks of `source` whose ids also appear in `reference`
pub fn layout_remove_blocks(source: &Layout, reference: &Layout) -> Layout {
    let kept: FxHashSet<u64> = reference.blocks().iter().map(|b| b.id).collect();
    let mut result = source.clone();
    result.blocks_mut().retain(|b| kept.contains(&b.id));
    result
}

/// Layout `layout_index` of the mesh restricted to the blocks its vertices use
///
/// Without a layout block channel the layout is returned whole.
pub fn layout_from_mesh_remove_blocks(mesh: &Mesh, layout_index: usize) -> Option<Layout> {
    let layout = mesh.layout(layout_index)?;
    let Some(reader) = ChannelReader::new(
        mesh.vertex_buffers(),
        MeshBufferSemantic::LayoutBlock,
        layout_index as i32,
    ) else {
        return Some((**layout).clone());
    };

    let prefix = (mesh.mesh_id_prefix() as u64) << 32;
    let used: FxHashSet<u64> = (0..reader.len())
        .map(|v| match reader.format() {
            MeshBufferFormat::UInt64 => reader.as_u64(v),
            _ => prefix | reader.as_u32(v) as u64,
        })
        .collect();

    let mut result = (**layout).clone();
    result.blocks_mut().retain(|b| used.contains(&b.id));
    log::debug!(
        "Layout {layout_index} reduced from {} to {} blocks by mesh usage",
        layout.block_count(),
        result.block_count()
    );
    Some(result)
}

/// Append the blocks of `added` missing from `base`
///
/// Ids must already be disjoint or refer to the same block.
pub fn layout_merge(base: &Layout, added: &Layout) -> Layout {
    let mut result = base.clone();
    for block in added.blocks() {
        if result.find_block(block.id).is_none() {
            result.blocks_mut().push(*block);
        }
    }
    result
}
