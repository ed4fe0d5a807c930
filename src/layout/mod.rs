//! UV block layouts
//!
//! A layout splits the texture space of one UV channel into a grid and
//! assigns rectangular blocks of cells to parts of a mesh. Block ids are
//! persistent across merges, array positions are not.

pub mod ops;
pub mod pack;

pub use ops::{layout_from_mesh_remove_blocks, layout_merge, layout_remove_blocks};
pub use pack::layout_pack;

use glam::IVec2;
use serde::{Deserialize, Serialize};

use crate::serialisation::Versioned;

/// How blocks are fitted into the grid when packing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackStrategy {
    /// The grid grows to fit the blocks
    Resizeable,
    /// The grid keeps its size and blocks shrink to fit
    Fixed,
    /// Blocks keep their authored placement
    Overlay,
}

/// How a block shrinks under the fixed strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReductionMethod {
    Halve,
    Unitary,
}

/// Rectangle of grid cells with a persistent id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayoutBlock {
    pub min: IVec2,
    pub size: IVec2,
    pub id: u64,
    /// Lower priorities shrink first
    pub priority: i32,
    pub reduce_both_axes: bool,
    pub reduce_by_two: bool,
}

impl LayoutBlock {
    /// Reserved id that never names a real block
    pub const INVALID_ID: u64 = u64::MAX;

    pub fn new(min: IVec2, size: IVec2, id: u64) -> Self {
        Self {
            min,
            size,
            id,
            priority: 0,
            reduce_both_axes: false,
            reduce_by_two: false,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Same geometry and reduction settings, ignoring the id
    pub fn is_similar(&self, other: &LayoutBlock) -> bool {
        self.min == other.min
            && self.size == other.size
            && self.priority == other.priority
            && self.reduce_both_axes == other.reduce_both_axes
            && self.reduce_by_two == other.reduce_by_two
    }

    pub fn area(&self) -> i32 {
        self.size.x * self.size.y
    }
}

/// Block layout of one texture channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    size: IVec2,
    /// Largest grid a resizeable layout may grow to, zero for unbounded
    max_size: IVec2,
    blocks: Vec<LayoutBlock>,
    strategy: PackStrategy,
    reduction_method: ReductionMethod,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            size: IVec2::ZERO,
            max_size: IVec2::ZERO,
            blocks: Vec::new(),
            strategy: PackStrategy::Resizeable,
            reduction_method: ReductionMethod::Halve,
        }
    }
}

impl Versioned for Layout {
    const VERSION: u32 = 4;
    const KIND: [u8; 4] = *b"LAYT";
}

impl Layout {
    pub fn new(size: IVec2) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    pub fn grid_size(&self) -> IVec2 {
        self.size
    }

    pub fn set_grid_size(&mut self, size: IVec2) {
        self.size = size;
    }

    pub fn max_grid_size(&self) -> IVec2 {
        self.max_size
    }

    pub fn set_max_grid_size(&mut self, size: IVec2) {
        self.max_size = size;
    }

    pub fn strategy(&self) -> PackStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: PackStrategy) {
        self.strategy = strategy;
    }

    pub fn reduction_method(&self) -> ReductionMethod {
        self.reduction_method
    }

    pub fn set_reduction_method(&mut self, method: ReductionMethod) {
        self.reduction_method = method;
    }

    pub fn blocks(&self) -> &[LayoutBlock] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut Vec<LayoutBlock> {
        &mut self.blocks
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Append a block and return its index
    pub fn add_block(&mut self, block: LayoutBlock) -> usize {
        debug_assert!(block.id != LayoutBlock::INVALID_ID, "Blocks need a valid id");
        debug_assert!(
            block.min.x >= 0
                && block.min.y >= 0
                && block.min.x + block.size.x <= self.size.x
                && block.min.y + block.size.y <= self.size.y,
            "Block outside of the layout grid"
        );
        self.blocks.push(block);
        self.blocks.len() - 1
    }

    /// Index of the block with this id
    pub fn find_block(&self, id: u64) -> Option<usize> {
        self.blocks.iter().position(|b| b.id == id)
    }

    /// Cell rectangle of a block as `(min, size)`
    pub fn block_rect(&self, index: usize) -> (IVec2, IVec2) {
        let block = &self.blocks[index];
        (block.min, block.size)
    }

    /// Same grid and pairwise similar blocks in array order
    pub fn is_similar(&self, other: &Layout) -> bool {
        self.size == other.size
            && self.blocks.len() == other.blocks.len()
            && self
                .blocks
                .iter()
                .zip(&other.blocks)
                .all(|(a, b)| a.is_similar(b))
    }

    /// Exactly one block covering the whole grid
    pub fn is_single_block_and_full(&self) -> bool {
        self.blocks.len() == 1
            && self.blocks[0].min == IVec2::ZERO
            && self.blocks[0].size == self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_layout() -> Layout {
        let mut layout = Layout::new(IVec2::new(4, 4));
        layout.add_block(LayoutBlock::new(IVec2::new(0, 0), IVec2::new(2, 2), 100));
        layout.add_block(LayoutBlock::new(IVec2::new(2, 0), IVec2::new(2, 4), 200));
        layout
    }

    #[test]
    fn test_find_block_by_id() {
        let layout = sample_layout();
        assert_eq!(layout.find_block(200), Some(1));
        assert_eq!(layout.find_block(300), None);
    }

    #[test]
    fn test_similarity_is_order_sensitive() {
        let layout = sample_layout();
        let mut reordered = layout.clone();
        reordered.blocks_mut().reverse();
        assert!(layout.is_similar(&layout.clone()));
        assert!(!layout.is_similar(&reordered));
    }

    #[test]
    fn test_single_block_and_full() {
        let mut layout = Layout::new(IVec2::new(2, 2));
        layout.add_block(LayoutBlock::new(IVec2::ZERO, IVec2::new(2, 2), 1));
        assert!(layout.is_single_block_and_full());
        assert!(!sample_layout().is_single_block_and_full());
    }
}
