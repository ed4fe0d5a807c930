//! Block placement
//!
//! Blocks are placed on shelves, largest first. Resizeable layouts double
//! their grid until every block fits. Fixed layouts shrink their lowest
//! priority blocks instead.

use glam::IVec2;

use crate::layout::{Layout, LayoutBlock, PackStrategy, ReductionMethod};

/// Assign a position to every block according to the layout's strategy
pub fn layout_pack(layout: &Layout) -> Layout {
    match layout.strategy() {
        PackStrategy::Overlay => layout.clone(),
        PackStrategy::Resizeable => pack_resizeable(layout),
        PackStrategy::Fixed => pack_fixed(layout, layout.grid_size()),
    }
}

fn placement_order(blocks: &[LayoutBlock]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..blocks.len()).collect();
    order.sort_by(|&a, &b| {
        blocks[b]
            .area()
            .cmp(&blocks[a].area())
            .then(blocks[b].priority.cmp(&blocks[a].priority))
            .then(a.cmp(&b))
    });
    order
}

fn shelf_place(blocks: &[LayoutBlock], grid: IVec2) -> Option<Vec<IVec2>> {
    let mut positions = vec![IVec2::ZERO; blocks.len()];
    let mut cursor = IVec2::ZERO;
    let mut row_height = 0;
    for index in placement_order(blocks) {
        let size = blocks[index].size;
        if size.x > grid.x {
            return None;
        }
        if cursor.x + size.x > grid.x {
            cursor = IVec2::new(0, cursor.y + row_height);
            row_height = 0;
        }
        if cursor.y + size.y > grid.y {
            return None;
        }
        positions[index] = cursor;
        cursor.x += size.x;
        row_height = row_height.max(size.y);
    }
    Some(positions)
}

fn apply_positions(layout: &Layout, blocks: Vec<LayoutBlock>, positions: &[IVec2], grid: IVec2) -> Layout {
    let mut result = layout.clone();
    result.set_grid_size(grid);
    *result.blocks_mut() = blocks;
    for (block, position) in result.blocks_mut().iter_mut().zip(positions) {
        block.min = *position;
    }
    result
}

fn pack_resizeable(layout: &Layout) -> Layout {
    let blocks = layout.blocks();
    let widest = blocks.iter().map(|b| b.size.x).max().unwrap_or(1);
    let max_size = layout.max_grid_size();
    let bounded = max_size.x > 0 && max_size.y > 0;

    let mut grid = layout.grid_size().max(IVec2::ONE);
    grid.x = grid.x.max(widest);
    loop {
        if let Some(positions) = shelf_place(blocks, grid) {
            return apply_positions(layout, blocks.to_vec(), &positions, grid);
        }
        if bounded && grid.x >= max_size.x && grid.y >= max_size.y {
            log::debug!("Layout reached its maximum grid {max_size}, shrinking blocks");
            return pack_fixed(layout, max_size);
        }
        if grid.x <= grid.y {
            grid.x *= 2;
        } else {
            grid.y *= 2;
        }
        if bounded {
            grid = grid.min(max_size);
        }
    }
}

fn reducible(block: &LayoutBlock) -> bool {
    block.size.x > 1 || block.size.y > 1
}

fn reduce(block: &mut LayoutBlock, method: ReductionMethod) {
    let step = if block.reduce_by_two { 2 } else { 1 };
    let shrink = |v: i32| -> i32 {
        match method {
            ReductionMethod::Halve => (v / 2).max(1),
            ReductionMethod::Unitary => (v - step).max(1),
        }
    };
    if block.reduce_both_axes {
        block.size = IVec2::new(shrink(block.size.x), shrink(block.size.y));
    } else if block.size.x >= block.size.y {
        block.size.x = shrink(block.size.x);
    } else {
        block.size.y = shrink(block.size.y);
    }
}

fn pack_fixed(layout: &Layout, grid: IVec2) -> Layout {
    let mut blocks = layout.blocks().to_vec();
    loop {
        if let Some(positions) = shelf_place(&blocks, grid) {
            return apply_positions(layout, blocks, &positions, grid);
        }
        let candidate = blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| reducible(b))
            .min_by_key(|(i, b)| (b.priority, -b.area(), *i))
            .map(|(i, _)| i);
        match candidate {
            Some(index) => reduce(&mut blocks[index], layout.reduction_method()),
            None => {
                log::warn!(
                    "{} layout blocks do not fit in a {}x{} grid",
                    blocks.len(),
                    grid.x,
                    grid.y
                );
                let positions = vec![IVec2::ZERO; blocks.len()];
                return apply_positions(layout, blocks, &positions, grid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlaps(a: &LayoutBlock, b: &LayoutBlock) -> bool {
        a.min.x < b.min.x + b.size.x
            && b.min.x < a.min.x + a.size.x
            && a.min.y < b.min.y + b.size.y
            && b.min.y < a.min.y + a.size.y
    }

    fn assert_valid(layout: &Layout) {
        let grid = layout.grid_size();
        for (i, a) in layout.blocks().iter().enumerate() {
            assert!(a.min.x >= 0 && a.min.y >= 0);
            assert!(a.min.x + a.size.x <= grid.x && a.min.y + a.size.y <= grid.y);
            for b in &layout.blocks()[i + 1..] {
                assert!(!overlaps(a, b), "Blocks {a:?} and {b:?} overlap");
            }
        }
    }

    fn unplaced(sizes: &[(i32, i32)], grid: IVec2, strategy: PackStrategy) -> Layout {
        let mut layout = Layout::new(grid);
        layout.set_strategy(strategy);
        for (i, (x, y)) in sizes.iter().enumerate() {
            layout
                .blocks_mut()
                .push(LayoutBlock::new(IVec2::ZERO, IVec2::new(*x, *y), i as u64).with_priority(i as i32));
        }
        layout
    }

    #[test]
    fn test_resizeable_grows_grid() {
        let layout = unplaced(&[(2, 2), (2, 2), (1, 1), (2, 1)], IVec2::new(2, 2), PackStrategy::Resizeable);
        let packed = layout_pack(&layout);
        assert_eq!(packed.block_count(), 4);
        assert!(packed.grid_size().x * packed.grid_size().y >= 11);
        assert_valid(&packed);
        let ids: Vec<u64> = packed.blocks().iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_fixed_shrinks_low_priority_blocks() {
        let layout = unplaced(&[(2, 2), (2, 2), (2, 2)], IVec2::new(4, 2), PackStrategy::Fixed);
        let packed = layout_pack(&layout);
        assert_eq!(packed.grid_size(), IVec2::new(4, 2));
        assert_valid(&packed);
        assert!(packed.blocks()[0].area() < 4);
        assert_eq!(packed.blocks()[2].size, IVec2::new(2, 2));
    }

    #[test]
    fn test_unitary_reduction() {
        let mut layout = unplaced(&[(3, 1), (3, 1)], IVec2::new(4, 1), PackStrategy::Fixed);
        layout.set_reduction_method(ReductionMethod::Unitary);
        let packed = layout_pack(&layout);
        assert_valid(&packed);
        assert_eq!(packed.blocks()[0].size, IVec2::new(1, 1));
        assert_eq!(packed.blocks()[1].size, IVec2::new(3, 1));
    }

    #[test]
    fn test_overlay_keeps_blocks() {
        let layout = unplaced(&[(4, 4), (4, 4)], IVec2::new(4, 4), PackStrategy::Overlay);
        assert_eq!(layout_pack(&layout), layout);
    }

    #[test]
    fn test_bounded_resizeable_falls_back_to_shrinking() {
        let mut layout = unplaced(&[(4, 4), (4, 4)], IVec2::new(4, 4), PackStrategy::Resizeable);
        layout.set_max_grid_size(IVec2::new(4, 4));
        let packed = layout_pack(&layout);
        assert_eq!(packed.grid_size(), IVec2::new(4, 4));
        assert_valid(&packed);
    }
}
