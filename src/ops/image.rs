//! Image operations driven by layouts

use glam::UVec2;

use crate::image::{Image, ImageFormat};
use crate::layout::Layout;

/// Transparent image covering the whole layout grid
///
/// Each grid cell takes `block_pixels` pixels.
pub fn image_blank_layout(layout: &Layout, block_pixels: UVec2, format: ImageFormat, mips: u32) -> Image {
    let grid = layout.grid_size().max(glam::IVec2::ONE).as_uvec2();
    let size = grid * block_pixels.max(UVec2::ONE);
    Image::new(size.x, size.y, mips, format)
}

/// Write `block_image` into the rect of block `block_id` of `base`
///
/// The block image is scaled to the rect with nearest sampling. With a mask,
/// each pixel is blended by the first channel of the mask sampled the same
/// way. Unknown block ids leave the base untouched.
pub fn image_compose(
    layout: &Layout,
    base: &Image,
    block_image: &Image,
    mask: Option<&Image>,
    block_id: u64,
) -> Image {
    let Some(index) = layout.find_block(block_id) else {
        log::debug!("Block {block_id} is not in the layout, composition skipped");
        return base.clone();
    };
    let grid = layout.grid_size().max(glam::IVec2::ONE).as_uvec2();
    let cell = base.size() / grid;
    let (min, size) = layout.block_rect(index);
    let rect_min = min.max(glam::IVec2::ZERO).as_uvec2() * cell;
    let rect_size = size.max(glam::IVec2::ZERO).as_uvec2() * cell;
    if rect_size.x == 0 || rect_size.y == 0 {
        return base.clone();
    }

    let block = block_image.resized_nearest(rect_size);
    let mask = mask.map(|m| m.resized_nearest(rect_size));
    let bpp = base.format().bytes_per_pixel();
    debug_assert_eq!(block.format(), base.format(), "Composed images must share a format");

    let mut result = base.extract_lod(0);
    for y in 0..rect_size.y {
        let ty = rect_min.y + y;
        if ty >= result.size().y {
            break;
        }
        for x in 0..rect_size.x {
            let tx = rect_min.x + x;
            if tx >= result.size().x {
                break;
            }
            let source = block.pixel(x, y);
            let pixel: Vec<u8> = match &mask {
                Some(mask) => {
                    let alpha = mask.pixel(x, y).first().copied().unwrap_or(255) as u32;
                    result
                        .pixel(tx, ty)
                        .iter()
                        .zip(source)
                        .map(|(dst, src)| ((*src as u32 * alpha + *dst as u32 * (255 - alpha) + 127) / 255) as u8)
                        .collect()
                }
                None => source[..bpp].to_vec(),
            };
            result.set_pixel(tx, ty, &pixel);
        }
    }
    if base.lod_count() > 1 {
        result.generate_mips(base.lod_count());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutBlock;
    use glam::IVec2;

    fn two_block_layout() -> Layout {
        let mut layout = Layout::new(IVec2::new(2, 1));
        layout.add_block(LayoutBlock::new(IVec2::ZERO, IVec2::ONE, 10));
        layout.add_block(LayoutBlock::new(IVec2::new(1, 0), IVec2::ONE, 11));
        layout
    }

    #[test]
    fn test_blank_layout_size() {
        let image = image_blank_layout(&two_block_layout(), UVec2::new(4, 4), ImageFormat::RGBA8, 1);
        assert_eq!(image.size(), UVec2::new(8, 4));
        assert!(image.data().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_compose_into_block() {
        let layout = two_block_layout();
        let base = image_blank_layout(&layout, UVec2::new(2, 2), ImageFormat::L8, 1);
        let block = Image::from_pixels(1, 1, ImageFormat::L8, vec![200]);

        let result = image_compose(&layout, &base, &block, None, 11);
        assert_eq!(result.data(), &[0, 0, 200, 200, 0, 0, 200, 200]);

        let unchanged = image_compose(&layout, &base, &block, None, 99);
        assert_eq!(unchanged, base);
    }

    #[test]
    fn test_compose_with_mask() {
        let layout = two_block_layout();
        let base = Image::from_pixels(2, 1, ImageFormat::L8, vec![100, 100]);
        let block = Image::from_pixels(1, 1, ImageFormat::L8, vec![200]);
        let mask = Image::from_pixels(1, 1, ImageFormat::L8, vec![0]);

        let result = image_compose(&layout, &base, &block, Some(&mask), 10);
        assert_eq!(result.data(), &[100, 100]);

        let full = Image::from_pixels(1, 1, ImageFormat::L8, vec![255]);
        let result = image_compose(&layout, &base, &block, Some(&full), 10);
        assert_eq!(result.data(), &[200, 100]);
    }
}
