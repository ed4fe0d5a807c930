//! Uncompressed images with an optional mip chain
//!
//! Mips are stored one after another, largest first.

use glam::UVec2;
use serde::{Deserialize, Serialize};

use crate::serialisation::Versioned;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFormat {
    None,
    L8,
    RGB8,
    RGBA8,
}

impl ImageFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            ImageFormat::None => 0,
            ImageFormat::L8 => 1,
            ImageFormat::RGB8 => 3,
            ImageFormat::RGBA8 => 4,
        }
    }
}

/// Size and format of an image without its pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    pub size: UVec2,
    pub format: ImageFormat,
    pub lods: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    size: UVec2,
    format: ImageFormat,
    lod_count: u32,
    data: Vec<u8>,
}

impl Versioned for Image {
    const VERSION: u32 = 4;
    const KIND: [u8; 4] = *b"IMAG";
}

/// Size of mip `lod` of an image of `size`
pub fn mip_size(size: UVec2, lod: u32) -> UVec2 {
    UVec2::new((size.x >> lod).max(1), (size.y >> lod).max(1))
}

/// Number of mips down to 1x1
pub fn full_mip_count(size: UVec2) -> u32 {
    let largest = size.x.max(size.y).max(1);
    32 - largest.leading_zeros()
}

impl Image {
    /// Black image with `lod_count` mips
    pub fn new(width: u32, height: u32, lod_count: u32, format: ImageFormat) -> Self {
        let size = UVec2::new(width, height);
        let lod_count = lod_count.clamp(1, full_mip_count(size));
        let mut image = Self {
            size,
            format,
            lod_count,
            data: Vec::new(),
        };
        image.data = vec![0; image.lod_offset(lod_count)];
        image
    }

    /// Single mip image from raw pixels
    pub fn from_pixels(width: u32, height: u32, format: ImageFormat, data: Vec<u8>) -> Self {
        assert_eq!(
            data.len(),
            (width * height) as usize * format.bytes_per_pixel(),
            "Pixel data does not match the image size"
        );
        Self {
            size: UVec2::new(width, height),
            format,
            lod_count: 1,
            data,
        }
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn lod_count(&self) -> u32 {
        self.lod_count
    }

    pub fn desc(&self) -> ImageDesc {
        ImageDesc {
            size: self.size,
            format: self.format,
            lods: self.lod_count,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    /// True for images without pixels
    pub fn is_empty(&self) -> bool {
        self.size.x == 0 || self.size.y == 0 || self.format == ImageFormat::None
    }

    fn lod_bytes(&self, lod: u32) -> usize {
        let size = mip_size(self.size, lod);
        (size.x * size.y) as usize * self.format.bytes_per_pixel()
    }

    fn lod_offset(&self, lod: u32) -> usize {
        (0..lod).map(|l| self.lod_bytes(l)).sum()
    }

    pub fn lod_data(&self, lod: u32) -> &[u8] {
        let start = self.lod_offset(lod);
        &self.data[start..start + self.lod_bytes(lod)]
    }

    pub fn lod_data_mut(&mut self, lod: u32) -> &mut [u8] {
        let start = self.lod_offset(lod);
        let len = self.lod_bytes(lod);
        &mut self.data[start..start + len]
    }

    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let bpp = self.format.bytes_per_pixel();
        let start = (y * self.size.x + x) as usize * bpp;
        &self.data[start..start + bpp]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, value: &[u8]) {
        let bpp = self.format.bytes_per_pixel();
        let start = (y * self.size.x + x) as usize * bpp;
        self.data[start..start + bpp].copy_from_slice(&value[..bpp]);
    }

    /// Copy of one mip as a single mip image
    pub fn extract_lod(&self, lod: u32) -> Image {
        let size = mip_size(self.size, lod);
        Image::from_pixels(size.x, size.y, self.format, self.lod_data(lod).to_vec())
    }

    /// Build `lod_count` mips from the first one with a 2x2 box filter
    pub fn generate_mips(&mut self, lod_count: u32) {
        let lod_count = lod_count.clamp(1, full_mip_count(self.size));
        let base = self.lod_data(0).to_vec();
        self.lod_count = lod_count;
        self.data = base;
        self.data.resize(self.lod_offset(lod_count), 0);

        let bpp = self.format.bytes_per_pixel();
        for lod in 1..lod_count {
            let src_size = mip_size(self.size, lod - 1);
            let dst_size = mip_size(self.size, lod);
            let src = self.lod_data(lod - 1).to_vec();
            let dst = self.lod_data_mut(lod);
            for y in 0..dst_size.y {
                for x in 0..dst_size.x {
                    for c in 0..bpp {
                        let mut sum = 0u32;
                        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                            let sx = (x * 2 + dx).min(src_size.x - 1);
                            let sy = (y * 2 + dy).min(src_size.y - 1);
                            sum += src[(sy * src_size.x + sx) as usize * bpp + c] as u32;
                        }
                        dst[(y * dst_size.x + x) as usize * bpp + c] = ((sum + 2) / 4) as u8;
                    }
                }
            }
        }
    }

    /// Every pixel of the first mip has the same value
    pub fn is_plain_colour(&self) -> bool {
        let bpp = self.format.bytes_per_pixel();
        if bpp == 0 {
            return true;
        }
        let first = self.lod_data(0);
        first.chunks_exact(bpp).all(|p| p == &first[..bpp])
    }

    /// First mip scaled to `size` with nearest sampling
    pub fn resized_nearest(&self, size: UVec2) -> Image {
        if size == self.size && self.lod_count == 1 {
            return self.clone();
        }
        let bpp = self.format.bytes_per_pixel();
        let mut data = vec![0u8; (size.x * size.y) as usize * bpp];
        for y in 0..size.y {
            let sy = (y as u64 * self.size.y as u64 / size.y.max(1) as u64) as u32;
            for x in 0..size.x {
                let sx = (x as u64 * self.size.x as u64 / size.x.max(1) as u64) as u32;
                let dst = (y * size.x + x) as usize * bpp;
                data[dst..dst + bpp].copy_from_slice(self.pixel(sx, sy));
            }
        }
        Image::from_pixels(size.x, size.y, self.format, data)
    }
}
