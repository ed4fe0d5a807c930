//! Payload compression for spilled constants
//!
//! `pack` decides how a proxy payload is stored: compressed when the codec
//! produces data, raw otherwise. `unpack` reverses whichever choice was made.

use std::borrow::Cow;
use std::io::{Read, Write};

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression as FlateCompression;
use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, ForgeResult};

/// Compression algorithms for spilled constants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionType {
    /// Store payloads as they are
    None,
    /// Gzip compression (good compression, moderate speed)
    Gzip,
    /// Zlib compression (faster than gzip)
    Zlib,
    /// Zstandard compression (best compression ratio)
    Zstd,
    /// LZ4 compression (fastest)
    Lz4,
}

/// Compression level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionLevel {
    Fast,
    Default,
    Best,
}

impl CompressionLevel {
    fn flate(self) -> FlateCompression {
        match self {
            CompressionLevel::Fast => FlateCompression::fast(),
            CompressionLevel::Default => FlateCompression::default(),
            CompressionLevel::Best => FlateCompression::best(),
        }
    }

    #[cfg(feature = "native")]
    fn zstd(self) -> i32 {
        match self {
            CompressionLevel::Fast => 1,
            CompressionLevel::Default => 3,
            CompressionLevel::Best => 9,
        }
    }
}

/// Payload as a proxy stores it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packed {
    pub bytes: Vec<u8>,
    /// Whether `bytes` must go through the codec before deserialising
    pub compressed: bool,
}

/// Compresses and decompresses proxy payloads
#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    compression_type: CompressionType,
    compression_level: CompressionLevel,
}

impl Compressor {
    pub fn new(compression_type: CompressionType, compression_level: CompressionLevel) -> Self {
        Self {
            compression_type,
            compression_level,
        }
    }

    pub fn compression_type(&self) -> CompressionType {
        self.compression_type
    }

    /// Compress `archive` for storage, keeping it raw when the codec fails
    /// or yields nothing
    pub fn pack(&self, archive: Vec<u8>) -> Packed {
        if self.compression_type == CompressionType::None {
            return Packed {
                bytes: archive,
                compressed: false,
            };
        }
        match self.compress(&archive) {
            Ok(bytes) if !bytes.is_empty() => {
                log::trace!(
                    "{:?} packed {} bytes into {}",
                    self.compression_type,
                    archive.len(),
                    bytes.len()
                );
                Packed { bytes, compressed: true }
            }
            Ok(_) => {
                log::warn!("Compression produced no data, storing {} bytes uncompressed", archive.len());
                Packed {
                    bytes: archive,
                    compressed: false,
                }
            }
            Err(e) => {
                log::warn!("{e}, storing {} bytes uncompressed", archive.len());
                Packed {
                    bytes: archive,
                    compressed: false,
                }
            }
        }
    }

    /// Archive bytes behind a stored payload
    pub fn unpack<'a>(&self, bytes: Cow<'a, [u8]>, compressed: bool) -> ForgeResult<Cow<'a, [u8]>> {
        if compressed {
            Ok(Cow::Owned(self.decompress(&bytes)?))
        } else {
            Ok(bytes)
        }
    }

    /// Compress data
    pub fn compress(&self, data: &[u8]) -> ForgeResult<Vec<u8>> {
        let level = self.compression_level;
        match self.compression_type {
            CompressionType::None => Ok(data.to_vec()),
            CompressionType::Gzip => {
                encode(GzEncoder::new(Vec::new(), level.flate()), data, "Gzip", GzEncoder::finish)
            }
            CompressionType::Zlib => {
                encode(ZlibEncoder::new(Vec::new(), level.flate()), data, "Zlib", ZlibEncoder::finish)
            }
            CompressionType::Zstd => compress_zstd(data, level),
            CompressionType::Lz4 => compress_lz4(data),
        }
    }

    /// Decompress data
    pub fn decompress(&self, data: &[u8]) -> ForgeResult<Vec<u8>> {
        match self.compression_type {
            CompressionType::None => Ok(data.to_vec()),
            CompressionType::Gzip => decode(GzDecoder::new(data), "Gzip"),
            CompressionType::Zlib => decode(ZlibDecoder::new(data), "Zlib"),
            CompressionType::Zstd => decompress_zstd(data),
            CompressionType::Lz4 => decompress_lz4(data),
        }
    }
}

fn encode<E: Write>(
    mut encoder: E,
    data: &[u8],
    codec: &str,
    finish: fn(E) -> std::io::Result<Vec<u8>>,
) -> ForgeResult<Vec<u8>> {
    encoder
        .write_all(data)
        .map_err(|e| ForgeError::Compression(format!("{codec} compression failed: {e}")))?;
    finish(encoder).map_err(|e| ForgeError::Compression(format!("{codec} finalization failed: {e}")))
}

fn decode(mut decoder: impl Read, codec: &str) -> ForgeResult<Vec<u8>> {
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ForgeError::Decompression(format!("{codec} decompression failed: {e}")))?;
    Ok(out)
}

#[cfg(feature = "native")]
fn compress_zstd(data: &[u8], level: CompressionLevel) -> ForgeResult<Vec<u8>> {
    zstd::encode_all(data, level.zstd()).map_err(|e| ForgeError::Compression(format!("Zstd compression failed: {e}")))
}

#[cfg(feature = "native")]
fn decompress_zstd(data: &[u8]) -> ForgeResult<Vec<u8>> {
    zstd::decode_all(data).map_err(|e| ForgeError::Decompression(format!("Zstd decompression failed: {e}")))
}

#[cfg(feature = "native")]
fn compress_lz4(data: &[u8]) -> ForgeResult<Vec<u8>> {
    Ok(lz4_flex::compress_prepend_size(data))
}

#[cfg(feature = "native")]
fn decompress_lz4(data: &[u8]) -> ForgeResult<Vec<u8>> {
    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| ForgeError::Decompression(format!("LZ4 decompression failed: {e}")))
}

#[cfg(not(feature = "native"))]
fn compress_zstd(_data: &[u8], _level: CompressionLevel) -> ForgeResult<Vec<u8>> {
    Err(ForgeError::Compression("Zstd requires the native feature".to_string()))
}

#[cfg(not(feature = "native"))]
fn decompress_zstd(_data: &[u8]) -> ForgeResult<Vec<u8>> {
    Err(ForgeError::Decompression("Zstd requires the native feature".to_string()))
}

#[cfg(not(feature = "native"))]
fn compress_lz4(_data: &[u8]) -> ForgeResult<Vec<u8>> {
    Err(ForgeError::Compression("LZ4 requires the native feature".to_string()))
}

#[cfg(not(feature = "native"))]
fn decompress_lz4(_data: &[u8]) -> ForgeResult<Vec<u8>> {
    Err(ForgeError::Decompression("LZ4 requires the native feature".to_string()))
}
