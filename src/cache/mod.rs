//! Constant-resource cache used while compiling
//!
//! Keeps peak memory bounded by replacing large constants with compressed
//! bytes or temporary files until the linker needs them.

pub mod compression;
pub mod proxy;

pub use compression::{CompressionLevel, CompressionType, Compressor, Packed};
pub use proxy::{
    make_proxy, InMemoryProxy, ProxyFileContext, ProxyLocation, ProxyStats, ResourceProxy, TempFileProxy,
};
