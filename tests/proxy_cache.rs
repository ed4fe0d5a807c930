//! Constant proxies under the three storage regimes

use std::sync::Arc;

use rand::RngCore;
use tempfile::TempDir;

use meshforge::cache::{CompressionType, ProxyFileContext, ProxyLocation};
use meshforge::{compile, AstGraph, AstOp, ConstantResource, ForgeConfig, Image, ImageFormat, ProxyCacheConfig};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn context_in(dir: &TempDir) -> Arc<ProxyFileContext> {
    let config = ProxyCacheConfig {
        min_proxy_file_size: 1024,
        temp_dir: Some(dir.path().to_path_buf()),
        compression: CompressionType::Gzip,
        ..ProxyCacheConfig::default()
    };
    Arc::new(ProxyFileContext::new(&config))
}

fn noise_image(size: u32) -> Image {
    let mut data = vec![0u8; (size * size) as usize];
    rand::thread_rng().fill_bytes(&mut data);
    Image::from_pixels(size, size, ImageFormat::L8, data)
}

#[test]
fn test_small_constant_stays_resident() {
    init_logging();
    let dir = TempDir::new().expect("Failed to create temp dir");
    let context = context_in(&dir);
    let image = Image::from_pixels(4, 4, ImageFormat::L8, vec![3; 16]);
    let constant = ConstantResource::new(image.clone(), Some(&context)).expect("Constant should succeed");

    assert_eq!(constant.location(), Some(ProxyLocation::Resident));
    let value = constant.value().expect("Value should load");
    assert_eq!(**value.as_image().expect("Value should be an image"), image);
    assert_eq!(context.stats().files_written, 0);
}

#[test]
fn test_compressible_constant_stays_in_memory() {
    init_logging();
    let dir = TempDir::new().expect("Failed to create temp dir");
    let context = context_in(&dir);
    let image = Image::from_pixels(128, 128, ImageFormat::L8, vec![9; 128 * 128]);
    let constant = ConstantResource::new(image.clone(), Some(&context)).expect("Constant should succeed");

    match constant.location() {
        Some(ProxyLocation::Memory { size, compressed }) => {
            assert!(compressed);
            assert!(size <= 1024);
        }
        other => panic!("Expected compressed bytes in memory, got {other:?}"),
    }
    let value = constant.value().expect("Value should load");
    assert_eq!(**value.as_image().expect("Value should be an image"), image);
    assert_eq!(context.stats().files_written, 0);
}

#[test]
fn test_large_constant_spills_to_a_file_removed_on_release() {
    init_logging();
    let dir = TempDir::new().expect("Failed to create temp dir");
    let context = context_in(&dir);
    let image = noise_image(64);
    let mut constant = ConstantResource::new(image.clone(), Some(&context)).expect("Constant should succeed");

    let Some(ProxyLocation::File { path, .. }) = constant.location() else {
        panic!("Expected a spilled constant");
    };
    assert!(path.starts_with(dir.path()));
    assert!(path.exists());

    for _ in 0..2 {
        let value = constant.value().expect("Value should load");
        assert_eq!(**value.as_image().expect("Value should be an image"), image);
    }
    let stats = context.stats();
    assert_eq!(stats.files_written, 1);
    assert_eq!(stats.files_read, 2);

    constant.release();
    assert!(!path.exists());
}

#[test]
fn test_clones_share_the_spilled_file() {
    init_logging();
    let dir = TempDir::new().expect("Failed to create temp dir");
    let context = context_in(&dir);
    let constant = ConstantResource::new(noise_image(64), Some(&context)).expect("Constant should succeed");
    let copy = constant.clone();

    let Some(ProxyLocation::File { path, .. }) = constant.location() else {
        panic!("Expected a spilled constant");
    };
    drop(constant);
    assert!(path.exists());
    assert!(copy.value().is_ok());
    drop(copy);
    assert!(!path.exists());
}

#[test]
fn test_compile_consumes_spilled_constants() {
    init_logging();
    let dir = TempDir::new().expect("Failed to create temp dir");
    let context = context_in(&dir);
    let image = noise_image(64);

    let mut graph = AstGraph::new();
    let node = graph.add(AstOp::ConstantResource(
        ConstantResource::new(image.clone(), Some(&context)).expect("Constant should succeed"),
    ));
    let compiled =
        compile(&mut graph, node, &ForgeConfig::default(), Some(&context)).expect("Compile should succeed");

    assert_eq!(compiled.program.constant_image_count(), 1);
    assert_eq!(*compiled.program.constant_image(0).expect("Image should rebuild"), image);
    assert_eq!(std::fs::read_dir(dir.path()).expect("Temp dir should list").count(), 0);
}
