//! Constant resources of the AST
//!
//! A constant owns a baked mesh, image or layout. With a proxy context the
//! payload may live compressed or in a temporary file until the linker copies
//! it into the program, after which the payload is released.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use glam::IVec2;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::cache::{make_proxy, ProxyFileContext, ProxyLocation, ResourceProxy};
use crate::error::{ForgeError, ForgeResult};
use crate::image::{Image, ImageDesc};
use crate::layout::Layout;
use crate::mesh::Mesh;
use crate::runtime::DataType;
use crate::serialisation::{write_versioned, Versioned};

/// Payload of a constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResourceValue {
    Mesh(Arc<Mesh>),
    Image(Arc<Image>),
    Layout(Arc<Layout>),
}

impl Versioned for ResourceValue {
    const VERSION: u32 = 1;
    const KIND: [u8; 4] = *b"RSRC";
}

impl ResourceValue {
    pub fn data_type(&self) -> DataType {
        match self {
            ResourceValue::Mesh(_) => DataType::Mesh,
            ResourceValue::Image(_) => DataType::Image,
            ResourceValue::Layout(_) => DataType::Layout,
        }
    }

    /// Approximate payload size in bytes
    pub fn data_size(&self) -> usize {
        match self {
            ResourceValue::Mesh(mesh) => mesh.data_size(),
            ResourceValue::Image(image) => image.data_size(),
            ResourceValue::Layout(layout) => {
                layout.block_count() * std::mem::size_of::<crate::layout::LayoutBlock>()
            }
        }
    }

    pub fn as_mesh(&self) -> Option<&Arc<Mesh>> {
        match self {
            ResourceValue::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&Arc<Image>> {
        match self {
            ResourceValue::Image(image) => Some(image),
            _ => None,
        }
    }

    pub fn as_layout(&self) -> Option<&Arc<Layout>> {
        match self {
            ResourceValue::Layout(layout) => Some(layout),
            _ => None,
        }
    }
}

impl From<Mesh> for ResourceValue {
    fn from(mesh: Mesh) -> Self {
        ResourceValue::Mesh(Arc::new(mesh))
    }
}

impl From<Image> for ResourceValue {
    fn from(image: Image) -> Self {
        ResourceValue::Image(Arc::new(image))
    }
}

impl From<Layout> for ResourceValue {
    fn from(layout: Layout) -> Self {
        ResourceValue::Layout(Arc::new(layout))
    }
}

#[derive(Debug, Clone)]
enum ConstantStorage {
    Resident(ResourceValue),
    Proxy(Arc<dyn ResourceProxy<ResourceValue>>),
    /// Payload was moved into a linked program
    Released,
}

/// Constant node payload
///
/// Equality and hashing use the content hash of the serialised value and
/// only fall back to comparing payloads when the hashes match. Constants
/// generated from different source assets never compare equal.
#[derive(Debug, Clone)]
pub struct ConstantResource {
    kind: DataType,
    value_hash: u64,
    data_size: usize,
    storage: ConstantStorage,
    source_descriptor: Option<String>,
}

impl ConstantResource {
    /// Wrap a value, spilling it through `context` when one is given
    pub fn new(value: impl Into<ResourceValue>, context: Option<&Arc<ProxyFileContext>>) -> ForgeResult<Self> {
        let value = value.into();
        let archive = write_versioned(&value)?;
        let mut hasher = FxHasher::default();
        archive.hash(&mut hasher);

        let kind = value.data_type();
        let data_size = value.data_size();
        let storage = match context {
            Some(context) => {
                let proxy = make_proxy(Arc::new(value), context)?;
                ConstantStorage::Proxy(Arc::from(proxy))
            }
            None => ConstantStorage::Resident(value),
        };
        Ok(Self {
            kind,
            value_hash: hasher.finish(),
            data_size,
            storage,
            source_descriptor: None,
        })
    }

    /// Name of the asset the value was generated from
    pub fn with_source_descriptor(mut self, source: impl Into<String>) -> Self {
        self.source_descriptor = Some(source.into());
        self
    }

    pub fn source_descriptor(&self) -> Option<&str> {
        self.source_descriptor.as_deref()
    }

    pub fn data_type(&self) -> DataType {
        self.kind
    }

    pub fn value_hash(&self) -> u64 {
        self.value_hash
    }

    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Where the payload is kept; `None` once released
    pub fn location(&self) -> Option<ProxyLocation> {
        match &self.storage {
            ConstantStorage::Resident(_) => Some(ProxyLocation::Resident),
            ConstantStorage::Proxy(proxy) => Some(proxy.location()),
            ConstantStorage::Released => None,
        }
    }

    pub fn is_released(&self) -> bool {
        matches!(self.storage, ConstantStorage::Released)
    }

    /// Current value, deserialised again for spilled payloads
    pub fn value(&self) -> ForgeResult<ResourceValue> {
        match &self.storage {
            ConstantStorage::Resident(value) => Ok(value.clone()),
            ConstantStorage::Proxy(proxy) => Ok((*proxy.get()?).clone()),
            ConstantStorage::Released => Err(ForgeError::ValueDiscarded),
        }
    }

    /// Drop the payload and any temporary file behind it
    pub fn release(&mut self) {
        self.storage = ConstantStorage::Released;
    }

    /// Size in grid cells of a block of a layout constant
    pub fn get_block_layout_size(&self, block_id: u64) -> ForgeResult<Option<IVec2>> {
        let value = self.value()?;
        let Some(layout) = value.as_layout() else {
            return Ok(None);
        };
        Ok(layout.find_block(block_id).map(|index| layout.blocks()[index].size))
    }

    /// Colour of an image constant whose first mip holds a single colour
    pub fn is_image_plain_constant(&self) -> ForgeResult<Option<Vec<u8>>> {
        let value = self.value()?;
        let Some(image) = value.as_image() else {
            return Ok(None);
        };
        if image.is_empty() || !image.is_plain_colour() {
            return Ok(None);
        }
        Ok(Some(image.pixel(0, 0).to_vec()))
    }

    pub fn image_desc(&self) -> ForgeResult<Option<ImageDesc>> {
        Ok(self.value()?.as_image().map(|image| image.desc()))
    }
}

impl PartialEq for ConstantResource {
    fn eq(&self, other: &Self) -> bool {
        if self.kind != other.kind
            || self.value_hash != other.value_hash
            || self.data_size != other.data_size
            || self.source_descriptor != other.source_descriptor
        {
            return false;
        }
        match (self.value(), other.value()) {
            (Ok(a), Ok(b)) => a == b,
            (Err(ForgeError::ValueDiscarded), Err(ForgeError::ValueDiscarded)) => true,
            (Err(e), _) | (_, Err(e)) => {
                log::warn!("Could not load constant for comparison: {e}");
                false
            }
        }
    }
}

impl Eq for ConstantResource {}

impl Hash for ConstantResource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.value_hash.hash(state);
        self.source_descriptor.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyCacheConfig;
    use crate::image::ImageFormat;
    use crate::layout::LayoutBlock;

    fn layout_with_block(id: u64) -> Layout {
        let mut layout = Layout::new(IVec2::new(4, 4));
        layout.add_block(LayoutBlock::new(IVec2::ZERO, IVec2::new(2, 3), id));
        layout
    }

    #[test]
    fn test_equal_values_compare_equal() {
        let a = ConstantResource::new(layout_with_block(5), None).expect("Constant should succeed");
        let b = ConstantResource::new(layout_with_block(5), None).expect("Constant should succeed");
        let c = ConstantResource::new(layout_with_block(6), None).expect("Constant should succeed");
        assert_eq!(a, b);
        assert_eq!(a.value_hash(), b.value_hash());
        assert_ne!(a, c);
    }

    #[test]
    fn test_source_descriptor_separates_equal_values() {
        let a = ConstantResource::new(Layout::new(IVec2::new(4, 4)), None)
            .expect("Constant should succeed")
            .with_source_descriptor("A");
        let b = ConstantResource::new(Layout::new(IVec2::new(4, 4)), None)
            .expect("Constant should succeed")
            .with_source_descriptor("B");
        let untagged = ConstantResource::new(Layout::new(IVec2::new(4, 4)), None).expect("Constant should succeed");
        assert_eq!(a.value_hash(), b.value_hash());
        assert_ne!(a, b);
        assert_ne!(a, untagged);
        assert_eq!(a, a.clone());
        assert_eq!(a.source_descriptor(), Some("A"));
    }

    #[test]
    fn test_released_value_is_discarded() {
        let mut constant = ConstantResource::new(layout_with_block(1), None).expect("Constant should succeed");
        assert!(constant.value().is_ok());
        constant.release();
        assert!(constant.is_released());
        assert!(matches!(constant.value(), Err(ForgeError::ValueDiscarded)));
        assert_eq!(constant.location(), None);
    }

    #[test]
    fn test_layout_block_size() {
        let constant = ConstantResource::new(layout_with_block(9), None).expect("Constant should succeed");
        assert_eq!(
            constant.get_block_layout_size(9).expect("Lookup should succeed"),
            Some(IVec2::new(2, 3))
        );
        assert_eq!(constant.get_block_layout_size(10).expect("Lookup should succeed"), None);
    }

    #[test]
    fn test_plain_image_constant() {
        let plain = Image::from_pixels(2, 1, ImageFormat::RGB8, vec![1, 2, 3, 1, 2, 3]);
        let constant = ConstantResource::new(plain, None).expect("Constant should succeed");
        assert_eq!(
            constant.is_image_plain_constant().expect("Check should succeed"),
            Some(vec![1, 2, 3])
        );
        let desc = constant.image_desc().expect("Desc should succeed").expect("Image should have a desc");
        assert_eq!(desc.format, ImageFormat::RGB8);

        let mixed = Image::from_pixels(2, 1, ImageFormat::L8, vec![1, 2]);
        let constant = ConstantResource::new(mixed, None).expect("Constant should succeed");
        assert_eq!(constant.is_image_plain_constant().expect("Check should succeed"), None);
    }

    #[test]
    fn test_disabled_context_keeps_value_resident() {
        let config = ProxyCacheConfig {
            enabled: false,
            ..ProxyCacheConfig::default()
        };
        let context = Arc::new(ProxyFileContext::new(&config));
        let constant =
            ConstantResource::new(layout_with_block(3), Some(&context)).expect("Constant should succeed");
        assert_eq!(constant.location(), Some(ProxyLocation::Resident));
        assert!(constant.value().is_ok());
    }
}
