//! Mesh resources and their buffer storage

pub mod buffer_set;
pub mod format;
pub mod iter;
#[allow(clippy::module_inception)]
pub mod mesh;
pub mod skeleton;
pub mod vertex_map;

pub use buffer_set::{BufferInit, MeshBuffer, MeshBufferChannel, MeshBufferSet};
pub use format::{Component, MeshBufferFormat, MeshBufferSemantic};
pub use iter::{ChannelReader, ChannelWriter, VertexIdIter};
pub use mesh::{
    build_position_mesh, BonePose, BoneUsageFlags, Mesh, MeshBufferType, MeshCopyFlags, MeshFlags,
    MeshSurface, SurfaceRange, SurfaceSubMesh, Transform3,
};
pub use skeleton::{BodyAggregate, BoneName, BoxBody, PhysicsBody, Skeleton, SphereBody};
pub use vertex_map::VertexMatchMap;
