//! Resource operations evaluated by the runtime

pub mod format;
pub mod image;
pub mod merge;

pub use format::{format_buffer_set, mesh_format, mesh_optimize_buffers, MeshFormatFlags};
pub use image::{image_blank_layout, image_compose};
pub use merge::mesh_merge;
