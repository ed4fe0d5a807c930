//! Mesh and image expression compiler and evaluator
//!
//! Expressions over meshes, images and UV layouts are built as an
//! [`AstGraph`], compiled into a flat [`Program`] and evaluated with an
//! [`Interpreter`] for a given set of [`Parameters`].

pub mod cache;
pub mod compiler;
pub mod config;
pub mod error;
pub mod image;
pub mod layout;
pub mod memory;
pub mod mesh;
pub mod ops;
pub mod runtime;
pub mod serialisation;

pub use compiler::{compile, AstGraph, AstOp, CompiledProgram, ConstantResource, OpId, ResourceValue, Scalar};
pub use config::{ForgeConfig, LinkerConfig, OptimiserConfig, ProxyCacheConfig};
pub use error::{ForgeError, ForgeResult};
pub use image::{Image, ImageFormat};
pub use layout::{Layout, LayoutBlock};
pub use memory::MemoryCounter;
pub use mesh::{Mesh, MeshBufferChannel, MeshBufferFormat, MeshBufferSemantic, MeshBufferSet};
pub use ops::MeshFormatFlags;
pub use runtime::{DataType, Interpreter, OpAddress, Parameters, Program};
pub use serialisation::{load_file, read_versioned, save_file, write_versioned, Versioned};
