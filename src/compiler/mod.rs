//! Expression graph compiler
//!
//! `compile` deduplicates the graph, optionally sinks mesh formats towards
//! the leaves until nothing changes, deduplicates again and links the result
//! into a [`Program`].

pub mod ast;
pub mod constant;
pub mod dedup;
pub mod linker;
pub mod sink;

use std::sync::Arc;

pub use ast::{AstGraph, AstOp, OpId, Scalar};
pub use constant::{ConstantResource, ResourceValue};
pub use linker::{LinkStats, Linker};
pub use sink::{ensure_format_has_skinning_buffers, make_morph_target_format, MAX_TOTAL_INFLUENCES};

use crate::cache::ProxyFileContext;
use crate::config::ForgeConfig;
use crate::error::ForgeResult;
use crate::runtime::{OpAddress, Program};

/// Linked program and the address of its root operation
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub program: Program,
    pub root: OpAddress,
    pub stats: LinkStats,
}

/// Optimise and link the expression rooted at `root`
pub fn compile(
    graph: &mut AstGraph,
    root: OpId,
    config: &ForgeConfig,
    context: Option<&Arc<ProxyFileContext>>,
) -> ForgeResult<CompiledProgram> {
    let mut root = graph.deduplicate(root);

    let optimiser = &config.optimiser;
    if optimiser.enabled && optimiser.sink_mesh_formats {
        let mut iteration = 0;
        while iteration < optimiser.max_iterations {
            iteration += 1;
            let sunk = graph.sink_mesh_formats(root)?;
            let sunk = graph.deduplicate(sunk);
            if sunk == root {
                break;
            }
            root = sunk;
        }
        log::debug!("Mesh format sinking ran {iteration} iterations");
    }

    let mut program = Program::new();
    let mut linker = Linker::new(&mut program, &config.linker);
    let address = graph.link(root, &mut linker)?;
    let stats = linker.stats();

    log::info!(
        "Linked {} ops ({} bytes of code), {} mesh constants ({} shared), {} image lods ({} shared)",
        stats.ops,
        program.byte_code_size(),
        stats.mesh_constants,
        stats.shared_mesh_constants,
        stats.image_lods,
        stats.shared_image_lods
    );
    if let Some(context) = context {
        let proxy = context.stats();
        log::info!(
            "Proxy files: {} written ({} bytes), {} read ({} bytes)",
            proxy.files_written,
            proxy.bytes_written,
            proxy.files_read,
            proxy.bytes_read
        );
    }

    Ok(CompiledProgram {
        program,
        root: address,
        stats,
    })
}
