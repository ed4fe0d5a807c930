//! Print the contents of a saved mesh, layout, image or program file

use anyhow::{bail, Context};
use meshforge::runtime::OpAddress;
use meshforge::serialisation::{file_kind, load_file};
use meshforge::{Image, Layout, Mesh, Program, Versioned};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("Usage: meshforge-inspect <file>");
        std::process::exit(2);
    };

    if let Err(e) = inspect(&path) {
        log::error!("Inspecting {} failed: {:#}", path, e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn inspect(path: &str) -> anyhow::Result<()> {
    let data = std::fs::read(path).with_context(|| format!("Reading {path}"))?;
    let kind = file_kind(&data)?;
    log::info!("{} holds a {} resource", path, String::from_utf8_lossy(&kind));

    match kind {
        k if k == Mesh::KIND => {
            let mesh: Mesh = load_file(path)?;
            println!("Mesh: {} vertices, {} indices, {} surfaces", mesh.vertex_count(), mesh.index_count(), mesh.surface_count());
            println!("{}", mesh.log(8));
        }
        k if k == Layout::KIND => {
            let layout: Layout = load_file(path)?;
            println!("Layout {:?} with {} blocks", layout.grid_size(), layout.block_count());
            for block in layout.blocks() {
                println!("  block {:>6} at {:?} size {:?} priority {}", block.id, block.min, block.size, block.priority);
            }
        }
        k if k == Image::KIND => {
            let image: Image = load_file(path)?;
            let desc = image.desc();
            println!("Image {:?} {:?}, {} lods, {} bytes", desc.size, desc.format, desc.lods, image.data_size());
        }
        k if k == Program::KIND => {
            let program: Program = load_file(path)?;
            println!(
                "Program: {} ops, {} bytes of code, {} parameters, {} meshes, {} layouts, {} images",
                program.op_count(),
                program.byte_code_size(),
                program.parameters().len(),
                program.constant_mesh_count(),
                program.constant_layout_count(),
                program.constant_image_count()
            );
            for parameter in program.parameters() {
                println!("  parameter {} = {:?}", parameter.name, parameter.default);
            }
            for source in program.constant_sources() {
                println!("  {:?} constant {} from {}", source.kind, source.index, source.descriptor);
            }
            for address in 1..program.op_count() as OpAddress {
                println!("  {:>5}: {:?}", address, program.op_args(address)?);
            }
        }
        other => bail!("Unknown resource kind {}", String::from_utf8_lossy(&other)),
    }
    Ok(())
}
