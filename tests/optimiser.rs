//! Graph optimisations observed through compiled programs

use glam::Vec3;

use meshforge::mesh::{build_position_mesh, ChannelReader};
use meshforge::runtime::{OpArgs, OpType};
use meshforge::{
    compile, AstGraph, AstOp, ConstantResource, DataType, ForgeConfig, Interpreter, Mesh, MeshBufferChannel,
    MeshBufferFormat, MeshBufferSemantic, MeshFormatFlags, OpId, Parameters,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn constant(graph: &mut AstGraph, mesh: Mesh) -> OpId {
    let constant = ConstantResource::new(mesh, None).expect("Constant should succeed");
    graph.add(AstOp::ConstantResource(constant))
}

fn half_position_format() -> Mesh {
    let mut mesh = Mesh::new();
    let vertices = mesh.vertex_buffers_mut();
    vertices.set_buffer_count(1);
    vertices.set_buffer(
        0,
        6,
        &[MeshBufferChannel::new(MeshBufferSemantic::Position, 0, MeshBufferFormat::Float16, 3, 0)],
    );
    mesh
}

/// Format(Merge(a, b)) under a parameter-driven conditional
fn formatted_merge(graph: &mut AstGraph) -> OpId {
    let a = constant(graph, build_position_mesh(&[Vec3::ZERO, Vec3::X, Vec3::Y], &[0, 1, 2]));
    let b = constant(graph, build_position_mesh(&[Vec3::Z, Vec3::ONE, Vec3::NEG_Y], &[0, 1, 2]));
    let merged = graph.add(AstOp::MeshMerge {
        base: Some(a),
        added: Some(b),
        new_surface_id: 1,
    });
    let flag = graph.add(AstOp::ParameterBool {
        name: "merged".into(),
        default: true,
    });
    let choice = graph.add(AstOp::Conditional {
        kind: DataType::Mesh,
        condition: Some(flag),
        yes: Some(merged),
        no: Some(a),
    });
    let format = constant(graph, half_position_format());
    graph.add(AstOp::MeshFormat {
        source: Some(choice),
        format: Some(format),
        flags: MeshFormatFlags::VERTEX,
    })
}

fn evaluate(config: &ForgeConfig, params: &Parameters) -> (OpType, std::sync::Arc<Mesh>) {
    let mut graph = AstGraph::new();
    let root = formatted_merge(&mut graph);
    let compiled = compile(&mut graph, root, config, None).expect("Compile should succeed");
    let root_type = compiled.program.op_type(compiled.root).expect("Root should decode");
    let mesh = Interpreter::new(&compiled.program)
        .build_mesh(compiled.root, params)
        .expect("Evaluation should succeed");
    (root_type, mesh)
}

#[test]
fn test_sinking_moves_format_below_conditional() {
    init_logging();
    let (root_type, _) = evaluate(&ForgeConfig::default(), &Parameters::new());
    assert_eq!(root_type, OpType::Conditional);

    let mut config = ForgeConfig::default();
    config.optimiser.enabled = false;
    let (root_type, _) = evaluate(&config, &Parameters::new());
    assert_eq!(root_type, OpType::MeshFormat);
}

#[test]
fn test_sinking_preserves_results() {
    init_logging();
    let mut unoptimised = ForgeConfig::default();
    unoptimised.optimiser.sink_mesh_formats = false;

    for merged in [true, false] {
        let mut params = Parameters::new();
        params.set_bool("merged", merged);
        let (_, sunk) = evaluate(&ForgeConfig::default(), &params);
        let (_, direct) = evaluate(&unoptimised, &params);

        assert_eq!(sunk.vertex_count(), if merged { 6 } else { 3 });
        assert_eq!(sunk.vertex_count(), direct.vertex_count());
        let a = ChannelReader::new(sunk.vertex_buffers(), MeshBufferSemantic::Position, 0)
            .expect("Position should exist");
        let b = ChannelReader::new(direct.vertex_buffers(), MeshBufferSemantic::Position, 0)
            .expect("Position should exist");
        assert_eq!(a.format(), MeshBufferFormat::Float16);
        assert_eq!(b.format(), MeshBufferFormat::Float16);
        for v in 0..sunk.vertex_count() {
            assert_eq!(a.as_vec3(v), b.as_vec3(v));
        }
    }
}

#[test]
fn test_shared_format_constant_is_linked_once() {
    init_logging();
    let mut graph = AstGraph::new();
    let root = formatted_merge(&mut graph);
    let compiled = compile(&mut graph, root, &ForgeConfig::default(), None).expect("Compile should succeed");

    let mut format_sources = Vec::new();
    for address in 1..compiled.program.op_count() as u32 {
        if let OpArgs::MeshFormat { format, .. } = compiled.program.op_args(address).expect("Op should decode") {
            format_sources.push(format);
        }
    }
    assert!(format_sources.len() >= 2);
    assert!(format_sources.windows(2).all(|w| w[0] == w[1]));
    // Two source meshes and one format
    assert_eq!(compiled.program.constant_mesh_count(), 3);
}

#[test]
fn test_config_from_toml() {
    init_logging();
    let config = ForgeConfig::from_toml_str(
        r#"
        [optimiser]
        sink_mesh_formats = false

        [linker]
        separate_image_mips = true
        "#,
    )
    .expect("Parsing should succeed");
    assert!(!config.optimiser.sink_mesh_formats);
    assert!(config.optimiser.enabled);
    assert!(config.linker.separate_image_mips);
    assert!(config.linker.deduplicate_constants);
}
