//! End-to-end tests: build an expression graph, compile it and evaluate the
//! resulting program.

use std::sync::Arc;

use glam::{IVec2, Vec3};
use tempfile::TempDir;

use meshforge::mesh::{build_position_mesh, BufferInit, ChannelReader, ChannelWriter, Component};
use meshforge::runtime::OpType;
use meshforge::{
    compile, load_file, save_file, AstGraph, AstOp, ConstantResource, DataType, ForgeConfig, ForgeError, Image,
    ImageFormat, Interpreter, Layout, LayoutBlock, Mesh, MeshBufferChannel, MeshBufferFormat, MeshBufferSemantic,
    MeshFormatFlags, OpId, Parameters, Program, Scalar,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn channel(semantic: MeshBufferSemantic, format: MeshBufferFormat, components: u16, offset: u16) -> MeshBufferChannel {
    MeshBufferChannel::new(semantic, 0, format, components, offset)
}

fn constant(graph: &mut AstGraph, value: impl Into<meshforge::ResourceValue>) -> OpId {
    let constant = ConstantResource::new(value, None).expect("Constant should succeed");
    graph.add(AstOp::ConstantResource(constant))
}

/// Four vertices with 8-bit bone indices
fn skinned_source() -> Mesh {
    let mut mesh = Mesh::new();
    let vertices = mesh.vertex_buffers_mut();
    vertices.set_buffer_count(1);
    vertices.set_element_count(4, BufferInit::Zeroed);
    vertices.set_buffer(
        0,
        14,
        &[
            channel(MeshBufferSemantic::Position, MeshBufferFormat::Float32, 3, 0),
            channel(MeshBufferSemantic::BoneIndices, MeshBufferFormat::UInt8, 2, 12),
        ],
    );
    let mut positions = ChannelWriter::at(vertices, 0, 0);
    for v in 0..4 {
        positions.set_from_vec3(v, Vec3::new(v as f32, 0.5, -1.0));
    }
    let mut bones = ChannelWriter::at(vertices, 0, 1);
    for v in 0..4 {
        bones.set_component(v, 0, Component::Integer(200));
        bones.set_component(v, 1, Component::Integer(v as i128));
    }
    mesh
}

fn target_format() -> Mesh {
    let mut mesh = Mesh::new();
    let vertices = mesh.vertex_buffers_mut();
    vertices.set_buffer_count(1);
    vertices.set_buffer(
        0,
        28,
        &[
            channel(MeshBufferSemantic::Position, MeshBufferFormat::Float32, 3, 0),
            channel(MeshBufferSemantic::Normal, MeshBufferFormat::Float32, 3, 12),
            channel(MeshBufferSemantic::BoneIndices, MeshBufferFormat::UInt16, 2, 24),
        ],
    );
    mesh
}

fn layout_with_block(id: u64) -> Layout {
    let mut layout = Layout::new(IVec2::new(2, 2));
    layout.add_block(LayoutBlock::new(IVec2::ZERO, IVec2::ONE, id));
    layout
}

#[test]
fn test_reformat_widens_bone_indices_and_adds_normals() {
    init_logging();
    let mut graph = AstGraph::new();
    let source = constant(&mut graph, skinned_source());
    let format = constant(&mut graph, target_format());
    let root = graph.add(AstOp::MeshFormat {
        source: Some(source),
        format: Some(format),
        flags: MeshFormatFlags::VERTEX,
    });

    let compiled = compile(&mut graph, root, &ForgeConfig::default(), None).expect("Compile should succeed");
    assert_eq!(compiled.program.op_type(compiled.root).expect("Root should decode"), OpType::MeshFormat);

    let interpreter = Interpreter::new(&compiled.program);
    let mesh = interpreter
        .build_mesh(compiled.root, &Parameters::new())
        .expect("Evaluation should succeed");

    let vertices = mesh.vertex_buffers();
    assert_eq!(vertices.element_count(), 4);
    let (buffer, _) = vertices
        .find_channel(MeshBufferSemantic::Position, 0)
        .expect("Position should exist");
    assert_eq!(vertices.element_size(buffer), 28);

    let positions = ChannelReader::new(vertices, MeshBufferSemantic::Position, 0).expect("Position should exist");
    let normals = ChannelReader::new(vertices, MeshBufferSemantic::Normal, 0).expect("Normal should exist");
    let bones = ChannelReader::new(vertices, MeshBufferSemantic::BoneIndices, 0).expect("Bones should exist");
    assert_eq!(bones.format(), MeshBufferFormat::UInt16);
    for v in 0..4 {
        assert_eq!(positions.as_vec3(v), Vec3::new(v as f32, 0.5, -1.0));
        assert_eq!(normals.as_vec3(v), Vec3::ZERO);
        assert_eq!(bones.as_int_vec(v), vec![200, v as i64]);
    }
}

#[test]
fn test_parameter_selects_merged_variant() {
    init_logging();
    let mut graph = AstGraph::new();
    let body = constant(&mut graph, build_position_mesh(&[Vec3::ZERO, Vec3::X, Vec3::Y], &[0, 1, 2]));
    let hat = constant(&mut graph, build_position_mesh(&[Vec3::Z, Vec3::ONE, Vec3::NEG_X], &[0, 1, 2]));
    let with_hat = graph.add(AstOp::MeshMerge {
        base: Some(body),
        added: Some(hat),
        new_surface_id: 7,
    });
    let tagged = graph.add(AstOp::MeshAddTags {
        source: Some(with_hat),
        tags: vec!["hat".into()],
    });
    let wear_hat = graph.add(AstOp::ParameterBool {
        name: "wear_hat".into(),
        default: false,
    });
    let root = graph.add(AstOp::Conditional {
        kind: DataType::Mesh,
        condition: Some(wear_hat),
        yes: Some(tagged),
        no: Some(body),
    });

    let compiled = compile(&mut graph, root, &ForgeConfig::default(), None).expect("Compile should succeed");
    assert_eq!(compiled.program.parameters().len(), 1);
    let interpreter = Interpreter::new(&compiled.program);

    let plain = interpreter
        .build_mesh(compiled.root, &Parameters::new())
        .expect("Evaluation should succeed");
    assert_eq!(plain.vertex_count(), 3);
    assert!(plain.tags().is_empty());

    let mut params = Parameters::new();
    params.set_bool("wear_hat", true);
    let dressed = interpreter
        .build_mesh(compiled.root, &params)
        .expect("Evaluation should succeed");
    assert_eq!(dressed.vertex_count(), 6);
    assert_eq!(dressed.tags(), ["hat".to_string()]);
}

#[test]
fn test_switch_over_layouts_then_pack() {
    init_logging();
    let mut graph = AstGraph::new();
    let a = constant(&mut graph, layout_with_block(1));
    let b = constant(&mut graph, layout_with_block(2));
    let merged = graph.add(AstOp::LayoutMerge {
        base: Some(a),
        added: Some(b),
    });
    let packed = graph.add(AstOp::LayoutPack { source: Some(merged) });
    let variant = graph.add(AstOp::ParameterInt {
        name: "variant".into(),
        default: 0,
    });
    let root = graph.add(AstOp::Switch {
        kind: DataType::Layout,
        variable: Some(variant),
        default: Some(a),
        cases: vec![(1, Some(packed)), (2, None)],
    });

    let compiled = compile(&mut graph, root, &ForgeConfig::default(), None).expect("Compile should succeed");
    let interpreter = Interpreter::new(&compiled.program);

    let fallback = interpreter
        .build_layout(compiled.root, &Parameters::new())
        .expect("Evaluation should succeed");
    assert_eq!(fallback.block_count(), 1);

    let mut params = Parameters::new();
    params.set_int("variant", 1);
    let layout = interpreter
        .build_layout(compiled.root, &params)
        .expect("Evaluation should succeed");
    assert_eq!(layout.block_count(), 2);
    assert!(layout.find_block(1).is_some());
    assert!(layout.find_block(2).is_some());

    params.set_int("variant", 2);
    let empty = interpreter
        .build_layout(compiled.root, &params)
        .expect("Evaluation should succeed");
    assert_eq!(empty.block_count(), 0);
}

#[test]
fn test_compose_block_into_blank_image() {
    init_logging();
    let mut graph = AstGraph::new();
    let layout = constant(&mut graph, layout_with_block(1));
    let blank = graph.add(AstOp::ImageBlankLayout {
        layout: Some(layout),
        block_size: [4, 4],
        format: ImageFormat::L8,
        mipmaps: 1,
    });
    let block = constant(&mut graph, Image::from_pixels(1, 1, ImageFormat::L8, vec![255]));
    let root = graph.add(AstOp::ImageCompose {
        layout: Some(layout),
        base: Some(blank),
        block_image: Some(block),
        mask: None,
        block_id: 1,
    });

    let compiled = compile(&mut graph, root, &ForgeConfig::default(), None).expect("Compile should succeed");
    let image = Interpreter::new(&compiled.program)
        .build_image(compiled.root, &Parameters::new())
        .expect("Evaluation should succeed");
    assert_eq!(image.size(), glam::UVec2::new(8, 8));
    assert_eq!(image.pixel(1, 1), &[255u8]);
    assert_eq!(image.pixel(6, 6), &[0u8]);
}

#[test]
fn test_saved_program_evaluates_the_same() {
    init_logging();
    let mut graph = AstGraph::new();
    let scale = graph.add(AstOp::ParameterScalar {
        name: "scale".into(),
        default: Scalar::new(0.5),
    });
    let fallback = graph.add(AstOp::ConstantScalar(Scalar::new(2.0)));
    let enabled = graph.add(AstOp::ParameterBool {
        name: "enabled".into(),
        default: true,
    });
    let root = graph.add(AstOp::Conditional {
        kind: DataType::Scalar,
        condition: Some(enabled),
        yes: Some(scale),
        no: Some(fallback),
    });
    let compiled = compile(&mut graph, root, &ForgeConfig::default(), None).expect("Compile should succeed");

    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("scale.prog");
    save_file(&path, &compiled.program).expect("Saving should succeed");
    let loaded: Program = load_file(&path).expect("Loading should succeed");
    assert_eq!(loaded, compiled.program);

    let interpreter = Interpreter::new(&loaded);
    let value = interpreter
        .build_scalar(compiled.root, &Parameters::new())
        .expect("Evaluation should succeed");
    assert_eq!(value, 0.5);

    let mut params = Parameters::new();
    params.set_bool("enabled", false);
    let value = interpreter
        .build_scalar(compiled.root, &params)
        .expect("Evaluation should succeed");
    assert_eq!(value, 2.0);
}

#[test]
fn test_unimplemented_operation_is_an_error() {
    init_logging();
    let mut graph = AstGraph::new();
    let base = constant(&mut graph, build_position_mesh(&[Vec3::ZERO], &[]));
    let factor = graph.add(AstOp::ConstantScalar(Scalar::new(0.5)));
    let root = graph.add(AstOp::MeshMorph {
        base: Some(base),
        target: Some(base),
        factor: Some(factor),
    });
    let compiled = compile(&mut graph, root, &ForgeConfig::default(), None).expect("Compile should succeed");
    let result = Interpreter::new(&compiled.program).build_mesh(compiled.root, &Parameters::new());
    assert!(matches!(result, Err(ForgeError::UnsupportedOperation(OpType::MeshMorph))));
}

#[test]
fn test_constants_are_released_after_compile() {
    init_logging();
    let mut graph = AstGraph::new();
    let mesh = Arc::new(build_position_mesh(&[Vec3::ZERO], &[]));
    let node = constant(&mut graph, (*mesh).clone());
    compile(&mut graph, node, &ForgeConfig::default(), None).expect("Compile should succeed");
    let AstOp::ConstantResource(constant) = graph.op(node) else {
        panic!("Expected a constant");
    };
    assert!(matches!(constant.value(), Err(ForgeError::ValueDiscarded)));
}
