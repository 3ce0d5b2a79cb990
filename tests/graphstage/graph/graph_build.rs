use anyhow::Result;
use graphstage::{
    BinaryOp, DType, Error, Graph, HostBuffer, OutputNode, ReduceFn, Shape, UnaryOp, ValueShape,
};

use crate::common;

#[test]
fn operator_mapping_add_sub_mul() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    for (op, want) in [
        (BinaryOp::Add, 10i32),
        (BinaryOp::Sub, 4),
        (BinaryOp::Mul, 21),
        (BinaryOp::Div, 2),
        (BinaryOp::Rem, 1),
    ] {
        let mut graph = Graph::new(&platform, "binary");
        let x = graph.argument("x", &common::scalar_shape::<i32>(), 0)?;
        let y = graph.argument("y", &common::scalar_shape::<i32>(), 1)?;
        let result = graph.binary(op, &x, &y)?;
        let out = common::run_single(
            graph,
            &device,
            OutputNode::new(result, common::scalar_shape::<i32>()),
            &[
                device.send(&HostBuffer::scalar(7i32))?,
                device.send(&HostBuffer::scalar(3i32))?,
            ],
        )?;
        assert_eq!(common::elements::<i32>(&out)?, vec![want], "{op}");
    }
    Ok(())
}

#[test]
fn shift_right_is_arithmetic_for_signed() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "sar");
    let x = graph.argument("x", &common::scalar_shape::<i32>(), 0)?;
    let amount = graph.constant(&HostBuffer::scalar(1i32))?;
    let shifted = graph.binary(BinaryOp::Shr, &x, &amount)?;
    let out = common::run_single(
        graph,
        &device,
        OutputNode::new(shifted, common::scalar_shape::<i32>()),
        &[device.send(&HostBuffer::scalar(-8i32))?],
    )?;
    assert_eq!(common::elements::<i32>(&out)?, vec![-4]);
    Ok(())
}

#[test]
fn shift_right_is_logical_for_unsigned() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "shr");
    let x = graph.argument("x", &common::scalar_shape::<u32>(), 0)?;
    let amount = graph.constant(&HostBuffer::scalar(1u32))?;
    let shifted = graph.binary(BinaryOp::Shr, &x, &amount)?;
    let out = common::run_single(
        graph,
        &device,
        OutputNode::new(shifted, common::scalar_shape::<u32>()),
        &[device.send(&HostBuffer::scalar(0x8000_0000u32))?],
    )?;
    assert_eq!(common::elements::<u32>(&out)?, vec![0x4000_0000]);
    Ok(())
}

#[test]
fn and_not_has_no_mapping() -> Result<()> {
    let platform = common::platform();
    let mut graph = Graph::new(&platform, "andnot");
    let x = graph.argument("x", &common::scalar_shape::<i32>(), 0)?;
    let y = graph.argument("y", &common::scalar_shape::<i32>(), 1)?;
    match graph.binary(BinaryOp::AndNot, &x, &y) {
        Err(Error::UnsupportedOperator(op)) => assert_eq!(op, "&^"),
        other => panic!("expected UnsupportedOperator, got {other:?}"),
    }
    Ok(())
}

#[test]
fn unary_plus_is_identity() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "plus");
    let x = graph.argument("x", &common::scalar_shape::<f32>(), 0)?;
    let same = graph.unary(UnaryOp::Plus, &x)?;
    let out = common::run_single(
        graph,
        &device,
        OutputNode::new(same, common::scalar_shape::<f32>()),
        &[device.send(&HostBuffer::scalar(2.5f32))?],
    )?;
    assert_eq!(common::elements::<f32>(&out)?, vec![2.5]);
    Ok(())
}

#[test]
fn reduce_empty_axes_is_identity() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    for op in [ReduceFn::Sum, ReduceFn::Prod, ReduceFn::Max, ReduceFn::Min] {
        let mut graph = Graph::new(&platform, "reduce_identity");
        let shape = Shape::new(DType::F32, vec![3]);
        let x = graph.argument("x", &shape, 0)?;
        let reduced = graph.reduce_fn(op, &x, &[])?;
        // The node comes back untouched, not wrapped in a reduction.
        assert_eq!(
            graph.node_shape(&reduced)?,
            ValueShape::Array(shape.clone())
        );
        let out = common::run_single(
            graph,
            &device,
            OutputNode::new(reduced, shape),
            &[device.send(&HostBuffer::of::<f32>(&[1.0, 2.0, 3.0], vec![3])?)?],
        )?;
        assert_eq!(common::elements::<f32>(&out)?, vec![1.0, 2.0, 3.0]);
    }
    Ok(())
}

#[test]
fn reduce_sum_over_axis() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "reduce_sum");
    let x = graph.argument("x", &Shape::new(DType::I32, vec![2, 3]), 0)?;
    let summed = graph.reduce_fn(ReduceFn::Sum, &x, &[1])?;
    let out_shape = Shape::new(DType::I32, vec![2]);
    assert_eq!(
        graph.node_shape(&summed)?,
        ValueShape::Array(out_shape.clone())
    );
    let out = common::run_single(
        graph,
        &device,
        OutputNode::new(summed, out_shape),
        &[device.send(&HostBuffer::of::<i32>(&[1, 2, 3, 4, 5, 6], vec![2, 3])?)?],
    )?;
    assert_eq!(common::elements::<i32>(&out)?, vec![6, 15]);
    Ok(())
}

#[test]
fn cast_converts_values() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "cast");
    let x = graph.argument("x", &common::scalar_shape::<f32>(), 0)?;
    let as_int = graph.cast(&x, DType::I32)?;
    let out = common::run_single(
        graph,
        &device,
        OutputNode::new(as_int, common::scalar_shape::<i32>()),
        &[device.send(&HostBuffer::scalar(2.75f32))?],
    )?;
    assert_eq!(common::elements::<i32>(&out)?, vec![2]);
    Ok(())
}

#[test]
fn bitcast_reinterprets_bits() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "bitcast");
    let x = graph.argument("x", &common::scalar_shape::<f32>(), 0)?;
    let bits = graph.bitcast(&x, DType::U32)?;
    let out = common::run_single(
        graph,
        &device,
        OutputNode::new(bits, common::scalar_shape::<u32>()),
        &[device.send(&HostBuffer::scalar(1.0f32))?],
    )?;
    assert_eq!(common::elements::<u32>(&out)?, vec![1.0f32.to_bits()]);
    Ok(())
}

#[test]
fn constant_rejects_unsupported_dtype() -> Result<()> {
    let platform = common::platform();
    let mut graph = Graph::new(&platform, "bf16");
    let data = HostBuffer::from_bytes(Shape::new(DType::Bf16, vec![2]), vec![0u8; 4])?;
    match graph.constant(&data) {
        Err(Error::UnsupportedDType { dtype, .. }) => assert_eq!(dtype, DType::Bf16),
        other => panic!("expected UnsupportedDType, got {other:?}"),
    }
    Ok(())
}

#[test]
fn tuple_element_and_unpack() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "tuple");
    let a = graph.constant(&HostBuffer::scalar(1i32))?;
    let b = graph.constant(&HostBuffer::scalar(2.0f32))?;
    let pair = graph.tuple(&[a, b])?;
    assert_eq!(pair.tuple_size(), Some(2));

    let parts = graph.unpack(&pair)?;
    assert_eq!(parts.len(), 2);

    match graph.tuple_element(&pair, 2) {
        Err(Error::InvalidArgument(message)) => {
            assert!(message.contains("out of range"), "{message}")
        }
        other => panic!("expected InvalidArgument, got {other:?}"),
    }

    let second = graph.tuple_element(&pair, 1)?;
    let out = common::run_single(
        graph,
        &device,
        OutputNode::new(second, common::scalar_shape::<f32>()),
        &[],
    )?;
    assert_eq!(common::elements::<f32>(&out)?, vec![2.0]);
    Ok(())
}

#[test]
fn plain_node_does_not_upgrade_to_tuple() -> Result<()> {
    let platform = common::platform();
    let mut graph = Graph::new(&platform, "upgrade");
    let x = graph.constant(&HostBuffer::scalar(1i32))?;
    assert!(matches!(
        graph.as_tuple(&x),
        Err(Error::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
fn nodes_are_scoped_to_their_graph() -> Result<()> {
    let platform = common::platform();
    let mut first = Graph::new(&platform, "first");
    let mut second = Graph::new(&platform, "second");
    let x = first.argument("x", &common::scalar_shape::<i32>(), 0)?;
    let y = second.argument("y", &common::scalar_shape::<i32>(), 0)?;
    match second.binary(BinaryOp::Add, &x, &y) {
        Err(Error::InvalidArgument(message)) => {
            assert!(message.contains("does not belong"), "{message}")
        }
        other => panic!("expected InvalidArgument, got {other:?}"),
    }
    Ok(())
}

#[test]
fn structural_dump_shows_dependencies() -> Result<()> {
    let platform = common::platform();
    let mut graph = Graph::new(&platform, "dump");
    let x = graph.argument("x", &common::scalar_shape::<f32>(), 0)?;
    let c = graph.constant(&HostBuffer::scalar(1.0f32))?;
    let sum = graph.binary(BinaryOp::Add, &x, &c)?;
    let text = sum.to_string();
    assert!(text.starts_with("Add {"), "{text}");
    assert!(text.contains("Arg[x: f32[]]"), "{text}");
    assert!(text.contains("Constant[f32[]]"), "{text}");
    Ok(())
}
