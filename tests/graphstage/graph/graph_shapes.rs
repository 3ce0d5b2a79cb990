use anyhow::Result;
use graphstage::{DType, Error, Graph, HostBuffer, OutputNode, Shape, ValueShape};

use crate::common;

fn array_shape(graph: &Graph, node: &graphstage::Node) -> Result<Shape> {
    match graph.node_shape(node)? {
        ValueShape::Array(shape) => Ok(shape),
        other => anyhow::bail!("expected array shape, got {other}"),
    }
}

#[test]
fn slice_drops_the_leading_axis() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "slice");
    let x = graph.argument("x", &Shape::new(DType::I32, vec![4, 3]), 0)?;
    let row = graph.slice(&x, 2)?;
    let row_shape = array_shape(&graph, &row)?;
    assert_eq!(row_shape.axis_lengths, vec![3]);

    let data: Vec<i32> = (0..12).collect();
    let out = common::run_single(
        graph,
        &device,
        OutputNode::new(row, row_shape),
        &[device.send(&HostBuffer::of::<i32>(&data, vec![4, 3])?)?],
    )?;
    assert_eq!(common::elements::<i32>(&out)?, vec![6, 7, 8]);
    Ok(())
}

#[test]
fn slice_rejects_out_of_bounds_index() -> Result<()> {
    let platform = common::platform();
    let mut graph = Graph::new(&platform, "slice_oob");
    let x = graph.argument("x", &Shape::new(DType::I32, vec![2, 3]), 0)?;
    assert!(matches!(graph.slice(&x, 2), Err(Error::InvalidArgument(_))));
    Ok(())
}

#[test]
fn split_stacks_pieces_on_a_new_axis() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "split");
    let x = graph.argument("x", &Shape::new(DType::I32, vec![4, 3]), 0)?;
    let stacked = graph.split(&x, 0, 2)?;
    let stacked_shape = array_shape(&graph, &stacked)?;
    assert_eq!(stacked_shape.axis_lengths, vec![2, 2, 3]);

    let data: Vec<i32> = (0..12).collect();
    let out = common::run_single(
        graph,
        &device,
        OutputNode::new(stacked, stacked_shape),
        &[device.send(&HostBuffer::of::<i32>(&data, vec![4, 3])?)?],
    )?;
    // Stacking along the synthetic axis keeps the original element order.
    assert_eq!(common::elements::<i32>(&out)?, data);
    Ok(())
}

#[test]
fn split_requires_divisible_axis() -> Result<()> {
    let platform = common::platform();
    let mut graph = Graph::new(&platform, "split_bad");
    let x = graph.argument("x", &Shape::new(DType::I32, vec![4, 3]), 0)?;
    match graph.split(&x, 0, 3) {
        Err(Error::InvalidArgument(message)) => {
            assert!(message.contains("split"), "{message}")
        }
        other => panic!("expected InvalidArgument, got {other:?}"),
    }
    assert!(matches!(
        graph.split(&x, 5, 1),
        Err(Error::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
fn concat_joins_along_the_axis() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "concat");
    let a = graph.argument("a", &Shape::new(DType::F32, vec![2, 3]), 0)?;
    let b = graph.argument("b", &Shape::new(DType::F32, vec![1, 3]), 1)?;
    let joined = graph.concat(0, &[a, b])?;
    let joined_shape = array_shape(&graph, &joined)?;
    assert_eq!(joined_shape.axis_lengths, vec![3, 3]);

    let out = common::run_single(
        graph,
        &device,
        OutputNode::new(joined, joined_shape),
        &[
            device.send(&HostBuffer::of::<f32>(
                &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
                vec![2, 3],
            )?)?,
            device.send(&HostBuffer::of::<f32>(&[6.0, 7.0, 8.0], vec![1, 3])?)?,
        ],
    )?;
    assert_eq!(
        common::elements::<f32>(&out)?,
        vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]
    );
    Ok(())
}

#[test]
fn concat_rejects_mismatched_other_axes() -> Result<()> {
    let platform = common::platform();
    let mut graph = Graph::new(&platform, "concat_bad");
    let a = graph.argument("a", &Shape::new(DType::F32, vec![2, 3]), 0)?;
    let b = graph.argument("b", &Shape::new(DType::F32, vec![2, 2]), 1)?;
    assert!(matches!(
        graph.concat(0, &[a, b]),
        Err(Error::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
fn gather_rejects_over_indexing() -> Result<()> {
    let platform = common::platform();
    let mut graph = Graph::new(&platform, "gather_bad");
    let x = graph.argument("x", &Shape::new(DType::F32, vec![4]), 0)?;
    let indices = graph.argument("i", &Shape::new(DType::I32, vec![2]), 1)?;
    match graph.gather(&x, &indices) {
        Err(Error::InvalidArgument(message)) => {
            assert!(message.contains("over-indexed"), "{message}")
        }
        other => panic!("expected InvalidArgument, got {other:?}"),
    }
    Ok(())
}

#[test]
fn gather_picks_rows() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "gather");
    let x = graph.argument("x", &Shape::new(DType::I32, vec![4, 2]), 0)?;
    let indices = graph.argument("i", &Shape::new(DType::I32, vec![3, 1]), 1)?;
    let picked = graph.gather(&x, &indices)?;
    let picked_shape = array_shape(&graph, &picked)?;
    assert_eq!(picked_shape.axis_lengths, vec![3, 2]);

    let out = common::run_single(
        graph,
        &device,
        OutputNode::new(picked, picked_shape),
        &[
            device.send(&HostBuffer::of::<i32>(
                &[10, 11, 20, 21, 30, 31, 40, 41],
                vec![4, 2],
            )?)?,
            device.send(&HostBuffer::of::<i32>(&[2, 0, 3], vec![3, 1])?)?,
        ],
    )?;
    assert_eq!(common::elements::<i32>(&out)?, vec![30, 31, 10, 11, 40, 41]);
    Ok(())
}

#[test]
fn transpose_reorders_axes() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "transpose");
    let x = graph.argument("x", &Shape::new(DType::I32, vec![2, 3]), 0)?;
    let flipped = graph.transpose(&x, &[1, 0])?;
    let flipped_shape = array_shape(&graph, &flipped)?;
    assert_eq!(flipped_shape.axis_lengths, vec![3, 2]);

    let out = common::run_single(
        graph,
        &device,
        OutputNode::new(flipped, flipped_shape),
        &[device.send(&HostBuffer::of::<i32>(&[1, 2, 3, 4, 5, 6], vec![2, 3])?)?],
    )?;
    assert_eq!(common::elements::<i32>(&out)?, vec![1, 4, 2, 5, 3, 6]);
    Ok(())
}

#[test]
fn broadcast_in_dim_expands_axes() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "broadcast");
    let x = graph.argument("x", &Shape::new(DType::F32, vec![3]), 0)?;
    let target = Shape::new(DType::F32, vec![2, 3]);
    let widened = graph.broadcast_in_dim(&x, &target, &[1])?;
    assert_eq!(array_shape(&graph, &widened)?, target);

    let out = common::run_single(
        graph,
        &device,
        OutputNode::new(widened, target),
        &[device.send(&HostBuffer::of::<f32>(&[1.0, 2.0, 3.0], vec![3])?)?],
    )?;
    assert_eq!(
        common::elements::<f32>(&out)?,
        vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]
    );
    Ok(())
}

#[test]
fn set_adds_updates_at_position() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "set");
    let x = graph.argument("x", &Shape::new(DType::I32, vec![2, 2]), 0)?;
    let updates = graph.argument("u", &Shape::new(DType::I32, vec![2]), 1)?;
    let position = graph.constant(&HostBuffer::of::<i32>(&[1], vec![1])?)?;
    let written = graph.set(&x, &updates, &position)?;
    let out_shape = array_shape(&graph, &written)?;
    assert_eq!(out_shape.axis_lengths, vec![2, 2]);

    let out = common::run_single(
        graph,
        &device,
        OutputNode::new(written, out_shape),
        &[
            device.send(&HostBuffer::of::<i32>(&[1, 2, 3, 4], vec![2, 2])?)?,
            device.send(&HostBuffer::of::<i32>(&[10, 20], vec![2])?)?,
        ],
    )?;
    assert_eq!(common::elements::<i32>(&out)?, vec![1, 2, 13, 24]);
    Ok(())
}

#[test]
fn dot_general_multiplies_matrices() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "matmul");
    let a = graph.argument("a", &Shape::new(DType::F32, vec![2, 3]), 0)?;
    let b = graph.argument("b", &Shape::new(DType::F32, vec![3, 2]), 1)?;
    let product = graph.dot_general(&a, &b, [vec![], vec![]], [vec![1], vec![0]])?;
    let product_shape = array_shape(&graph, &product)?;
    assert_eq!(product_shape.axis_lengths, vec![2, 2]);

    let out = common::run_single(
        graph,
        &device,
        OutputNode::new(product, product_shape),
        &[
            device.send(&HostBuffer::of::<f32>(
                &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
                vec![2, 3],
            )?)?,
            device.send(&HostBuffer::of::<f32>(
                &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0],
                vec![3, 2],
            )?)?,
        ],
    )?;
    assert_eq!(common::elements::<f32>(&out)?, vec![4.0, 5.0, 10.0, 11.0]);
    Ok(())
}

#[test]
fn iota_counts_along_the_axis() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "iota");
    let shape = Shape::new(DType::I32, vec![2, 3]);
    let counted = graph.iota(&shape, 1)?;
    let out = common::run_single(
        graph,
        &device,
        OutputNode::new(counted, shape),
        &[],
    )?;
    assert_eq!(common::elements::<i32>(&out)?, vec![0, 1, 2, 0, 1, 2]);
    Ok(())
}

#[test]
fn arg_min_max_finds_positions() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "argmax");
    let x = graph.argument("x", &Shape::new(DType::F32, vec![2, 3]), 0)?;
    let winners = graph.arg_min_max(&x, 1, DType::I32, false)?;
    let out_shape = array_shape(&graph, &winners)?;
    assert_eq!(out_shape.axis_lengths, vec![2]);

    let out = common::run_single(
        graph,
        &device,
        OutputNode::new(winners, out_shape),
        &[device.send(&HostBuffer::of::<f32>(
            &[1.0, 5.0, 2.0, 9.0, 0.0, 3.0],
            vec![2, 3],
        )?)?],
    )?;
    assert_eq!(common::elements::<i32>(&out)?, vec![1, 0]);
    Ok(())
}

#[test]
fn rng_bit_generator_advances_state() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "rng");
    let state_shape = Shape::new(DType::U64, vec![2]);
    let state = graph.argument("state", &state_shape, 0)?;
    let values_shape = Shape::new(DType::U32, vec![4]);
    let (new_state, values) = graph.rng_bit_generator(&state, &values_shape)?;
    assert_eq!(array_shape(&graph, &new_state)?, state_shape);
    assert_eq!(array_shape(&graph, &values)?, values_shape);

    let runner = graph.compile(
        &device,
        vec![
            OutputNode::new(new_state, state_shape.clone()),
            OutputNode::new(values, values_shape),
        ],
        Vec::new(),
    )?;
    let seed = HostBuffer::of::<u64>(&[7, 11], vec![2])?;
    let (outputs, _) = runner.run(&[device.send(&seed)?])?;
    let advanced = outputs[0].to_host()?;
    assert_ne!(advanced.bytes(), seed.bytes());
    assert_eq!(outputs[1].shape().size(), 4);
    Ok(())
}
