use std::sync::Arc;
use std::thread;

use anyhow::Result;
use graphstage::{BinaryOp, Error, Graph, HostBuffer, OutputNode};

use crate::common;

#[test]
fn add_two_scalars() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "add");
    let x = graph.argument("x", &common::scalar_shape::<f32>(), 0)?;
    let y = graph.argument("y", &common::scalar_shape::<f32>(), 1)?;
    let sum = graph.binary(BinaryOp::Add, &x, &y)?;
    let out = common::run_single(
        graph,
        &device,
        OutputNode::new(sum, common::scalar_shape::<f32>()),
        &[
            device.send(&HostBuffer::scalar(2.0f32))?,
            device.send(&HostBuffer::scalar(3.0f32))?,
        ],
    )?;
    assert_eq!(common::elements::<f32>(&out)?, vec![5.0]);
    Ok(())
}

#[test]
fn run_rejects_wrong_input_count() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "arity");
    let x = graph.argument("x", &common::scalar_shape::<f32>(), 0)?;
    let y = graph.argument("y", &common::scalar_shape::<f32>(), 1)?;
    let sum = graph.binary(BinaryOp::Add, &x, &y)?;
    let runner = graph.compile(
        &device,
        vec![OutputNode::new(sum, common::scalar_shape::<f32>())],
        Vec::new(),
    )?;
    let one_input = [device.send(&HostBuffer::scalar(2.0f32))?];
    match runner.run(&one_input) {
        Err(Error::InvalidArgument(message)) => {
            assert!(message.contains("takes 2 inputs"), "{message}")
        }
        other => panic!("expected InvalidArgument, got {other:?}"),
    }
    Ok(())
}

#[test]
fn traced_outputs_split_from_results() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "traced");
    let x = graph.argument("x", &common::scalar_shape::<f32>(), 0)?;
    let y = graph.argument("y", &common::scalar_shape::<f32>(), 1)?;
    let sum = graph.binary(BinaryOp::Add, &x, &y)?;
    let runner = graph.compile(
        &device,
        vec![OutputNode::new(sum, common::scalar_shape::<f32>())],
        vec![
            OutputNode::new(x, common::scalar_shape::<f32>()),
            OutputNode::new(y, common::scalar_shape::<f32>()),
        ],
    )?;
    assert_eq!(runner.out_shapes().len(), 1);
    assert_eq!(runner.traced_shapes().len(), 2);

    let (outputs, traced) = runner.run(&[
        device.send(&HostBuffer::scalar(2.0f32))?,
        device.send(&HostBuffer::scalar(3.0f32))?,
    ])?;
    assert_eq!(outputs.len(), 1);
    assert_eq!(traced.len(), 2);
    assert_eq!(common::elements::<f32>(&outputs[0].to_host()?)?, vec![5.0]);
    assert_eq!(common::elements::<f32>(&traced[0].to_host()?)?, vec![2.0]);
    assert_eq!(common::elements::<f32>(&traced[1].to_host()?)?, vec![3.0]);
    Ok(())
}

#[test]
fn unused_nodes_do_not_affect_the_run() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "dead");
    let x = graph.argument("x", &common::scalar_shape::<i32>(), 0)?;
    let zero = graph.constant(&HostBuffer::scalar(0i32))?;
    // Emitted but never used below; dividing by it must not fail the run.
    let _dead = graph.binary(BinaryOp::Div, &x, &zero)?;
    let one = graph.constant(&HostBuffer::scalar(1i32))?;
    let sum = graph.binary(BinaryOp::Add, &x, &one)?;
    let out = common::run_single(
        graph,
        &device,
        OutputNode::new(sum, common::scalar_shape::<i32>()),
        &[device.send(&HostBuffer::scalar(41i32))?],
    )?;
    assert_eq!(common::elements::<i32>(&out)?, vec![42]);
    Ok(())
}

#[test]
fn run_rejects_foreign_platform_inputs() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let other_platform = common::platform();
    let other_device = common::device(&other_platform)?;

    let mut graph = Graph::new(&platform, "foreign");
    let x = graph.argument("x", &common::scalar_shape::<f32>(), 0)?;
    let runner = graph.compile(
        &device,
        vec![OutputNode::new(x, common::scalar_shape::<f32>())],
        Vec::new(),
    )?;
    let foreign = [other_device.send(&HostBuffer::scalar(1.0f32))?];
    assert!(matches!(
        runner.run(&foreign),
        Err(Error::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
fn runner_is_safe_to_share_across_threads() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let mut graph = Graph::new(&platform, "shared");
    let x = graph.argument("x", &common::scalar_shape::<f32>(), 0)?;
    let y = graph.argument("y", &common::scalar_shape::<f32>(), 1)?;
    let sum = graph.binary(BinaryOp::Add, &x, &y)?;
    let runner = Arc::new(graph.compile(
        &device,
        vec![OutputNode::new(sum, common::scalar_shape::<f32>())],
        Vec::new(),
    )?);

    let mut workers = Vec::new();
    for i in 0..4 {
        let runner = Arc::clone(&runner);
        let device = device.clone();
        workers.push(thread::spawn(move || -> Result<f32> {
            let a = device.send(&HostBuffer::scalar(i as f32))?;
            let b = device.send(&HostBuffer::scalar(10.0f32))?;
            let (outputs, _) = runner.run(&[a, b])?;
            Ok(common::elements::<f32>(&outputs[0].to_host()?)?[0])
        }));
    }
    for (i, worker) in workers.into_iter().enumerate() {
        let value = worker.join().expect("worker panicked")?;
        assert_eq!(value, 10.0 + i as f32);
    }
    Ok(())
}
