use std::sync::Arc;

use anyhow::{anyhow, Result};
use graphstage::{
    Device, Graph, Handle, HostBuffer, InterpClient, OutputNode, Platform, Shape,
    TensorElement,
};

/// Fresh platform backed by the host interpreter.
pub fn platform() -> Platform {
    Platform::new(Arc::new(InterpClient::default()))
}

pub fn device(platform: &Platform) -> Result<Device> {
    Ok(platform.device(0)?)
}

/// Compile a graph with a single output and run it.
pub fn run_single(
    graph: Graph,
    device: &Device,
    output: OutputNode,
    inputs: &[Handle],
) -> Result<HostBuffer> {
    let runner = graph.compile(device, vec![output], Vec::new())?;
    let (outputs, traced) = runner.run(inputs)?;
    if outputs.len() != 1 || !traced.is_empty() {
        return Err(anyhow!(
            "expected a single output, got {} outputs and {} traced",
            outputs.len(),
            traced.len()
        ));
    }
    Ok(outputs[0].to_host()?)
}

/// Typed elements of a host buffer.
pub fn elements<T: TensorElement>(buffer: &HostBuffer) -> Result<Vec<T>> {
    Ok(buffer.as_slice::<T>()?.to_vec())
}

pub fn scalar_shape<T: TensorElement>() -> Shape {
    Shape::scalar(T::DTYPE)
}
