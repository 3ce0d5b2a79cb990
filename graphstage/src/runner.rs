//! Execution of compiled graphs against device handles.

use std::sync::Arc;

use crate::backend::PluginExecutable;
use crate::error::{Error, Result};
use crate::platform::{Device, Handle};
use crate::tensor::Shape;
use crate::trace;

/// A compiled graph bound to a device.
///
/// Immutable once built; `run` can be called repeatedly and from multiple
/// threads at once.
pub struct Runner {
    device: Device,
    executable: Arc<dyn PluginExecutable>,
    out_shapes: Vec<Shape>,
    traced_shapes: Vec<Shape>,
}

impl Runner {
    pub(crate) fn new(
        device: Device,
        executable: Arc<dyn PluginExecutable>,
        out_shapes: Vec<Shape>,
        traced_shapes: Vec<Shape>,
    ) -> Self {
        Self {
            device,
            executable,
            out_shapes,
            traced_shapes,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Shapes declared for the graph outputs, in declaration order.
    pub fn out_shapes(&self) -> &[Shape] {
        &self.out_shapes
    }

    /// Shapes declared for the traced (diagnostic) outputs.
    pub fn traced_shapes(&self) -> &[Shape] {
        &self.traced_shapes
    }

    /// Run the executable. Inputs map positionally onto the graph's
    /// declared arguments; the result list splits into outputs and traced
    /// outputs.
    pub fn run(&self, inputs: &[Handle]) -> Result<(Vec<Handle>, Vec<Handle>)> {
        let want = self.executable.num_parameters();
        if inputs.len() != want {
            return Err(Error::InvalidArgument(format!(
                "executable takes {} inputs, got {}",
                want,
                inputs.len()
            )));
        }
        for (i, input) in inputs.iter().enumerate() {
            if input.device().platform() != self.device.platform() {
                return Err(Error::InvalidArgument(format!(
                    "input {} lives on platform {}, executable runs on {}",
                    i,
                    input.device().platform().name(),
                    self.device.platform().name()
                )));
            }
        }
        trace!(
            "running executable on {}:{} with {} inputs",
            self.device.platform().name(),
            self.device.ordinal(),
            inputs.len()
        );
        let buffers: Vec<_> = inputs.iter().map(|input| input.buffer().clone()).collect();
        let results = self.executable.execute(&buffers)?;
        let expected = self.out_shapes.len() + self.traced_shapes.len();
        if results.len() != expected {
            return Err(Error::Execution(format!(
                "backend returned {} results, expected {}",
                results.len(),
                expected
            )));
        }
        let mut outputs = Vec::with_capacity(self.out_shapes.len());
        let mut traced = Vec::with_capacity(self.traced_shapes.len());
        for (i, buffer) in results.into_iter().enumerate() {
            let want = if i < self.out_shapes.len() {
                &self.out_shapes[i]
            } else {
                &self.traced_shapes[i - self.out_shapes.len()]
            };
            let got = self.device.platform().client().buffer_shape(&buffer)?;
            // Backends may report flattened axis lengths; dtype and element
            // count are what must agree.
            if !want.transfer_compatible(&got) {
                return Err(Error::ShapeMismatch {
                    got,
                    want: want.clone(),
                });
            }
            let handle = Handle::new(self.device.clone(), buffer, want.clone());
            if i < self.out_shapes.len() {
                outputs.push(handle);
            } else {
                traced.push(handle);
            }
        }
        Ok((outputs, traced))
    }
}
