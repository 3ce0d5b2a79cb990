//! Host interpreter backend.
//!
//! Implements the plugin contract entirely on the host: computations are
//! recorded as an op arena and evaluated element by element. This is the
//! reference backend; it favors clarity over speed.

mod eval;
mod literal;

use std::sync::Arc;

use crate::backend::{
    OpId, PluginBuffer, PluginBuilder, PluginClient, PluginComputation, PluginExecutable,
    PluginOptions, PrimitiveOp, ValueShape,
};
use crate::error::{Error, Result};
use crate::tensor::{DType, HostBuffer, Shape};
use crate::trace;

use eval::{eval_computation, infer_prim_shape, Computation, Expr, Value};
use literal::Literal;

/// Client of the interpreter backend.
///
/// The `trace` option (bool setting `"trace"`) logs each executable run.
pub struct InterpClient {
    trace: bool,
}

impl InterpClient {
    pub fn new(options: &PluginOptions) -> Self {
        Self {
            trace: options.bool_setting("trace").unwrap_or(false),
        }
    }
}

impl Default for InterpClient {
    fn default() -> Self {
        Self::new(&PluginOptions::default())
    }
}

impl PluginClient for InterpClient {
    fn name(&self) -> &str {
        "interp"
    }

    fn supports_dtype(&self, dtype: DType) -> bool {
        !matches!(dtype, DType::Bf16 | DType::F16)
    }

    fn builder(&self, name: &str) -> Box<dyn PluginBuilder> {
        Box::new(InterpBuilder::new(name))
    }

    fn compile(&self, computation: &PluginComputation) -> Result<Arc<dyn PluginExecutable>> {
        let comp = computation
            .downcast_ref::<Computation>()
            .ok_or_else(|| {
                Error::Execution("computation was not built by the interp backend".to_string())
            })?
            .clone();
        Ok(Arc::new(InterpExecutable {
            computation: comp,
            trace: self.trace,
        }))
    }

    fn buffer_from_host(&self, data: &[u8], shape: &Shape) -> Result<PluginBuffer> {
        let literal = Literal::from_bytes(shape, data)?;
        Ok(PluginBuffer::new(literal))
    }

    fn buffer_to_host(&self, buffer: &PluginBuffer) -> Result<Vec<u8>> {
        Ok(literal_of(buffer)?.to_bytes())
    }

    fn buffer_shape(&self, buffer: &PluginBuffer) -> Result<Shape> {
        Ok(literal_of(buffer)?.shape())
    }
}

fn literal_of(buffer: &PluginBuffer) -> Result<&Literal> {
    buffer.downcast_ref::<Literal>().ok_or_else(|| {
        Error::Execution("buffer does not belong to the interp backend".to_string())
    })
}

/// Records ops into an arena and infers each result shape as it goes.
struct InterpBuilder {
    name: String,
    exprs: Vec<Expr>,
    shapes: Vec<ValueShape>,
    param_shapes: Vec<ValueShape>,
}

impl InterpBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            exprs: Vec::new(),
            shapes: Vec::new(),
            param_shapes: Vec::new(),
        }
    }

    fn push(&mut self, expr: Expr, shape: ValueShape) -> OpId {
        let id = OpId(self.exprs.len());
        self.exprs.push(expr);
        self.shapes.push(shape);
        id
    }

    fn input_shape(&self, id: OpId) -> Result<ValueShape> {
        self.shapes.get(id.0).cloned().ok_or_else(|| {
            Error::InvalidArgument(format!("op id {} is not part of {}", id.0, self.name))
        })
    }
}

impl PluginBuilder for InterpBuilder {
    fn name(&self) -> &str {
        &self.name
    }

    fn constant(&mut self, literal: &HostBuffer) -> Result<OpId> {
        let shape = literal.shape().clone();
        let value = Literal::from_bytes(&shape, literal.bytes())?;
        Ok(self.push(Expr::Constant(value), ValueShape::Array(shape)))
    }

    fn parameter(&mut self, name: &str, index: usize, shape: &ValueShape) -> Result<OpId> {
        if index != self.param_shapes.len() {
            return Err(Error::InvalidArgument(format!(
                "parameter {} declared with index {}, expected {}",
                name,
                index,
                self.param_shapes.len()
            )));
        }
        self.param_shapes.push(shape.clone());
        Ok(self.push(
            Expr::Parameter {
                name: name.to_string(),
                index,
            },
            shape.clone(),
        ))
    }

    fn emit(&mut self, op: PrimitiveOp, inputs: &[OpId]) -> Result<OpId> {
        let input_shapes: Vec<ValueShape> = inputs
            .iter()
            .map(|&id| self.input_shape(id))
            .collect::<Result<_>>()?;
        let shape = infer_prim_shape(&op, &input_shapes)?;
        Ok(self.push(
            Expr::Prim {
                op,
                inputs: inputs.to_vec(),
            },
            shape,
        ))
    }

    fn op_shape(&self, id: OpId) -> Result<ValueShape> {
        self.input_shape(id)
    }

    fn sub_builder(&self, name: &str) -> Box<dyn PluginBuilder> {
        Box::new(InterpBuilder::new(name))
    }

    fn build(&mut self, root: OpId) -> Result<PluginComputation> {
        if root.0 >= self.exprs.len() {
            return Err(Error::InvalidArgument(format!(
                "root op id {} is not part of {}",
                root.0, self.name
            )));
        }
        Ok(PluginComputation::new(Computation {
            name: self.name.clone(),
            exprs: self.exprs.clone(),
            shapes: self.shapes.clone(),
            root,
            param_shapes: self.param_shapes.clone(),
        }))
    }
}

struct InterpExecutable {
    computation: Computation,
    trace: bool,
}

impl PluginExecutable for InterpExecutable {
    fn num_parameters(&self) -> usize {
        self.computation.num_parameters()
    }

    fn execute(&self, inputs: &[PluginBuffer]) -> Result<Vec<PluginBuffer>> {
        if self.trace {
            trace!(
                "interp: running {} with {} inputs",
                self.computation.name,
                inputs.len()
            );
        }
        let params: Vec<Value> = inputs
            .iter()
            .map(|buffer| Ok(Value::Literal(literal_of(buffer)?.clone())))
            .collect::<Result<_>>()?;
        let result = eval_computation(&self.computation, &params)?;
        flatten(result)
    }
}

// A tuple root comes back as one buffer per element; everything else as a
// single buffer. Nested tuples have no buffer representation.
fn flatten(value: Value) -> Result<Vec<PluginBuffer>> {
    match value {
        Value::Literal(literal) => Ok(vec![PluginBuffer::new(literal)]),
        Value::Tuple(elements) => elements
            .into_iter()
            .map(|element| match element {
                Value::Literal(literal) => Ok(PluginBuffer::new(literal)),
                Value::Tuple(_) => Err(Error::Execution(
                    "nested tuple results are not supported".to_string(),
                )),
            })
            .collect(),
    }
}
