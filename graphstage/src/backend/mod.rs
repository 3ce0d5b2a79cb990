//! Contract between the bridge and a compute backend.
//!
//! A backend exposes three things: a per-computation builder that records
//! primitive operations, a compiler/executor pair, and a device buffer API.
//! The bridge only ever talks to these traits; the in-tree
//! [`interp`] backend implements them on the host so graphs can be compiled
//! and run without a native plugin.

pub mod interp;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::tensor::{DType, HostBuffer, Shape};

/// Identifier of an operation inside one [`PluginBuilder`].
///
/// Ids are only meaningful to the builder that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(pub usize);

/// Shape of an op result: a plain array or a tuple of results.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueShape {
    Array(Shape),
    Tuple(Vec<ValueShape>),
}

impl ValueShape {
    /// Array shape, if this is not a tuple.
    pub fn as_array(&self) -> Option<&Shape> {
        match self {
            ValueShape::Array(shape) => Some(shape),
            ValueShape::Tuple(_) => None,
        }
    }

    /// Number of tuple components, if this is a tuple.
    pub fn tuple_size(&self) -> Option<usize> {
        match self {
            ValueShape::Array(_) => None,
            ValueShape::Tuple(elements) => Some(elements.len()),
        }
    }
}

impl std::fmt::Display for ValueShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueShape::Array(shape) => write!(f, "{shape}"),
            ValueShape::Tuple(elements) => {
                write!(f, "(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Reduction selected by the generic reduce entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceFn {
    Sum,
    Prod,
    Max,
    Min,
}

/// A computation built by a [`PluginBuilder`], opaque to the bridge.
#[derive(Clone)]
pub struct PluginComputation(Arc<dyn std::any::Any + Send + Sync>);

impl PluginComputation {
    /// Wrap a backend-private computation.
    pub fn new(inner: impl std::any::Any + Send + Sync) -> Self {
        Self(Arc::new(inner))
    }

    /// Downcast to the backend-private representation.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl std::fmt::Debug for PluginComputation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PluginComputation")
    }
}

/// Reference to a backend buffer. Clones share the underlying buffer;
/// dropping the last clone releases it.
#[derive(Clone)]
pub struct PluginBuffer(Arc<dyn std::any::Any + Send + Sync>);

impl PluginBuffer {
    /// Wrap a backend-private buffer.
    pub fn new(inner: impl std::any::Any + Send + Sync) -> Self {
        Self(Arc::new(inner))
    }

    /// Downcast to the backend-private representation.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl std::fmt::Debug for PluginBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PluginBuffer")
    }
}

/// Primitive operations understood by a plugin builder.
///
/// Attributes ride along with the variant; node inputs are passed separately
/// to [`PluginBuilder::emit`].
#[derive(Debug, Clone)]
pub enum PrimitiveOp {
    // Elementwise arithmetic.
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    // Bitwise / logical.
    Not,
    And,
    Or,
    Xor,
    LogicalAnd,
    LogicalOr,
    Shl,
    ShrLogical,
    ShrArithmetic,
    // Comparisons (result dtype is Bool).
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Transcendentals.
    Cos,
    Sin,
    Tanh,
    // Reductions.
    Reduce {
        op: ReduceFn,
        axes: Vec<usize>,
    },
    ArgMinMax {
        axis: usize,
        dtype: DType,
        is_min: bool,
    },
    // Shape manipulation.
    Reshape(Vec<usize>),
    Convert(DType),
    Bitcast(DType),
    Slice {
        starts: Vec<usize>,
        limits: Vec<usize>,
        strides: Vec<usize>,
    },
    Transpose(Vec<usize>),
    Concat(usize),
    BroadcastInDim {
        shape: Shape,
        axes: Vec<usize>,
    },
    Gather {
        index_vector_axis: usize,
        offset_axes: Vec<usize>,
        collapsed_slice_axes: Vec<usize>,
        start_index_map: Vec<usize>,
        slice_sizes: Vec<usize>,
        indices_are_sorted: bool,
    },
    ScatterAdd {
        index_vector_axis: usize,
        update_window_axes: Vec<usize>,
        inserted_window_axes: Vec<usize>,
        scatter_to_operand_axes: Vec<usize>,
        indices_are_sorted: bool,
        unique_indices: bool,
    },
    DotGeneral {
        batch_axes: [Vec<usize>; 2],
        reduce_axes: [Vec<usize>; 2],
    },
    // Generators.
    Iota {
        shape: Shape,
        axis: usize,
    },
    RngBitGenerator(Shape),
    // Tuples.
    Tuple,
    GetTupleElement(usize),
    // Control flow, parameterized by already-built computations.
    Call(PluginComputation),
    While {
        cond: PluginComputation,
        body: PluginComputation,
    },
}

impl PrimitiveOp {
    /// Short label used in structural dumps.
    pub fn label(&self) -> &'static str {
        match self {
            PrimitiveOp::Add => "Add",
            PrimitiveOp::Sub => "Sub",
            PrimitiveOp::Mul => "Mul",
            PrimitiveOp::Div => "Div",
            PrimitiveOp::Rem => "Rem",
            PrimitiveOp::Neg => "Neg",
            PrimitiveOp::Not => "Not",
            PrimitiveOp::And => "And",
            PrimitiveOp::Or => "Or",
            PrimitiveOp::Xor => "Xor",
            PrimitiveOp::LogicalAnd => "LogicalAnd",
            PrimitiveOp::LogicalOr => "LogicalOr",
            PrimitiveOp::Shl => "Shl",
            PrimitiveOp::ShrLogical => "ShrLogical",
            PrimitiveOp::ShrArithmetic => "ShrArithmetic",
            PrimitiveOp::Eq => "Eq",
            PrimitiveOp::Ne => "Ne",
            PrimitiveOp::Lt => "Lt",
            PrimitiveOp::Le => "Le",
            PrimitiveOp::Gt => "Gt",
            PrimitiveOp::Ge => "Ge",
            PrimitiveOp::Cos => "Cos",
            PrimitiveOp::Sin => "Sin",
            PrimitiveOp::Tanh => "Tanh",
            PrimitiveOp::Reduce { .. } => "Reduce",
            PrimitiveOp::ArgMinMax { .. } => "ArgMinMax",
            PrimitiveOp::Reshape(_) => "Reshape",
            PrimitiveOp::Convert(_) => "Convert",
            PrimitiveOp::Bitcast(_) => "Bitcast",
            PrimitiveOp::Slice { .. } => "Slice",
            PrimitiveOp::Transpose(_) => "Transpose",
            PrimitiveOp::Concat(_) => "Concat",
            PrimitiveOp::BroadcastInDim { .. } => "BroadcastInDim",
            PrimitiveOp::Gather { .. } => "Gather",
            PrimitiveOp::ScatterAdd { .. } => "ScatterAdd",
            PrimitiveOp::DotGeneral { .. } => "DotGeneral",
            PrimitiveOp::Iota { .. } => "Iota",
            PrimitiveOp::RngBitGenerator(_) => "RngBitGenerator",
            PrimitiveOp::Tuple => "Tuple",
            PrimitiveOp::GetTupleElement(_) => "GetTupleElement",
            PrimitiveOp::Call(_) => "Call",
            PrimitiveOp::While { .. } => "While",
        }
    }
}

/// Named options passed to a backend client at construction.
#[derive(Debug, Clone, Default)]
pub struct PluginOptions {
    pub settings: HashMap<String, Value>,
}

impl PluginOptions {
    /// Look up a boolean setting.
    pub fn bool_setting(&self, key: &str) -> Option<bool> {
        self.settings.get(key).and_then(|value| value.as_bool())
    }
}

/// Per-computation builder: records primitive ops and reports the shape the
/// backend inferred for each of them.
pub trait PluginBuilder {
    /// Name of the computation under construction.
    fn name(&self) -> &str;

    /// Record a literal constant from host data.
    fn constant(&mut self, literal: &HostBuffer) -> Result<OpId>;

    /// Declare a positional input of the computation.
    fn parameter(&mut self, name: &str, index: usize, shape: &ValueShape) -> Result<OpId>;

    /// Record a primitive operation over previously recorded inputs.
    fn emit(&mut self, op: PrimitiveOp, inputs: &[OpId]) -> Result<OpId>;

    /// Shape the backend inferred for an op result.
    fn op_shape(&self, id: OpId) -> Result<ValueShape>;

    /// Open a builder for a nested computation on the same backend.
    fn sub_builder(&self, name: &str) -> Box<dyn PluginBuilder>;

    /// Finalize the computation rooted at `root`.
    fn build(&mut self, root: OpId) -> Result<PluginComputation>;
}

/// Compiled form of a computation. Immutable; safe to execute concurrently.
pub trait PluginExecutable: Send + Sync {
    /// Number of parameters the computation was built with.
    fn num_parameters(&self) -> usize;

    /// Run the executable against device buffers, one per parameter.
    ///
    /// A tuple-shaped root is returned exploded into one buffer per element.
    fn execute(&self, inputs: &[PluginBuffer]) -> Result<Vec<PluginBuffer>>;
}

/// Entry point to one backend: builder construction, compilation and the
/// device buffer API.
pub trait PluginClient: Send + Sync {
    /// Backend name, for diagnostics.
    fn name(&self) -> &str;

    /// True if the backend can materialize values of this dtype.
    fn supports_dtype(&self, dtype: DType) -> bool;

    /// Open a builder for a new top-level computation.
    fn builder(&self, name: &str) -> Box<dyn PluginBuilder>;

    /// Compile a built computation.
    fn compile(&self, computation: &PluginComputation) -> Result<Arc<dyn PluginExecutable>>;

    /// Transfer host data to the device.
    fn buffer_from_host(&self, data: &[u8], shape: &Shape) -> Result<PluginBuffer>;

    /// Transfer a device buffer back to the host.
    fn buffer_to_host(&self, buffer: &PluginBuffer) -> Result<Vec<u8>>;

    /// Shape of a device buffer as the backend reports it. Axis lengths may
    /// come back flattened; only dtype and element count are authoritative.
    fn buffer_shape(&self, buffer: &PluginBuffer) -> Result<Shape>;
}
