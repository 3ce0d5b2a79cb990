//! Graph construction: the symbolic builder the interpreter drives.
//!
//! A [`Graph`] accumulates nodes into one compilation unit. Nodes are
//! append-only symbolic references; nothing is evaluated until
//! [`Graph::compile`] hands the finished tuple of outputs to the backend.

mod node;

use std::fmt::Write as _;

use crate::backend::{OpId, PluginBuilder, PluginComputation, PrimitiveOp, ReduceFn, ValueShape};
use crate::error::{Error, Result};
use crate::platform::{Device, Platform};
use crate::runner::Runner;
use crate::tensor::{DType, HostBuffer, Shape};
use crate::trace;

pub use node::{BinaryOp, GraphId, Node, NodeRef, OutputNode, TupleRef, UnaryOp};

// The backend-inferred shape decides whether a freshly emitted node is a
// tuple.
fn wrap(node_ref: NodeRef, shape: &ValueShape) -> Node {
    match shape {
        ValueShape::Tuple(elements) => Node::Tuple(TupleRef {
            node: node_ref,
            size: elements.len(),
        }),
        ValueShape::Array(_) => Node::Plain(node_ref),
    }
}

/// One compilation unit under construction.
///
/// Nodes can only be appended; using a node that belongs to a different
/// graph fails with `InvalidArgument`. Compiling consumes the graph, which
/// freezes it for good.
pub struct Graph {
    name: String,
    id: GraphId,
    platform: Platform,
    builder: Box<dyn PluginBuilder>,
    args: Vec<(String, Node)>,
}

impl Graph {
    /// Open a new top-level graph on a platform.
    pub fn new(platform: &Platform, name: &str) -> Self {
        Self {
            name: name.to_string(),
            id: GraphId::fresh(),
            platform: platform.clone(),
            builder: platform.client().builder(name),
            args: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    fn check(&self, node: &Node) -> Result<()> {
        if node.graph_id() != self.id {
            return Err(Error::InvalidArgument(format!(
                "node {} does not belong to graph {}",
                node.node_ref().label,
                self.name
            )));
        }
        Ok(())
    }

    // Emit one primitive and wrap the result. The backend-inferred shape
    // decides whether the node is a tuple.
    fn emit(&mut self, op: PrimitiveOp, info: Option<String>, inputs: &[&Node]) -> Result<Node> {
        for input in inputs {
            self.check(input)?;
        }
        let label = op.label().to_string();
        let ids: Vec<OpId> = inputs.iter().map(|input| input.op_id()).collect();
        let id = self.builder.emit(op, &ids)?;
        let shape = self.builder.op_shape(id)?;
        let node_ref = NodeRef {
            graph: self.id,
            op: id,
            label,
            info,
            deps: inputs.iter().map(|&input| input.clone()).collect(),
        };
        Ok(wrap(node_ref, &shape))
    }

    /// Backend-inferred shape of a node. Authoritative for axis lengths.
    pub fn node_shape(&self, node: &Node) -> Result<ValueShape> {
        self.check(node)?;
        self.builder.op_shape(node.op_id())
    }

    fn array_shape(&self, node: &Node) -> Result<Shape> {
        match self.node_shape(node)? {
            ValueShape::Array(shape) => Ok(shape),
            ValueShape::Tuple(_) => Err(Error::InvalidArgument(format!(
                "node {} is a tuple, expected an array",
                node.node_ref().label
            ))),
        }
    }

    fn check_dtype(&self, dtype: DType) -> Result<()> {
        if !self.platform.client().supports_dtype(dtype) {
            return Err(Error::UnsupportedDType {
                dtype,
                backend: self.platform.name().to_string(),
            });
        }
        Ok(())
    }

    /// Materialize a literal from host data.
    pub fn constant(&mut self, literal: &HostBuffer) -> Result<Node> {
        self.check_dtype(literal.shape().dtype)?;
        let id = self.builder.constant(literal)?;
        Ok(Node::Plain(NodeRef {
            graph: self.id,
            op: id,
            label: "Constant".to_string(),
            info: Some(literal.shape().to_string()),
            deps: Vec::new(),
        }))
    }

    /// Declare a graph input at a fixed position.
    pub fn argument(&mut self, name: &str, shape: &Shape, index: usize) -> Result<Node> {
        self.check_dtype(shape.dtype)?;
        let id = self
            .builder
            .parameter(name, index, &ValueShape::Array(shape.clone()))?;
        let node = Node::Plain(NodeRef {
            graph: self.id,
            op: id,
            label: "Arg".to_string(),
            info: Some(format!("{name}: {shape}")),
            deps: Vec::new(),
        });
        self.args.push((name.to_string(), node.clone()));
        Ok(node)
    }

    /// Declare a tuple-shaped graph input, used for loop state.
    pub fn tuple_argument(&mut self, name: &str, index: usize, shapes: &[Shape]) -> Result<Node> {
        for shape in shapes {
            self.check_dtype(shape.dtype)?;
        }
        let elements: Vec<ValueShape> = shapes
            .iter()
            .map(|shape| ValueShape::Array(shape.clone()))
            .collect();
        let id = self
            .builder
            .parameter(name, index, &ValueShape::Tuple(elements))?;
        let node = Node::Tuple(TupleRef {
            node: NodeRef {
                graph: self.id,
                op: id,
                label: "Arg".to_string(),
                info: Some(name.to_string()),
                deps: Vec::new(),
            },
            size: shapes.len(),
        });
        self.args.push((name.to_string(), node.clone()));
        Ok(node)
    }

    /// Generic unary emission point.
    pub fn unary_fn(&mut self, op: PrimitiveOp, x: &Node) -> Result<Node> {
        self.emit(op, None, &[x])
    }

    /// Generic binary emission point.
    pub fn binary_fn(&mut self, op: PrimitiveOp, x: &Node, y: &Node) -> Result<Node> {
        self.emit(op, None, &[x, y])
    }

    /// Generic reduction. An empty axis list is the identity: the input node
    /// is returned unchanged, for every reduction operator.
    pub fn reduce_fn(&mut self, op: ReduceFn, x: &Node, axes: &[usize]) -> Result<Node> {
        self.check(x)?;
        if axes.is_empty() {
            return Ok(x.clone());
        }
        self.emit(
            PrimitiveOp::Reduce {
                op,
                axes: axes.to_vec(),
            },
            Some(format!("axes {axes:?}")),
            &[x],
        )
    }

    /// Map a language-level unary operator onto a primitive.
    pub fn unary(&mut self, op: UnaryOp, x: &Node) -> Result<Node> {
        self.check(x)?;
        match op {
            UnaryOp::Plus => Ok(x.clone()),
            UnaryOp::Neg => self.unary_fn(PrimitiveOp::Neg, x),
            UnaryOp::Not => self.unary_fn(PrimitiveOp::Not, x),
        }
    }

    /// Map a language-level binary operator onto a primitive.
    ///
    /// Shift-right picks the primitive from the operand dtype: logical for
    /// unsigned, arithmetic for signed.
    pub fn binary(&mut self, op: BinaryOp, x: &Node, y: &Node) -> Result<Node> {
        let prim = match op {
            BinaryOp::Add => PrimitiveOp::Add,
            BinaryOp::Sub => PrimitiveOp::Sub,
            BinaryOp::Mul => PrimitiveOp::Mul,
            BinaryOp::Div => PrimitiveOp::Div,
            BinaryOp::Rem => PrimitiveOp::Rem,
            BinaryOp::Eq => PrimitiveOp::Eq,
            BinaryOp::Ne => PrimitiveOp::Ne,
            BinaryOp::Lt => PrimitiveOp::Lt,
            BinaryOp::Le => PrimitiveOp::Le,
            BinaryOp::Gt => PrimitiveOp::Gt,
            BinaryOp::Ge => PrimitiveOp::Ge,
            BinaryOp::Shl => PrimitiveOp::Shl,
            BinaryOp::Shr => {
                if self.array_shape(x)?.dtype.is_unsigned() {
                    PrimitiveOp::ShrLogical
                } else {
                    PrimitiveOp::ShrArithmetic
                }
            }
            BinaryOp::BitAnd => PrimitiveOp::And,
            BinaryOp::BitOr => PrimitiveOp::Or,
            BinaryOp::BitXor => PrimitiveOp::Xor,
            BinaryOp::LogicalAnd => PrimitiveOp::LogicalAnd,
            BinaryOp::LogicalOr => PrimitiveOp::LogicalOr,
            BinaryOp::AndNot => {
                return Err(Error::UnsupportedOperator(op.to_string()));
            }
        };
        self.binary_fn(prim, x, y)
    }

    /// Reshape without element-count validation; that burden is on the
    /// caller, and the backend rejects mismatches at emission.
    pub fn reshape(&mut self, x: &Node, axis_lengths: &[usize]) -> Result<Node> {
        self.emit(
            PrimitiveOp::Reshape(axis_lengths.to_vec()),
            Some(format!("{axis_lengths:?}")),
            &[x],
        )
    }

    /// Value-converting dtype change.
    pub fn cast(&mut self, x: &Node, dtype: DType) -> Result<Node> {
        self.check_dtype(dtype)?;
        self.emit(PrimitiveOp::Convert(dtype), Some(dtype.to_string()), &[x])
    }

    /// Raw bit reinterpretation, no value conversion.
    pub fn bitcast(&mut self, x: &Node, dtype: DType) -> Result<Node> {
        self.check_dtype(dtype)?;
        self.emit(PrimitiveOp::Bitcast(dtype), Some(dtype.to_string()), &[x])
    }

    pub fn concat(&mut self, axis: usize, nodes: &[Node]) -> Result<Node> {
        let inputs: Vec<&Node> = nodes.iter().collect();
        self.emit(PrimitiveOp::Concat(axis), Some(format!("axis {axis}")), &inputs)
    }

    /// Take index `i` on axis 0 and reshape away the degenerate leading
    /// axis; the slice primitive alone does not reduce rank.
    pub fn slice(&mut self, x: &Node, i: usize) -> Result<Node> {
        let shape = self.array_shape(x)?;
        if shape.rank() == 0 {
            return Err(Error::InvalidArgument(format!(
                "cannot slice scalar {shape}"
            )));
        }
        if i >= shape.axis_lengths[0] {
            return Err(Error::InvalidArgument(format!(
                "index {i} is out of bounds on axis 0 of {shape}"
            )));
        }
        let rank = shape.rank();
        let mut starts = vec![0usize; rank];
        let mut limits = shape.axis_lengths.clone();
        starts[0] = i;
        limits[0] = i + 1;
        let sliced = self.emit(
            PrimitiveOp::Slice {
                starts,
                limits,
                strides: vec![1; rank],
            },
            Some(format!("axis 0 index {i}")),
            &[x],
        )?;
        self.reshape(&sliced, &shape.axis_lengths[1..])
    }

    pub fn transpose(&mut self, x: &Node, perm: &[usize]) -> Result<Node> {
        self.emit(
            PrimitiveOp::Transpose(perm.to_vec()),
            Some(format!("{perm:?}")),
            &[x],
        )
    }

    pub fn broadcast_in_dim(&mut self, x: &Node, shape: &Shape, axes: &[usize]) -> Result<Node> {
        self.emit(
            PrimitiveOp::BroadcastInDim {
                shape: shape.clone(),
                axes: axes.to_vec(),
            },
            Some(shape.to_string()),
            &[x],
        )
    }

    /// Gather slices of `x` addressed by `indices`.
    ///
    /// The low-level parameters are derived purely from the two shapes: the
    /// last indices axis is the index vector, its length N addresses the
    /// leading N axes of `x`, and the remaining axes of `x` ride along as
    /// offsets. Indices are declared unsorted.
    pub fn gather(&mut self, x: &Node, indices: &Node) -> Result<Node> {
        let input = self.array_shape(x)?;
        let index_shape = self.array_shape(indices)?;
        let p = input.rank();
        let r = index_shape.rank();
        if r == 0 {
            return Err(Error::InvalidArgument(
                "gather indices must have at least one axis".to_string(),
            ));
        }
        let n = index_shape.axis_lengths[r - 1];
        if n > p {
            return Err(Error::InvalidArgument(format!(
                "gather is over-indexed: index vector of length {n} into rank {p}"
            )));
        }
        let slice_sizes: Vec<usize> = (0..p)
            .map(|axis| if axis < n { 1 } else { input.axis_lengths[axis] })
            .collect();
        self.emit(
            PrimitiveOp::Gather {
                index_vector_axis: r - 1,
                offset_axes: ((r - 1)..(r - 1 + (p - n))).collect(),
                collapsed_slice_axes: (0..n).collect(),
                start_index_map: (0..n).collect(),
                slice_sizes,
                indices_are_sorted: false,
            },
            None,
            &[x, indices],
        )
    }

    /// Split axis `axis` into `num_splits` even pieces, stacked along a new
    /// leading axis. Defined as slice + reshape + concat, not a primitive.
    pub fn split(&mut self, x: &Node, axis: usize, num_splits: usize) -> Result<Node> {
        let shape = self.array_shape(x)?;
        if axis >= shape.rank() {
            return Err(Error::InvalidArgument(format!(
                "split axis {axis} is out of bounds for {shape}"
            )));
        }
        let length = shape.axis_lengths[axis];
        if num_splits == 0 || length % num_splits != 0 {
            return Err(Error::InvalidArgument(format!(
                "cannot split axis {axis} of length {length} into {num_splits} pieces"
            )));
        }
        let chunk = length / num_splits;
        let mut piece_dims = shape.axis_lengths.clone();
        piece_dims[axis] = chunk;
        let mut stacked_dims = vec![1usize];
        stacked_dims.extend_from_slice(&piece_dims);
        let mut pieces = Vec::with_capacity(num_splits);
        for k in 0..num_splits {
            let mut starts = vec![0usize; shape.rank()];
            let mut limits = shape.axis_lengths.clone();
            starts[axis] = k * chunk;
            limits[axis] = (k + 1) * chunk;
            let sliced = self.emit(
                PrimitiveOp::Slice {
                    starts,
                    limits,
                    strides: vec![1; shape.rank()],
                },
                Some(format!("split piece {k}")),
                &[x],
            )?;
            pieces.push(self.reshape(&sliced, &stacked_dims)?);
        }
        self.concat(0, &pieces)
    }

    /// Add `updates` into `x` at `position` (a rank-1 index vector).
    ///
    /// Indices are declared sorted and unique; callers must guarantee this,
    /// there is no runtime check.
    pub fn set(&mut self, x: &Node, updates: &Node, position: &Node) -> Result<Node> {
        let position_shape = self.array_shape(position)?;
        if position_shape.rank() != 1 {
            return Err(Error::InvalidArgument(format!(
                "set position must be a rank-1 index vector, got {position_shape}"
            )));
        }
        let n = position_shape.axis_lengths[0];
        let updates_rank = self.array_shape(updates)?.rank();
        self.emit(
            PrimitiveOp::ScatterAdd {
                index_vector_axis: 0,
                update_window_axes: (0..updates_rank).collect(),
                inserted_window_axes: (0..n).collect(),
                scatter_to_operand_axes: (0..n).collect(),
                indices_are_sorted: true,
                unique_indices: true,
            },
            None,
            &[x, position, updates],
        )
    }

    pub fn dot_general(
        &mut self,
        x: &Node,
        y: &Node,
        batch_axes: [Vec<usize>; 2],
        reduce_axes: [Vec<usize>; 2],
    ) -> Result<Node> {
        self.emit(
            PrimitiveOp::DotGeneral {
                batch_axes,
                reduce_axes,
            },
            None,
            &[x, y],
        )
    }

    pub fn arg_min_max(
        &mut self,
        x: &Node,
        axis: usize,
        dtype: DType,
        is_min: bool,
    ) -> Result<Node> {
        self.check_dtype(dtype)?;
        self.emit(
            PrimitiveOp::ArgMinMax {
                axis,
                dtype,
                is_min,
            },
            Some(format!("axis {axis}")),
            &[x],
        )
    }

    pub fn iota(&mut self, shape: &Shape, axis: usize) -> Result<Node> {
        self.check_dtype(shape.dtype)?;
        self.emit(
            PrimitiveOp::Iota {
                shape: shape.clone(),
                axis,
            },
            Some(shape.to_string()),
            &[],
        )
    }

    /// Draw raw bits into `shape` from a u64 RNG state node. Returns the
    /// advanced state and the drawn values.
    pub fn rng_bit_generator(&mut self, state: &Node, shape: &Shape) -> Result<(Node, Node)> {
        self.check_dtype(shape.dtype)?;
        let pair = self.emit(
            PrimitiveOp::RngBitGenerator(shape.clone()),
            Some(shape.to_string()),
            &[state],
        )?;
        let new_state = self.tuple_element(&pair, 0)?;
        let values = self.tuple_element(&pair, 1)?;
        Ok((new_state, values))
    }

    /// Group nodes into a tuple node.
    pub fn tuple(&mut self, nodes: &[Node]) -> Result<Node> {
        let inputs: Vec<&Node> = nodes.iter().collect();
        self.emit(PrimitiveOp::Tuple, None, &inputs)
    }

    /// Extract component `i` of a tuple node.
    pub fn tuple_element(&mut self, tuple: &Node, i: usize) -> Result<Node> {
        let tuple = self.as_tuple(tuple)?;
        let size = tuple.tuple_size().unwrap_or(0);
        if i >= size {
            return Err(Error::InvalidArgument(format!(
                "tuple element {i} is out of range for size {size}"
            )));
        }
        self.emit(
            PrimitiveOp::GetTupleElement(i),
            Some(i.to_string()),
            &[&tuple],
        )
    }

    /// Extract every component of a tuple node.
    pub fn unpack(&mut self, tuple: &Node) -> Result<Vec<Node>> {
        let tuple = self.as_tuple(tuple)?;
        let size = tuple.tuple_size().unwrap_or(0);
        (0..size)
            .map(|i| self.tuple_element(&tuple, i))
            .collect()
    }

    /// Checked tuple view of a node. A plain node upgrades only when its
    /// backend shape is structurally a tuple.
    pub fn as_tuple(&self, node: &Node) -> Result<Node> {
        self.check(node)?;
        match node {
            Node::Tuple(_) => Ok(node.clone()),
            Node::Plain(node_ref) => match self.builder.op_shape(node_ref.op)? {
                ValueShape::Tuple(elements) => Ok(Node::Tuple(TupleRef {
                    node: node_ref.clone(),
                    size: elements.len(),
                })),
                ValueShape::Array(shape) => Err(Error::InvalidArgument(format!(
                    "node {} is not a tuple: backend shape is {}",
                    node_ref.label, shape
                ))),
            },
        }
    }

    /// Open a nested graph for a control-flow body. The child shares the
    /// platform but has its own node and argument namespace.
    pub fn subgraph(&self, name: &str) -> Graph {
        let full_name = format!("{}.{}", self.name, name);
        Graph {
            name: full_name.clone(),
            id: GraphId::fresh(),
            platform: self.platform.clone(),
            builder: self.builder.sub_builder(&full_name),
            args: Vec::new(),
        }
    }

    /// Invoke a finished subgraph as a function over `args`.
    ///
    /// The result keeps the subgraph's structure: a tuple result comes back
    /// as a tuple node.
    pub fn call(&mut self, sub: Subgraph, args: &[Node]) -> Result<Node> {
        for arg in args {
            self.check(arg)?;
        }
        let name = sub.graph.name.clone();
        let dump = sub.dump();
        let computation = sub.build()?;
        let inputs: Vec<&Node> = args.iter().collect();
        self.emit(PrimitiveOp::Call(computation), None, &inputs)
            .map_err(|err| subgraph_error(name, err, dump))
    }

    /// Emit a loop node: run `body` while `cond` holds, starting from
    /// `state`. A tuple initial state yields a tuple result.
    ///
    /// Both subgraphs must have been built against the state's shape; a
    /// mismatch surfaces as a compilation error carrying the body's
    /// structural dump.
    pub fn while_loop(&mut self, cond: Subgraph, body: Subgraph, state: &Node) -> Result<Node> {
        self.check(state)?;
        let name = body.graph.name.clone();
        let dump = body.dump();
        let cond = cond.build()?;
        let body = body.build()?;
        self.emit(PrimitiveOp::While { cond, body }, None, &[state])
            .map_err(|err| subgraph_error(name, err, dump))
    }

    /// Compile the graph for a device, with `outputs` and `traced` packed
    /// into one tuple root. Consumes the graph; it is frozen afterwards.
    pub fn compile(
        mut self,
        device: &Device,
        outputs: Vec<OutputNode>,
        traced: Vec<OutputNode>,
    ) -> Result<Runner> {
        if device.platform() != &self.platform {
            return Err(Error::InvalidArgument(format!(
                "device {} does not belong to platform {}",
                device.ordinal(),
                self.platform.name()
            )));
        }
        trace!(
            "compiling graph {} ({} outputs, {} traced)",
            self.name,
            outputs.len(),
            traced.len()
        );
        let all: Vec<Node> = outputs
            .iter()
            .chain(traced.iter())
            .map(|output| output.node.clone())
            .collect();
        let root = self.tuple(&all)?;
        let computation = self
            .builder
            .build(root.op_id())
            .map_err(|err| self.compile_error(err))?;
        let executable = self
            .platform
            .client()
            .compile(&computation)
            .map_err(|err| self.compile_error(err))?;
        let out_shapes = outputs.into_iter().map(|output| output.shape).collect();
        let traced_shapes = traced.into_iter().map(|output| output.shape).collect();
        Ok(Runner::new(
            device.clone(),
            executable,
            out_shapes,
            traced_shapes,
        ))
    }

    fn compile_error(&self, err: Error) -> Error {
        Error::Compilation {
            graph: self.name.clone(),
            detail: err.to_string(),
            dump: None,
        }
    }
}

fn subgraph_error(graph: String, err: Error, dump: String) -> Error {
    match err {
        // Already carries a dump from a nested failure.
        Error::Compilation { .. } => err,
        other => Error::Compilation {
            graph,
            detail: other.to_string(),
            dump: Some(dump),
        },
    }
}

/// A finished nested graph plus its designated result, ready to be embedded
/// in a parent's control-flow node.
///
/// `result_shape` is the shape the caller declared for the result; it is
/// used for diagnostics only, the backend shape stays authoritative.
pub struct Subgraph {
    pub graph: Graph,
    pub result: Node,
    pub result_shape: ValueShape,
}

impl Subgraph {
    pub fn new(graph: Graph, result: Node, result_shape: ValueShape) -> Self {
        Self {
            graph,
            result,
            result_shape,
        }
    }

    /// Structural dump of the subgraph: arguments and the result tree.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "SUBGRAPH({}) {{", self.graph.name);
        for (i, (name, node)) in self.graph.args.iter().enumerate() {
            let _ = writeln!(out, "  arg {i}: {name} = {node}");
        }
        let _ = writeln!(out, "  result ({}):", self.result_shape);
        let _ = writeln!(out, "{}", self.result);
        out.push('}');
        out
    }

    // Builds the child computation. A backend rejection carries the
    // structural dump so loop-body failures stay debuggable.
    fn build(mut self) -> Result<PluginComputation> {
        self.graph.check(&self.result)?;
        self.graph
            .builder
            .build(self.result.op_id())
            .map_err(|err| Error::Compilation {
                graph: self.graph.name.clone(),
                detail: err.to_string(),
                dump: Some(self.dump()),
            })
    }
}
