//! Shape inference and evaluation of recorded computations.

use crate::backend::{OpId, PluginComputation, PrimitiveOp, ReduceFn, ValueShape};
use crate::error::{Error, Result};
use crate::tensor::{compute_strides, indices_to_linear, linear_to_indices, DType, Shape};

use super::literal::{dispatch_num, Literal, Num, TensorData};

/// One recorded operation.
#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Constant(Literal),
    Parameter { name: String, index: usize },
    Prim { op: PrimitiveOp, inputs: Vec<OpId> },
}

/// A finalized computation: the op arena up to a designated root.
#[derive(Debug, Clone)]
pub(crate) struct Computation {
    pub(crate) name: String,
    pub(crate) exprs: Vec<Expr>,
    pub(crate) shapes: Vec<ValueShape>,
    pub(crate) root: OpId,
    pub(crate) param_shapes: Vec<ValueShape>,
}

impl Computation {
    pub(crate) fn num_parameters(&self) -> usize {
        self.param_shapes.len()
    }

    pub(crate) fn root_shape(&self) -> &ValueShape {
        &self.shapes[self.root.0]
    }
}

/// A computed value: an array literal or a tuple of values.
#[derive(Debug, Clone)]
pub(crate) enum Value {
    Literal(Literal),
    Tuple(Vec<Value>),
}

impl Value {
    fn as_literal(&self) -> Result<&Literal> {
        match self {
            Value::Literal(literal) => Ok(literal),
            Value::Tuple(_) => Err(Error::Execution(
                "expected an array value, found a tuple".to_string(),
            )),
        }
    }
}

fn numel(dims: &[usize]) -> usize {
    dims.iter().copied().product()
}

fn downcast(computation: &PluginComputation) -> Result<&Computation> {
    computation.downcast_ref::<Computation>().ok_or_else(|| {
        Error::Execution("computation was not built by the interp backend".to_string())
    })
}

fn array(shape: &ValueShape) -> Result<&Shape> {
    shape.as_array().ok_or_else(|| {
        Error::InvalidArgument("expected an array operand, found a tuple".to_string())
    })
}

fn arity(op: &PrimitiveOp, inputs: &[ValueShape], want: usize) -> Result<()> {
    if inputs.len() != want {
        return Err(Error::InvalidArgument(format!(
            "{} takes {} inputs, got {}",
            op.label(),
            want,
            inputs.len()
        )));
    }
    Ok(())
}

fn same_shapes(op: &PrimitiveOp, x: &Shape, y: &Shape) -> Result<()> {
    if x != y {
        return Err(Error::InvalidArgument(format!(
            "{} operands must have identical shapes, got {} and {}",
            op.label(),
            x,
            y
        )));
    }
    Ok(())
}

/// Shape the backend infers for a primitive over the given input shapes.
pub(crate) fn infer_prim_shape(op: &PrimitiveOp, inputs: &[ValueShape]) -> Result<ValueShape> {
    match op {
        PrimitiveOp::Add
        | PrimitiveOp::Sub
        | PrimitiveOp::Mul
        | PrimitiveOp::Div
        | PrimitiveOp::Rem => {
            arity(op, inputs, 2)?;
            let (x, y) = (array(&inputs[0])?, array(&inputs[1])?);
            same_shapes(op, x, y)?;
            if !x.dtype.is_int() && !x.dtype.is_float() {
                return Err(Error::InvalidArgument(format!(
                    "{} is not defined for {}",
                    op.label(),
                    x.dtype
                )));
            }
            Ok(ValueShape::Array(x.clone()))
        }
        PrimitiveOp::And | PrimitiveOp::Or | PrimitiveOp::Xor => {
            arity(op, inputs, 2)?;
            let (x, y) = (array(&inputs[0])?, array(&inputs[1])?);
            same_shapes(op, x, y)?;
            if !x.dtype.is_int() && x.dtype != DType::Bool {
                return Err(Error::InvalidArgument(format!(
                    "{} is not defined for {}",
                    op.label(),
                    x.dtype
                )));
            }
            Ok(ValueShape::Array(x.clone()))
        }
        PrimitiveOp::LogicalAnd | PrimitiveOp::LogicalOr => {
            arity(op, inputs, 2)?;
            let (x, y) = (array(&inputs[0])?, array(&inputs[1])?);
            same_shapes(op, x, y)?;
            if x.dtype != DType::Bool {
                return Err(Error::InvalidArgument(format!(
                    "{} requires bool operands, got {}",
                    op.label(),
                    x.dtype
                )));
            }
            Ok(ValueShape::Array(x.clone()))
        }
        PrimitiveOp::Shl | PrimitiveOp::ShrLogical | PrimitiveOp::ShrArithmetic => {
            arity(op, inputs, 2)?;
            let (x, y) = (array(&inputs[0])?, array(&inputs[1])?);
            same_shapes(op, x, y)?;
            if !x.dtype.is_int() {
                return Err(Error::InvalidArgument(format!(
                    "{} requires integer operands, got {}",
                    op.label(),
                    x.dtype
                )));
            }
            Ok(ValueShape::Array(x.clone()))
        }
        PrimitiveOp::Eq
        | PrimitiveOp::Ne
        | PrimitiveOp::Lt
        | PrimitiveOp::Le
        | PrimitiveOp::Gt
        | PrimitiveOp::Ge => {
            arity(op, inputs, 2)?;
            let (x, y) = (array(&inputs[0])?, array(&inputs[1])?);
            same_shapes(op, x, y)?;
            Ok(ValueShape::Array(Shape::new(
                DType::Bool,
                x.axis_lengths.clone(),
            )))
        }
        PrimitiveOp::Neg => {
            arity(op, inputs, 1)?;
            let x = array(&inputs[0])?;
            if !x.dtype.is_int() && !x.dtype.is_float() {
                return Err(Error::InvalidArgument(format!(
                    "Neg is not defined for {}",
                    x.dtype
                )));
            }
            Ok(ValueShape::Array(x.clone()))
        }
        PrimitiveOp::Not => {
            arity(op, inputs, 1)?;
            let x = array(&inputs[0])?;
            if !x.dtype.is_int() && x.dtype != DType::Bool {
                return Err(Error::InvalidArgument(format!(
                    "Not is not defined for {}",
                    x.dtype
                )));
            }
            Ok(ValueShape::Array(x.clone()))
        }
        PrimitiveOp::Cos | PrimitiveOp::Sin | PrimitiveOp::Tanh => {
            arity(op, inputs, 1)?;
            let x = array(&inputs[0])?;
            if !x.dtype.is_float() {
                return Err(Error::InvalidArgument(format!(
                    "{} requires a floating-point operand, got {}",
                    op.label(),
                    x.dtype
                )));
            }
            Ok(ValueShape::Array(x.clone()))
        }
        PrimitiveOp::Reduce { axes, .. } => {
            arity(op, inputs, 1)?;
            let x = array(&inputs[0])?;
            check_axes(axes, x.rank())?;
            Ok(ValueShape::Array(Shape::new(
                x.dtype,
                drop_axes(&x.axis_lengths, axes),
            )))
        }
        PrimitiveOp::ArgMinMax { axis, dtype, .. } => {
            arity(op, inputs, 1)?;
            let x = array(&inputs[0])?;
            if *axis >= x.rank() {
                return Err(Error::InvalidArgument(format!(
                    "axis {} is out of bounds for rank {}",
                    axis,
                    x.rank()
                )));
            }
            if !dtype.is_int() {
                return Err(Error::InvalidArgument(format!(
                    "ArgMinMax output dtype must be an integer, got {dtype}"
                )));
            }
            Ok(ValueShape::Array(Shape::new(
                *dtype,
                drop_axes(&x.axis_lengths, &[*axis]),
            )))
        }
        PrimitiveOp::Reshape(dims) => {
            arity(op, inputs, 1)?;
            let x = array(&inputs[0])?;
            if numel(dims) != x.size() {
                return Err(Error::InvalidArgument(format!(
                    "cannot reshape {} into axis lengths {:?}",
                    x, dims
                )));
            }
            Ok(ValueShape::Array(Shape::new(x.dtype, dims.clone())))
        }
        PrimitiveOp::Convert(dtype) => {
            arity(op, inputs, 1)?;
            let x = array(&inputs[0])?;
            check_supported(*dtype)?;
            Ok(ValueShape::Array(Shape::new(
                *dtype,
                x.axis_lengths.clone(),
            )))
        }
        PrimitiveOp::Bitcast(dtype) => {
            arity(op, inputs, 1)?;
            let x = array(&inputs[0])?;
            check_supported(*dtype)?;
            if dtype.byte_width() != x.dtype.byte_width() {
                return Err(Error::InvalidArgument(format!(
                    "cannot bitcast {} to {}: element widths differ",
                    x.dtype, dtype
                )));
            }
            Ok(ValueShape::Array(Shape::new(
                *dtype,
                x.axis_lengths.clone(),
            )))
        }
        PrimitiveOp::Slice {
            starts,
            limits,
            strides,
        } => {
            arity(op, inputs, 1)?;
            let x = array(&inputs[0])?;
            let rank = x.rank();
            if starts.len() != rank || limits.len() != rank || strides.len() != rank {
                return Err(Error::InvalidArgument(format!(
                    "slice parameters must match rank {rank}"
                )));
            }
            let mut dims = Vec::with_capacity(rank);
            for axis in 0..rank {
                let (start, limit, stride) = (starts[axis], limits[axis], strides[axis]);
                if stride == 0 || start > limit || limit > x.axis_lengths[axis] {
                    return Err(Error::InvalidArgument(format!(
                        "invalid slice [{start}:{limit}:{stride}] on axis {axis} of {x}"
                    )));
                }
                dims.push((limit - start).div_ceil(stride));
            }
            Ok(ValueShape::Array(Shape::new(x.dtype, dims)))
        }
        PrimitiveOp::Transpose(perm) => {
            arity(op, inputs, 1)?;
            let x = array(&inputs[0])?;
            check_permutation(perm, x.rank())?;
            let dims: Vec<usize> = perm.iter().map(|&axis| x.axis_lengths[axis]).collect();
            Ok(ValueShape::Array(Shape::new(x.dtype, dims)))
        }
        PrimitiveOp::Concat(axis) => {
            if inputs.is_empty() {
                return Err(Error::InvalidArgument(
                    "Concat needs at least one input".to_string(),
                ));
            }
            let first = array(&inputs[0])?;
            if *axis >= first.rank() {
                return Err(Error::InvalidArgument(format!(
                    "concat axis {} is out of bounds for rank {}",
                    axis,
                    first.rank()
                )));
            }
            let mut dims = first.axis_lengths.clone();
            for shape in &inputs[1..] {
                let other = array(shape)?;
                if other.dtype != first.dtype || other.rank() != first.rank() {
                    return Err(Error::InvalidArgument(format!(
                        "cannot concatenate {} with {}",
                        first, other
                    )));
                }
                for (a, (&da, &db)) in first
                    .axis_lengths
                    .iter()
                    .zip(other.axis_lengths.iter())
                    .enumerate()
                {
                    if a != *axis && da != db {
                        return Err(Error::InvalidArgument(format!(
                            "cannot concatenate {} with {} along axis {}",
                            first, other, axis
                        )));
                    }
                }
                dims[*axis] += other.axis_lengths[*axis];
            }
            Ok(ValueShape::Array(Shape::new(first.dtype, dims)))
        }
        PrimitiveOp::BroadcastInDim { shape, axes } => {
            arity(op, inputs, 1)?;
            let x = array(&inputs[0])?;
            if axes.len() != x.rank() {
                return Err(Error::InvalidArgument(format!(
                    "broadcast axes {:?} do not match rank {}",
                    axes,
                    x.rank()
                )));
            }
            if shape.dtype != x.dtype {
                return Err(Error::InvalidArgument(format!(
                    "broadcast cannot change dtype {} to {}",
                    x.dtype, shape.dtype
                )));
            }
            for (i, &target_axis) in axes.iter().enumerate() {
                if target_axis >= shape.rank() {
                    return Err(Error::InvalidArgument(format!(
                        "broadcast axis {} is out of bounds for target {}",
                        target_axis, shape
                    )));
                }
                let from = x.axis_lengths[i];
                let to = shape.axis_lengths[target_axis];
                if from != to && from != 1 {
                    return Err(Error::InvalidArgument(format!(
                        "cannot broadcast axis {i} of {x} to length {to}"
                    )));
                }
            }
            Ok(ValueShape::Array(shape.clone()))
        }
        PrimitiveOp::Gather {
            index_vector_axis,
            offset_axes,
            collapsed_slice_axes,
            start_index_map,
            slice_sizes,
            ..
        } => {
            arity(op, inputs, 2)?;
            let x = array(&inputs[0])?;
            let indices = array(&inputs[1])?;
            if !indices.dtype.is_int() {
                return Err(Error::InvalidArgument(format!(
                    "gather indices must be integers, got {}",
                    indices.dtype
                )));
            }
            if indices.rank() == 0 || *index_vector_axis != indices.rank() - 1 {
                return Err(Error::InvalidArgument(
                    "gather index vector must live on the last indices axis".to_string(),
                ));
            }
            let n = indices.axis_lengths[*index_vector_axis];
            if start_index_map.len() != n || collapsed_slice_axes.len() != n {
                return Err(Error::InvalidArgument(format!(
                    "gather maps {} start indices but the index vector has length {}",
                    start_index_map.len(),
                    n
                )));
            }
            if slice_sizes.len() != x.rank() {
                return Err(Error::InvalidArgument(format!(
                    "gather slice sizes must match operand rank {}",
                    x.rank()
                )));
            }
            for (axis, (&size, &dim)) in slice_sizes.iter().zip(&x.axis_lengths).enumerate() {
                if size > dim {
                    return Err(Error::InvalidArgument(format!(
                        "gather slice size {size} exceeds axis {axis} of {x}"
                    )));
                }
            }
            let batch_dims: Vec<usize> = drop_axes(&indices.axis_lengths, &[*index_vector_axis]);
            let offset_sizes: Vec<usize> = (0..x.rank())
                .filter(|axis| !collapsed_slice_axes.contains(axis))
                .map(|axis| slice_sizes[axis])
                .collect();
            let out_rank = batch_dims.len() + offset_sizes.len();
            if offset_axes.len() != offset_sizes.len() {
                return Err(Error::InvalidArgument(format!(
                    "gather declares {} offset axes but {} survive collapsing",
                    offset_axes.len(),
                    offset_sizes.len()
                )));
            }
            let mut dims = vec![0usize; out_rank];
            let mut offsets = offset_sizes.iter();
            let mut batches = batch_dims.iter();
            for (axis, dim) in dims.iter_mut().enumerate() {
                let source = if offset_axes.contains(&axis) {
                    offsets.next()
                } else {
                    batches.next()
                };
                *dim = *source.ok_or_else(|| {
                    Error::InvalidArgument("gather output axes are inconsistent".to_string())
                })?;
            }
            Ok(ValueShape::Array(Shape::new(x.dtype, dims)))
        }
        PrimitiveOp::ScatterAdd {
            inserted_window_axes,
            ..
        } => {
            arity(op, inputs, 3)?;
            let x = array(&inputs[0])?;
            let indices = array(&inputs[1])?;
            let updates = array(&inputs[2])?;
            if !indices.dtype.is_int() {
                return Err(Error::InvalidArgument(format!(
                    "scatter indices must be integers, got {}",
                    indices.dtype
                )));
            }
            if indices.rank() != 1 {
                return Err(Error::InvalidArgument(
                    "scatter supports a single index vector".to_string(),
                ));
            }
            let n = indices.axis_lengths[0];
            if n != inserted_window_axes.len() || n > x.rank() {
                return Err(Error::InvalidArgument(format!(
                    "scatter index vector of length {n} does not fit operand {x}"
                )));
            }
            if updates.dtype != x.dtype || updates.axis_lengths != x.axis_lengths[n..] {
                return Err(Error::InvalidArgument(format!(
                    "scatter updates {updates} do not match operand {x} window"
                )));
            }
            Ok(ValueShape::Array(x.clone()))
        }
        PrimitiveOp::DotGeneral {
            batch_axes,
            reduce_axes,
        } => {
            arity(op, inputs, 2)?;
            let x = array(&inputs[0])?;
            let y = array(&inputs[1])?;
            let dims = dot_output_dims(x, y, batch_axes, reduce_axes)?;
            Ok(ValueShape::Array(Shape::new(x.dtype, dims)))
        }
        PrimitiveOp::Iota { shape, axis } => {
            arity(op, inputs, 0)?;
            check_supported(shape.dtype)?;
            if shape.dtype == DType::Bool {
                return Err(Error::InvalidArgument(
                    "Iota is not defined for bool".to_string(),
                ));
            }
            if *axis >= shape.rank() {
                return Err(Error::InvalidArgument(format!(
                    "iota axis {} is out of bounds for {}",
                    axis, shape
                )));
            }
            Ok(ValueShape::Array(shape.clone()))
        }
        PrimitiveOp::RngBitGenerator(shape) => {
            arity(op, inputs, 1)?;
            let state = array(&inputs[0])?;
            if state.dtype != DType::U64 {
                return Err(Error::InvalidArgument(format!(
                    "RNG state must be u64, got {}",
                    state.dtype
                )));
            }
            check_supported(shape.dtype)?;
            Ok(ValueShape::Tuple(vec![
                ValueShape::Array(state.clone()),
                ValueShape::Array(shape.clone()),
            ]))
        }
        PrimitiveOp::Tuple => Ok(ValueShape::Tuple(inputs.to_vec())),
        PrimitiveOp::GetTupleElement(i) => {
            arity(op, inputs, 1)?;
            match &inputs[0] {
                ValueShape::Tuple(elements) => elements.get(*i).cloned().ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "tuple element {} is out of range for size {}",
                        i,
                        elements.len()
                    ))
                }),
                ValueShape::Array(shape) => Err(Error::InvalidArgument(format!(
                    "cannot extract a tuple element from array {shape}"
                ))),
            }
        }
        PrimitiveOp::Call(computation) => {
            let comp = downcast(computation)?;
            if inputs.len() != comp.num_parameters() {
                return Err(Error::InvalidArgument(format!(
                    "{} takes {} arguments, got {}",
                    comp.name,
                    comp.num_parameters(),
                    inputs.len()
                )));
            }
            for (i, (got, want)) in inputs.iter().zip(comp.param_shapes.iter()).enumerate() {
                if got != want {
                    return Err(Error::InvalidArgument(format!(
                        "{} declares parameter {} as {}, got {}",
                        comp.name, i, want, got
                    )));
                }
            }
            Ok(comp.root_shape().clone())
        }
        PrimitiveOp::While { cond, body } => {
            arity(op, inputs, 1)?;
            let state = &inputs[0];
            let cond = downcast(cond)?;
            let body = downcast(body)?;
            for comp in [&cond, &body] {
                if comp.param_shapes.as_slice() != std::slice::from_ref(state) {
                    return Err(Error::InvalidArgument(format!(
                        "{} must take the loop state {} as its only parameter",
                        comp.name, state
                    )));
                }
            }
            let bool_scalar = ValueShape::Array(Shape::scalar(DType::Bool));
            if *cond.root_shape() != bool_scalar {
                return Err(Error::InvalidArgument(format!(
                    "loop condition must produce a bool scalar, got {}",
                    cond.root_shape()
                )));
            }
            if body.root_shape() != state {
                return Err(Error::InvalidArgument(format!(
                    "loop body produces {} but the state is {}",
                    body.root_shape(),
                    state
                )));
            }
            Ok(state.clone())
        }
    }
}

fn check_supported(dtype: DType) -> Result<()> {
    if matches!(dtype, DType::Bf16 | DType::F16) {
        return Err(Error::UnsupportedDType {
            dtype,
            backend: "interp".to_string(),
        });
    }
    Ok(())
}

fn check_axes(axes: &[usize], rank: usize) -> Result<()> {
    for (i, &axis) in axes.iter().enumerate() {
        if axis >= rank {
            return Err(Error::InvalidArgument(format!(
                "axis {axis} is out of bounds for rank {rank}"
            )));
        }
        if axes[..i].contains(&axis) {
            return Err(Error::InvalidArgument(format!("duplicate axis {axis}")));
        }
    }
    Ok(())
}

fn check_permutation(perm: &[usize], rank: usize) -> Result<()> {
    if perm.len() != rank {
        return Err(Error::InvalidArgument(format!(
            "permutation {perm:?} does not match rank {rank}"
        )));
    }
    check_axes(perm, rank)
}

fn drop_axes(dims: &[usize], axes: &[usize]) -> Vec<usize> {
    dims.iter()
        .enumerate()
        .filter(|(axis, _)| !axes.contains(axis))
        .map(|(_, &dim)| dim)
        .collect()
}

fn dot_output_dims(
    x: &Shape,
    y: &Shape,
    batch_axes: &[Vec<usize>; 2],
    reduce_axes: &[Vec<usize>; 2],
) -> Result<Vec<usize>> {
    if x.dtype != y.dtype {
        return Err(Error::InvalidArgument(format!(
            "dot operands must share a dtype, got {} and {}",
            x.dtype, y.dtype
        )));
    }
    if batch_axes[0].len() != batch_axes[1].len() || reduce_axes[0].len() != reduce_axes[1].len() {
        return Err(Error::InvalidArgument(
            "dot axis lists must come in equal-length pairs".to_string(),
        ));
    }
    check_axes(&[batch_axes[0].clone(), reduce_axes[0].clone()].concat(), x.rank())?;
    check_axes(&[batch_axes[1].clone(), reduce_axes[1].clone()].concat(), y.rank())?;
    for (&a, &b) in batch_axes[0].iter().zip(&batch_axes[1]) {
        if x.axis_lengths[a] != y.axis_lengths[b] {
            return Err(Error::InvalidArgument(format!(
                "dot batch axes {a} and {b} have different lengths"
            )));
        }
    }
    for (&a, &b) in reduce_axes[0].iter().zip(&reduce_axes[1]) {
        if x.axis_lengths[a] != y.axis_lengths[b] {
            return Err(Error::InvalidArgument(format!(
                "dot contraction axes {a} and {b} have different lengths"
            )));
        }
    }
    let mut dims: Vec<usize> = batch_axes[0].iter().map(|&a| x.axis_lengths[a]).collect();
    dims.extend(free_axes(x.rank(), &batch_axes[0], &reduce_axes[0]).map(|a| x.axis_lengths[a]));
    dims.extend(free_axes(y.rank(), &batch_axes[1], &reduce_axes[1]).map(|a| y.axis_lengths[a]));
    Ok(dims)
}

fn free_axes<'a>(
    rank: usize,
    batch: &'a [usize],
    reduce: &'a [usize],
) -> impl Iterator<Item = usize> + 'a {
    (0..rank).filter(move |axis| !batch.contains(axis) && !reduce.contains(axis))
}

/// Evaluate a computation against its parameter values.
pub(crate) fn eval_computation(comp: &Computation, params: &[Value]) -> Result<Value> {
    if params.len() != comp.num_parameters() {
        return Err(Error::Execution(format!(
            "{} takes {} parameters, got {}",
            comp.name,
            comp.num_parameters(),
            params.len()
        )));
    }
    // Only resolve ops the root actually depends on; the arena may hold
    // emitted-but-unused nodes that must not affect the run.
    let mut live = vec![false; comp.exprs.len()];
    let mut pending = vec![comp.root.0];
    while let Some(id) = pending.pop() {
        if std::mem::replace(&mut live[id], true) {
            continue;
        }
        if let Expr::Prim { inputs, .. } = &comp.exprs[id] {
            pending.extend(inputs.iter().map(|input| input.0));
        }
    }
    let mut memo: Vec<Option<Value>> = vec![None; comp.exprs.len()];
    // Exprs only reference earlier ids, so one forward resolve pass suffices.
    for id in (0..=comp.root.0).filter(|&id| live[id]) {
        let value = eval_expr(comp, id, &memo, params)?;
        memo[id] = Some(value);
    }
    memo[comp.root.0]
        .take()
        .ok_or_else(|| Error::Execution("computation root was not evaluated".to_string()))
}

fn eval_expr(
    comp: &Computation,
    id: usize,
    memo: &[Option<Value>],
    params: &[Value],
) -> Result<Value> {
    match &comp.exprs[id] {
        Expr::Constant(literal) => Ok(Value::Literal(literal.clone())),
        Expr::Parameter { name, index } => params.get(*index).cloned().ok_or_else(|| {
            Error::Execution(format!("parameter {name} (index {index}) was not provided"))
        }),
        Expr::Prim { op, inputs } => {
            let args: Vec<&Value> = inputs
                .iter()
                .map(|input| {
                    memo[input.0]
                        .as_ref()
                        .ok_or_else(|| Error::Execution("op evaluated out of order".to_string()))
                })
                .collect::<Result<_>>()?;
            eval_prim(op, &args, &comp.shapes[id])
        }
    }
}

fn eval_prim(op: &PrimitiveOp, args: &[&Value], out_shape: &ValueShape) -> Result<Value> {
    match op {
        PrimitiveOp::Add | PrimitiveOp::Sub | PrimitiveOp::Mul => binary_arith(op, args),
        PrimitiveOp::Div => div_rem(args, false),
        PrimitiveOp::Rem => div_rem(args, true),
        PrimitiveOp::Neg => Ok(Value::Literal(neg_literal(args[0].as_literal()?)?)),
        PrimitiveOp::Not => not_literal(args[0].as_literal()?),
        PrimitiveOp::And | PrimitiveOp::Or | PrimitiveOp::Xor => bitwise(op, args),
        PrimitiveOp::LogicalAnd | PrimitiveOp::LogicalOr => logical(op, args),
        PrimitiveOp::Shl | PrimitiveOp::ShrLogical | PrimitiveOp::ShrArithmetic => {
            shift(op, args)
        }
        PrimitiveOp::Eq
        | PrimitiveOp::Ne
        | PrimitiveOp::Lt
        | PrimitiveOp::Le
        | PrimitiveOp::Gt
        | PrimitiveOp::Ge => compare(op, args),
        PrimitiveOp::Cos | PrimitiveOp::Sin | PrimitiveOp::Tanh => float_unary(op, args),
        PrimitiveOp::Reduce { op: reduce_op, axes } => {
            Ok(Value::Literal(reduce(args[0].as_literal()?, *reduce_op, axes)?))
        }
        PrimitiveOp::ArgMinMax {
            axis,
            dtype,
            is_min,
        } => Ok(Value::Literal(arg_min_max(
            args[0].as_literal()?,
            *axis,
            *dtype,
            *is_min,
        )?)),
        PrimitiveOp::Reshape(dims) => Ok(Value::Literal(
            args[0].as_literal()?.with_dims(dims.clone()),
        )),
        PrimitiveOp::Convert(dtype) => {
            Ok(Value::Literal(convert(args[0].as_literal()?, *dtype)?))
        }
        PrimitiveOp::Bitcast(dtype) => {
            let x = args[0].as_literal()?;
            let shape = Shape::new(*dtype, x.dims.clone());
            Ok(Value::Literal(Literal::from_bytes(&shape, &x.to_bytes())?))
        }
        PrimitiveOp::Slice {
            starts,
            limits: _,
            strides,
        } => Ok(Value::Literal(slice(
            args[0].as_literal()?,
            starts,
            strides,
            expect_array(out_shape)?,
        )?)),
        PrimitiveOp::Transpose(perm) => {
            Ok(Value::Literal(transpose(args[0].as_literal()?, perm)?))
        }
        PrimitiveOp::Concat(axis) => {
            let parts: Vec<&Literal> = args
                .iter()
                .map(|value| value.as_literal())
                .collect::<Result<_>>()?;
            Ok(Value::Literal(concat(&parts, *axis, expect_array(out_shape)?)?))
        }
        PrimitiveOp::BroadcastInDim { axes, .. } => Ok(Value::Literal(broadcast_in_dim(
            args[0].as_literal()?,
            axes,
            expect_array(out_shape)?,
        )?)),
        PrimitiveOp::Gather {
            offset_axes,
            collapsed_slice_axes,
            start_index_map,
            slice_sizes,
            ..
        } => Ok(Value::Literal(gather(
            args[0].as_literal()?,
            args[1].as_literal()?,
            offset_axes,
            collapsed_slice_axes,
            start_index_map,
            slice_sizes,
            expect_array(out_shape)?,
        )?)),
        PrimitiveOp::ScatterAdd { .. } => Ok(Value::Literal(scatter_add(
            args[0].as_literal()?,
            args[1].as_literal()?,
            args[2].as_literal()?,
        )?)),
        PrimitiveOp::DotGeneral {
            batch_axes,
            reduce_axes,
        } => Ok(Value::Literal(dot_general(
            args[0].as_literal()?,
            args[1].as_literal()?,
            batch_axes,
            reduce_axes,
            expect_array(out_shape)?,
        )?)),
        PrimitiveOp::Iota { shape, axis } => Ok(Value::Literal(iota(shape, *axis)?)),
        PrimitiveOp::RngBitGenerator(shape) => {
            let (state, bits) = rng_bit_generator(args[0].as_literal()?, shape)?;
            Ok(Value::Tuple(vec![Value::Literal(state), Value::Literal(bits)]))
        }
        PrimitiveOp::Tuple => Ok(Value::Tuple(
            args.iter().map(|value| (*value).clone()).collect(),
        )),
        PrimitiveOp::GetTupleElement(i) => match args[0] {
            Value::Tuple(elements) => elements.get(*i).cloned().ok_or_else(|| {
                Error::Execution(format!("tuple has no element {i}"))
            }),
            Value::Literal(_) => Err(Error::Execution(
                "GetTupleElement applied to an array".to_string(),
            )),
        },
        PrimitiveOp::Call(computation) => {
            let comp = downcast(computation)?;
            let params: Vec<Value> = args.iter().map(|value| (*value).clone()).collect();
            eval_computation(comp, &params)
        }
        PrimitiveOp::While { cond, body } => {
            let cond = downcast(cond)?;
            let body = downcast(body)?;
            let mut state = args[0].clone();
            loop {
                let keep_going = eval_computation(cond, std::slice::from_ref(&state))?;
                let flag = match keep_going.as_literal()?.data {
                    TensorData::Bool(ref bits) => bits.first().copied().unwrap_or(0) != 0,
                    _ => {
                        return Err(Error::Execution(
                            "loop condition did not produce a bool".to_string(),
                        ))
                    }
                };
                if !flag {
                    break;
                }
                state = eval_computation(body, std::slice::from_ref(&state))?;
            }
            Ok(state)
        }
    }
}

fn expect_array(shape: &ValueShape) -> Result<&Shape> {
    shape
        .as_array()
        .ok_or_else(|| Error::Execution("expected an array result shape".to_string()))
}

fn try_zip<T: Copy, U>(a: &[T], b: &[T], f: impl Fn(T, T) -> Result<U>) -> Result<Vec<U>> {
    if a.len() != b.len() {
        return Err(Error::Execution(format!(
            "operand lengths differ: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    a.iter().zip(b).map(|(&x, &y)| f(x, y)).collect()
}

fn binary_arith(op: &PrimitiveOp, args: &[&Value]) -> Result<Value> {
    let x = args[0].as_literal()?;
    let y = args[1].as_literal()?;
    let data = match (&x.data, &y.data) {
        (TensorData::I32(a), TensorData::I32(b)) => {
            TensorData::I32(try_zip(a, b, |p, q| Ok(arith_pick(op, p, q)))?)
        }
        (TensorData::I64(a), TensorData::I64(b)) => {
            TensorData::I64(try_zip(a, b, |p, q| Ok(arith_pick(op, p, q)))?)
        }
        (TensorData::U32(a), TensorData::U32(b)) => {
            TensorData::U32(try_zip(a, b, |p, q| Ok(arith_pick(op, p, q)))?)
        }
        (TensorData::U64(a), TensorData::U64(b)) => {
            TensorData::U64(try_zip(a, b, |p, q| Ok(arith_pick(op, p, q)))?)
        }
        (TensorData::F32(a), TensorData::F32(b)) => {
            TensorData::F32(try_zip(a, b, |p, q| Ok(arith_pick(op, p, q)))?)
        }
        (TensorData::F64(a), TensorData::F64(b)) => {
            TensorData::F64(try_zip(a, b, |p, q| Ok(arith_pick(op, p, q)))?)
        }
        _ => {
            return Err(Error::Execution(format!(
                "{} operands have mismatched dtypes",
                op.label()
            )))
        }
    };
    Ok(Value::Literal(Literal {
        dims: x.dims.clone(),
        data,
    }))
}

fn arith_pick<T: Num>(op: &PrimitiveOp, x: T, y: T) -> T {
    match op {
        PrimitiveOp::Add => Num::add(x, y),
        PrimitiveOp::Sub => Num::sub(x, y),
        PrimitiveOp::Mul => Num::mul(x, y),
        _ => unreachable!("binary_arith only dispatches Add/Sub/Mul"),
    }
}

fn neg_literal(x: &Literal) -> Result<Literal> {
    let data = match &x.data {
        TensorData::I32(v) => TensorData::I32(v.iter().map(|&a| a.wrapping_neg()).collect()),
        TensorData::I64(v) => TensorData::I64(v.iter().map(|&a| a.wrapping_neg()).collect()),
        TensorData::U32(v) => TensorData::U32(v.iter().map(|&a| a.wrapping_neg()).collect()),
        TensorData::U64(v) => TensorData::U64(v.iter().map(|&a| a.wrapping_neg()).collect()),
        TensorData::F32(v) => TensorData::F32(v.iter().map(|&a| -a).collect()),
        TensorData::F64(v) => TensorData::F64(v.iter().map(|&a| -a).collect()),
        TensorData::Bool(_) => {
            return Err(Error::Execution("Neg is not defined for bool".to_string()))
        }
    };
    Ok(Literal {
        dims: x.dims.clone(),
        data,
    })
}

fn not_literal(x: &Literal) -> Result<Value> {
    let data = match &x.data {
        TensorData::Bool(v) => TensorData::Bool(v.iter().map(|&a| u8::from(a == 0)).collect()),
        TensorData::I32(v) => TensorData::I32(v.iter().map(|&a| !a).collect()),
        TensorData::I64(v) => TensorData::I64(v.iter().map(|&a| !a).collect()),
        TensorData::U32(v) => TensorData::U32(v.iter().map(|&a| !a).collect()),
        TensorData::U64(v) => TensorData::U64(v.iter().map(|&a| !a).collect()),
        _ => {
            return Err(Error::Execution(
                "Not is not defined for floats".to_string(),
            ))
        }
    };
    Ok(Value::Literal(Literal {
        dims: x.dims.clone(),
        data,
    }))
}

macro_rules! int_bool_binary {
    ($op:expr, $x:expr, $y:expr, |$a:ident, $b:ident| $body:expr) => {{
        let x = $x;
        let y = $y;
        let data = match (&x.data, &y.data) {
            (TensorData::Bool(p), TensorData::Bool(q)) => {
                TensorData::Bool(try_zip(p, q, |$a, $b| Ok($body))?)
            }
            (TensorData::I32(p), TensorData::I32(q)) => {
                TensorData::I32(try_zip(p, q, |$a, $b| Ok($body))?)
            }
            (TensorData::I64(p), TensorData::I64(q)) => {
                TensorData::I64(try_zip(p, q, |$a, $b| Ok($body))?)
            }
            (TensorData::U32(p), TensorData::U32(q)) => {
                TensorData::U32(try_zip(p, q, |$a, $b| Ok($body))?)
            }
            (TensorData::U64(p), TensorData::U64(q)) => {
                TensorData::U64(try_zip(p, q, |$a, $b| Ok($body))?)
            }
            _ => {
                return Err(Error::Execution(format!(
                    "{} operands have mismatched dtypes",
                    $op.label()
                )))
            }
        };
        Ok(Value::Literal(Literal {
            dims: x.dims.clone(),
            data,
        }))
    }};
}

fn bitwise(op: &PrimitiveOp, args: &[&Value]) -> Result<Value> {
    let x = args[0].as_literal()?;
    let y = args[1].as_literal()?;
    match op {
        PrimitiveOp::And => int_bool_binary!(op, x, y, |a, b| a & b),
        PrimitiveOp::Or => int_bool_binary!(op, x, y, |a, b| a | b),
        PrimitiveOp::Xor => int_bool_binary!(op, x, y, |a, b| a ^ b),
        _ => unreachable!("bitwise only dispatches And/Or/Xor"),
    }
}

fn logical(op: &PrimitiveOp, args: &[&Value]) -> Result<Value> {
    let x = args[0].as_literal()?;
    let y = args[1].as_literal()?;
    let conjunction = matches!(op, PrimitiveOp::LogicalAnd);
    match (&x.data, &y.data) {
        (TensorData::Bool(p), TensorData::Bool(q)) => {
            let data = try_zip(p, q, |a, b| {
                Ok(u8::from(if conjunction {
                    a != 0 && b != 0
                } else {
                    a != 0 || b != 0
                }))
            })?;
            Ok(Value::Literal(Literal {
                dims: x.dims.clone(),
                data: TensorData::Bool(data),
            }))
        }
        _ => Err(Error::Execution(format!(
            "{} requires bool operands",
            op.label()
        ))),
    }
}

fn shift(op: &PrimitiveOp, args: &[&Value]) -> Result<Value> {
    let x = args[0].as_literal()?;
    let y = args[1].as_literal()?;
    macro_rules! shift_arm {
        ($p:expr, $q:expr, $ty:ty, $uty:ty) => {
            try_zip($p, $q, |a, b| {
                let amount = b as u32;
                Ok(match op {
                    PrimitiveOp::Shl => a.wrapping_shl(amount),
                    PrimitiveOp::ShrArithmetic => a.wrapping_shr(amount),
                    PrimitiveOp::ShrLogical => {
                        ((a as $uty).wrapping_shr(amount)) as $ty
                    }
                    _ => unreachable!("shift only dispatches shifts"),
                })
            })?
        };
    }
    let data = match (&x.data, &y.data) {
        (TensorData::I32(p), TensorData::I32(q)) => TensorData::I32(shift_arm!(p, q, i32, u32)),
        (TensorData::I64(p), TensorData::I64(q)) => TensorData::I64(shift_arm!(p, q, i64, u64)),
        (TensorData::U32(p), TensorData::U32(q)) => TensorData::U32(shift_arm!(p, q, u32, u32)),
        (TensorData::U64(p), TensorData::U64(q)) => TensorData::U64(shift_arm!(p, q, u64, u64)),
        _ => {
            return Err(Error::Execution(format!(
                "{} requires integer operands of one dtype",
                op.label()
            )))
        }
    };
    Ok(Value::Literal(Literal {
        dims: x.dims.clone(),
        data,
    }))
}

fn div_rem(args: &[&Value], remainder: bool) -> Result<Value> {
    let x = args[0].as_literal()?;
    let y = args[1].as_literal()?;
    macro_rules! int_arm {
        ($p:expr, $q:expr) => {
            try_zip($p, $q, |a, b| {
                let result = if remainder {
                    a.checked_rem(b)
                } else {
                    a.checked_div(b)
                };
                result.ok_or_else(|| {
                    Error::Execution("integer division by zero".to_string())
                })
            })?
        };
    }
    let data = match (&x.data, &y.data) {
        (TensorData::I32(p), TensorData::I32(q)) => TensorData::I32(int_arm!(p, q)),
        (TensorData::I64(p), TensorData::I64(q)) => TensorData::I64(int_arm!(p, q)),
        (TensorData::U32(p), TensorData::U32(q)) => TensorData::U32(int_arm!(p, q)),
        (TensorData::U64(p), TensorData::U64(q)) => TensorData::U64(int_arm!(p, q)),
        (TensorData::F32(p), TensorData::F32(q)) => TensorData::F32(try_zip(p, q, |a, b| {
            Ok(if remainder { a % b } else { a / b })
        })?),
        (TensorData::F64(p), TensorData::F64(q)) => TensorData::F64(try_zip(p, q, |a, b| {
            Ok(if remainder { a % b } else { a / b })
        })?),
        _ => {
            return Err(Error::Execution(
                "division operands have mismatched dtypes".to_string(),
            ))
        }
    };
    Ok(Value::Literal(Literal {
        dims: x.dims.clone(),
        data,
    }))
}

fn compare(op: &PrimitiveOp, args: &[&Value]) -> Result<Value> {
    let x = args[0].as_literal()?;
    let y = args[1].as_literal()?;
    macro_rules! cmp_arm {
        ($p:expr, $q:expr) => {
            try_zip($p, $q, |a, b| {
                Ok(u8::from(match op {
                    PrimitiveOp::Eq => a == b,
                    PrimitiveOp::Ne => a != b,
                    PrimitiveOp::Lt => a < b,
                    PrimitiveOp::Le => a <= b,
                    PrimitiveOp::Gt => a > b,
                    PrimitiveOp::Ge => a >= b,
                    _ => unreachable!("compare only dispatches comparisons"),
                }))
            })?
        };
    }
    let data = match (&x.data, &y.data) {
        (TensorData::Bool(p), TensorData::Bool(q)) => cmp_arm!(p, q),
        (TensorData::I32(p), TensorData::I32(q)) => cmp_arm!(p, q),
        (TensorData::I64(p), TensorData::I64(q)) => cmp_arm!(p, q),
        (TensorData::U32(p), TensorData::U32(q)) => cmp_arm!(p, q),
        (TensorData::U64(p), TensorData::U64(q)) => cmp_arm!(p, q),
        (TensorData::F32(p), TensorData::F32(q)) => cmp_arm!(p, q),
        (TensorData::F64(p), TensorData::F64(q)) => cmp_arm!(p, q),
        _ => {
            return Err(Error::Execution(format!(
                "{} operands have mismatched dtypes",
                op.label()
            )))
        }
    };
    Ok(Value::Literal(Literal {
        dims: x.dims.clone(),
        data: TensorData::Bool(data),
    }))
}

fn float_unary(op: &PrimitiveOp, args: &[&Value]) -> Result<Value> {
    let x = args[0].as_literal()?;
    macro_rules! unary_arm {
        ($v:expr) => {
            $v.iter()
                .map(|&a| match op {
                    PrimitiveOp::Cos => a.cos(),
                    PrimitiveOp::Sin => a.sin(),
                    PrimitiveOp::Tanh => a.tanh(),
                    _ => unreachable!("float_unary only dispatches Cos/Sin/Tanh"),
                })
                .collect()
        };
    }
    let data = match &x.data {
        TensorData::F32(v) => TensorData::F32(unary_arm!(v)),
        TensorData::F64(v) => TensorData::F64(unary_arm!(v)),
        other => {
            return Err(Error::Execution(format!(
                "{} is not defined for {}",
                op.label(),
                other.dtype()
            )))
        }
    };
    Ok(Value::Literal(Literal {
        dims: x.dims.clone(),
        data,
    }))
}

fn reduce_typed<T: Num>(
    xs: &[T],
    dims: &[usize],
    axes: &[usize],
    op: ReduceFn,
) -> Result<Vec<T>> {
    let out_dims = drop_axes(dims, axes);
    let mut out: Vec<Option<T>> = vec![None; numel(&out_dims)];
    for (linear, &value) in xs.iter().enumerate() {
        let coords = linear_to_indices(linear, dims);
        let out_coords = drop_axes(&coords, axes);
        let slot = &mut out[indices_to_linear(&out_coords, &out_dims)];
        *slot = Some(match *slot {
            None => value,
            Some(acc) => match op {
                ReduceFn::Sum => Num::add(acc, value),
                ReduceFn::Prod => Num::mul(acc, value),
                ReduceFn::Max => Num::maximum(acc, value),
                ReduceFn::Min => Num::minimum(acc, value),
            },
        });
    }
    out.into_iter()
        .map(|slot| match slot {
            Some(value) => Ok(value),
            None => match op {
                ReduceFn::Sum => Ok(T::ZERO),
                ReduceFn::Prod => Ok(T::ONE),
                ReduceFn::Max | ReduceFn::Min => Err(Error::Execution(
                    "cannot reduce a zero-length axis with max/min".to_string(),
                )),
            },
        })
        .collect()
}

fn reduce(x: &Literal, op: ReduceFn, axes: &[usize]) -> Result<Literal> {
    let out_dims = drop_axes(&x.dims, axes);
    let data = dispatch_num!(
        &x.data,
        |xs| reduce_typed(xs, &x.dims, axes, op)?,
        Error::Execution("cannot reduce bool values".to_string())
    );
    Ok(Literal {
        dims: out_dims,
        data,
    })
}

fn arg_min_max(x: &Literal, axis: usize, dtype: DType, is_min: bool) -> Result<Literal> {
    let out_dims = drop_axes(&x.dims, &[axis]);
    let extent = x.dims[axis];
    if extent == 0 {
        return Err(Error::Execution(
            "cannot take argmin/argmax over a zero-length axis".to_string(),
        ));
    }
    macro_rules! best_arm {
        ($v:expr) => {{
            let mut best: Vec<Option<(usize, _)>> = vec![None; numel(&out_dims)];
            for (linear, &value) in $v.iter().enumerate() {
                let coords = linear_to_indices(linear, &x.dims);
                let position = coords[axis];
                let out_coords = drop_axes(&coords, &[axis]);
                let slot = &mut best[indices_to_linear(&out_coords, &out_dims)];
                let better = match slot {
                    None => true,
                    Some((_, current)) => {
                        if is_min {
                            value < *current
                        } else {
                            value > *current
                        }
                    }
                };
                if better {
                    *slot = Some((position, value));
                }
            }
            best.into_iter()
                .map(|slot| slot.map(|(position, _)| position))
                .collect::<Option<Vec<usize>>>()
                .ok_or_else(|| {
                    Error::Execution("argmin/argmax saw an unfilled output slot".to_string())
                })?
        }};
    }
    let winners: Vec<usize> = match &x.data {
        TensorData::I32(v) => best_arm!(v),
        TensorData::I64(v) => best_arm!(v),
        TensorData::U32(v) => best_arm!(v),
        TensorData::U64(v) => best_arm!(v),
        TensorData::F32(v) => best_arm!(v),
        TensorData::F64(v) => best_arm!(v),
        TensorData::Bool(_) => {
            return Err(Error::Execution(
                "argmin/argmax is not defined for bool".to_string(),
            ))
        }
    };
    let data = match dtype {
        DType::I32 => TensorData::I32(winners.iter().map(|&i| i as i32).collect()),
        DType::I64 => TensorData::I64(winners.iter().map(|&i| i as i64).collect()),
        DType::U32 => TensorData::U32(winners.iter().map(|&i| i as u32).collect()),
        DType::U64 => TensorData::U64(winners.iter().map(|&i| i as u64).collect()),
        other => {
            return Err(Error::Execution(format!(
                "argmin/argmax cannot produce {other}"
            )))
        }
    };
    Ok(Literal {
        dims: out_dims,
        data,
    })
}

macro_rules! cast_vec {
    ($xs:expr, $target:expr) => {
        match $target {
            DType::Bool => TensorData::Bool(
                $xs.iter().map(|&v| u8::from((v as f64) != 0.0)).collect(),
            ),
            DType::I32 => TensorData::I32($xs.iter().map(|&v| v as i32).collect()),
            DType::I64 => TensorData::I64($xs.iter().map(|&v| v as i64).collect()),
            DType::U32 => TensorData::U32($xs.iter().map(|&v| v as u32).collect()),
            DType::U64 => TensorData::U64($xs.iter().map(|&v| v as u64).collect()),
            DType::F32 => TensorData::F32($xs.iter().map(|&v| v as f32).collect()),
            DType::F64 => TensorData::F64($xs.iter().map(|&v| v as f64).collect()),
            other => {
                return Err(Error::UnsupportedDType {
                    dtype: other,
                    backend: "interp".to_string(),
                })
            }
        }
    };
}

fn convert(x: &Literal, dtype: DType) -> Result<Literal> {
    let data = match &x.data {
        TensorData::Bool(v) => cast_vec!(v, dtype),
        TensorData::I32(v) => cast_vec!(v, dtype),
        TensorData::I64(v) => cast_vec!(v, dtype),
        TensorData::U32(v) => cast_vec!(v, dtype),
        TensorData::U64(v) => cast_vec!(v, dtype),
        TensorData::F32(v) => cast_vec!(v, dtype),
        TensorData::F64(v) => cast_vec!(v, dtype),
    };
    Ok(Literal {
        dims: x.dims.clone(),
        data,
    })
}

fn copy_element(dst: &mut [u8], dst_index: usize, src: &[u8], src_index: usize, width: usize) {
    dst[dst_index * width..(dst_index + 1) * width]
        .copy_from_slice(&src[src_index * width..(src_index + 1) * width]);
}

fn slice(x: &Literal, starts: &[usize], strides: &[usize], out: &Shape) -> Result<Literal> {
    let width = x.dtype().byte_width();
    let src = x.to_bytes();
    let mut dst = vec![0u8; out.byte_size()];
    for linear in 0..out.size() {
        let coords = linear_to_indices(linear, &out.axis_lengths);
        let src_coords: Vec<usize> = coords
            .iter()
            .enumerate()
            .map(|(axis, &c)| starts[axis] + c * strides[axis])
            .collect();
        copy_element(
            &mut dst,
            linear,
            &src,
            indices_to_linear(&src_coords, &x.dims),
            width,
        );
    }
    Literal::from_bytes(out, &dst)
}

fn transpose(x: &Literal, perm: &[usize]) -> Result<Literal> {
    let out_dims: Vec<usize> = perm.iter().map(|&axis| x.dims[axis]).collect();
    let out = Shape::new(x.dtype(), out_dims.clone());
    let width = x.dtype().byte_width();
    let src = x.to_bytes();
    let mut dst = vec![0u8; out.byte_size()];
    for linear in 0..out.size() {
        let coords = linear_to_indices(linear, &out_dims);
        let mut src_coords = vec![0usize; x.dims.len()];
        for (i, &axis) in perm.iter().enumerate() {
            src_coords[axis] = coords[i];
        }
        copy_element(
            &mut dst,
            linear,
            &src,
            indices_to_linear(&src_coords, &x.dims),
            width,
        );
    }
    Literal::from_bytes(&out, &dst)
}

fn concat(parts: &[&Literal], axis: usize, out: &Shape) -> Result<Literal> {
    let width = out.dtype.byte_width();
    let mut dst = vec![0u8; out.byte_size()];
    let mut axis_offset = 0usize;
    for part in parts {
        let src = part.to_bytes();
        for linear in 0..part.len() {
            let mut coords = linear_to_indices(linear, &part.dims);
            coords[axis] += axis_offset;
            copy_element(
                &mut dst,
                indices_to_linear(&coords, &out.axis_lengths),
                &src,
                linear,
                width,
            );
        }
        axis_offset += part.dims[axis];
    }
    Literal::from_bytes(out, &dst)
}

fn broadcast_in_dim(x: &Literal, axes: &[usize], out: &Shape) -> Result<Literal> {
    let width = x.dtype().byte_width();
    let src = x.to_bytes();
    let mut dst = vec![0u8; out.byte_size()];
    for linear in 0..out.size() {
        let coords = linear_to_indices(linear, &out.axis_lengths);
        let src_coords: Vec<usize> = axes
            .iter()
            .enumerate()
            .map(|(i, &target_axis)| {
                if x.dims[i] == 1 {
                    0
                } else {
                    coords[target_axis]
                }
            })
            .collect();
        copy_element(
            &mut dst,
            linear,
            &src,
            indices_to_linear(&src_coords, &x.dims),
            width,
        );
    }
    Literal::from_bytes(out, &dst)
}

#[allow(clippy::too_many_arguments)]
fn gather(
    x: &Literal,
    indices: &Literal,
    offset_axes: &[usize],
    collapsed_slice_axes: &[usize],
    start_index_map: &[usize],
    slice_sizes: &[usize],
    out: &Shape,
) -> Result<Literal> {
    let width = x.dtype().byte_width();
    let src = x.to_bytes();
    let mut dst = vec![0u8; out.byte_size()];
    let batch_dims = drop_axes(&indices.dims, &[indices.dims.len() - 1]);
    let index_strides = compute_strides(&indices.dims);
    let uncollapsed: Vec<usize> = (0..x.dims.len())
        .filter(|axis| !collapsed_slice_axes.contains(axis))
        .collect();
    for linear in 0..out.size() {
        let coords = linear_to_indices(linear, &out.axis_lengths);
        let mut batch_coords = Vec::with_capacity(batch_dims.len());
        let mut offset_coords = Vec::with_capacity(offset_axes.len());
        for (axis, &coord) in coords.iter().enumerate() {
            if offset_axes.contains(&axis) {
                offset_coords.push(coord);
            } else {
                batch_coords.push(coord);
            }
        }
        // Start of the gathered slice, read from the index vector and
        // clamped so the whole slice stays in bounds.
        let mut src_coords = vec![0usize; x.dims.len()];
        for (k, &target_axis) in start_index_map.iter().enumerate() {
            let mut index_linear = 0usize;
            for (i, &b) in batch_coords.iter().enumerate() {
                index_linear += b * index_strides[i];
            }
            index_linear += k * index_strides[indices.dims.len() - 1];
            let raw = indices.index_at(index_linear)?;
            let max_start = x.dims[target_axis] - slice_sizes[target_axis];
            src_coords[target_axis] = (raw.max(0) as usize).min(max_start);
        }
        for (i, &axis) in uncollapsed.iter().enumerate() {
            src_coords[axis] += offset_coords[i];
        }
        copy_element(
            &mut dst,
            linear,
            &src,
            indices_to_linear(&src_coords, &x.dims),
            width,
        );
    }
    Literal::from_bytes(out, &dst)
}

fn add_region<T: Num>(dst: &mut [T], src: &[T], offset: usize) {
    for (slot, &value) in dst[offset..offset + src.len()].iter_mut().zip(src) {
        *slot = Num::add(*slot, value);
    }
}

fn scatter_add(x: &Literal, indices: &Literal, updates: &Literal) -> Result<Literal> {
    let n = indices.len();
    let mut start_coords = vec![0usize; x.dims.len()];
    for (axis, coord) in start_coords.iter_mut().enumerate().take(n) {
        let raw = indices.index_at(axis)?;
        if raw < 0 || raw as usize >= x.dims[axis] {
            return Err(Error::Execution(format!(
                "scatter index {raw} is out of bounds on axis {axis}"
            )));
        }
        *coord = raw as usize;
    }
    let offset = indices_to_linear(&start_coords, &x.dims);
    let mut out = x.clone();
    match (&mut out.data, &updates.data) {
        (TensorData::I32(dst), TensorData::I32(src)) => add_region(dst, src, offset),
        (TensorData::I64(dst), TensorData::I64(src)) => add_region(dst, src, offset),
        (TensorData::U32(dst), TensorData::U32(src)) => add_region(dst, src, offset),
        (TensorData::U64(dst), TensorData::U64(src)) => add_region(dst, src, offset),
        (TensorData::F32(dst), TensorData::F32(src)) => add_region(dst, src, offset),
        (TensorData::F64(dst), TensorData::F64(src)) => add_region(dst, src, offset),
        _ => {
            return Err(Error::Execution(
                "scatter operands have mismatched dtypes".to_string(),
            ))
        }
    }
    Ok(out)
}

fn dot_typed<T: Num>(
    xs: &[T],
    ys: &[T],
    x_dims: &[usize],
    y_dims: &[usize],
    batch_axes: &[Vec<usize>; 2],
    reduce_axes: &[Vec<usize>; 2],
    out_dims: &[usize],
) -> Vec<T> {
    let x_free: Vec<usize> =
        free_axes(x_dims.len(), &batch_axes[0], &reduce_axes[0]).collect();
    let y_free: Vec<usize> =
        free_axes(y_dims.len(), &batch_axes[1], &reduce_axes[1]).collect();
    let contract_dims: Vec<usize> = reduce_axes[0].iter().map(|&a| x_dims[a]).collect();
    let n_batch = batch_axes[0].len();
    let mut out = vec![T::ZERO; numel(out_dims)];
    for (linear, slot) in out.iter_mut().enumerate() {
        let coords = linear_to_indices(linear, out_dims);
        let batch = &coords[..n_batch];
        let lfree = &coords[n_batch..n_batch + x_free.len()];
        let rfree = &coords[n_batch + x_free.len()..];
        let mut acc = T::ZERO;
        for c_linear in 0..numel(&contract_dims).max(1) {
            let c = linear_to_indices(c_linear, &contract_dims);
            let mut x_coords = vec![0usize; x_dims.len()];
            let mut y_coords = vec![0usize; y_dims.len()];
            for (i, &axis) in batch_axes[0].iter().enumerate() {
                x_coords[axis] = batch[i];
            }
            for (i, &axis) in batch_axes[1].iter().enumerate() {
                y_coords[axis] = batch[i];
            }
            for (i, &axis) in reduce_axes[0].iter().enumerate() {
                x_coords[axis] = c[i];
            }
            for (i, &axis) in reduce_axes[1].iter().enumerate() {
                y_coords[axis] = c[i];
            }
            for (i, &axis) in x_free.iter().enumerate() {
                x_coords[axis] = lfree[i];
            }
            for (i, &axis) in y_free.iter().enumerate() {
                y_coords[axis] = rfree[i];
            }
            let lhs = xs[indices_to_linear(&x_coords, x_dims)];
            let rhs = ys[indices_to_linear(&y_coords, y_dims)];
            acc = Num::add(acc, Num::mul(lhs, rhs));
        }
        *slot = acc;
    }
    out
}

fn dot_general(
    x: &Literal,
    y: &Literal,
    batch_axes: &[Vec<usize>; 2],
    reduce_axes: &[Vec<usize>; 2],
    out: &Shape,
) -> Result<Literal> {
    let data = match (&x.data, &y.data) {
        (TensorData::I32(a), TensorData::I32(b)) => TensorData::I32(dot_typed(
            a, b, &x.dims, &y.dims, batch_axes, reduce_axes, &out.axis_lengths,
        )),
        (TensorData::I64(a), TensorData::I64(b)) => TensorData::I64(dot_typed(
            a, b, &x.dims, &y.dims, batch_axes, reduce_axes, &out.axis_lengths,
        )),
        (TensorData::U32(a), TensorData::U32(b)) => TensorData::U32(dot_typed(
            a, b, &x.dims, &y.dims, batch_axes, reduce_axes, &out.axis_lengths,
        )),
        (TensorData::U64(a), TensorData::U64(b)) => TensorData::U64(dot_typed(
            a, b, &x.dims, &y.dims, batch_axes, reduce_axes, &out.axis_lengths,
        )),
        (TensorData::F32(a), TensorData::F32(b)) => TensorData::F32(dot_typed(
            a, b, &x.dims, &y.dims, batch_axes, reduce_axes, &out.axis_lengths,
        )),
        (TensorData::F64(a), TensorData::F64(b)) => TensorData::F64(dot_typed(
            a, b, &x.dims, &y.dims, batch_axes, reduce_axes, &out.axis_lengths,
        )),
        _ => {
            return Err(Error::Execution(
                "dot operands have mismatched dtypes".to_string(),
            ))
        }
    };
    Ok(Literal {
        dims: out.axis_lengths.clone(),
        data,
    })
}

fn iota(shape: &Shape, axis: usize) -> Result<Literal> {
    let size = shape.size();
    macro_rules! iota_arm {
        ($ty:ty, $variant:ident) => {{
            let mut out: Vec<$ty> = Vec::with_capacity(size);
            for linear in 0..size {
                let coords = linear_to_indices(linear, &shape.axis_lengths);
                out.push(<$ty as Num>::from_usize(coords[axis]));
            }
            TensorData::$variant(out)
        }};
    }
    let data = match shape.dtype {
        DType::I32 => iota_arm!(i32, I32),
        DType::I64 => iota_arm!(i64, I64),
        DType::U32 => iota_arm!(u32, U32),
        DType::U64 => iota_arm!(u64, U64),
        DType::F32 => iota_arm!(f32, F32),
        DType::F64 => iota_arm!(f64, F64),
        other => {
            return Err(Error::Execution(format!("Iota is not defined for {other}")))
        }
    };
    Ok(Literal {
        dims: shape.axis_lengths.clone(),
        data,
    })
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn rng_bit_generator(state: &Literal, shape: &Shape) -> Result<(Literal, Literal)> {
    let seeds = match &state.data {
        TensorData::U64(v) if !v.is_empty() => v.clone(),
        _ => {
            return Err(Error::Execution(
                "RNG state must be a non-empty u64 array".to_string(),
            ))
        }
    };
    let mut mixer = seeds
        .iter()
        .fold(0u64, |acc, &s| acc.rotate_left(7) ^ s);
    let mut bytes = vec![0u8; shape.byte_size()];
    let mut consumed = 0u64;
    for chunk in bytes.chunks_mut(8) {
        let block = splitmix64(&mut mixer);
        consumed += 1;
        chunk.copy_from_slice(&block.to_le_bytes()[..chunk.len()]);
    }
    let mut next_seeds = seeds;
    next_seeds[0] = next_seeds[0].wrapping_add(consumed);
    let next_state = Literal {
        dims: state.dims.clone(),
        data: TensorData::U64(next_seeds),
    };
    Ok((next_state, Literal::from_bytes(shape, &bytes)?))
}
