//! Shape/dtype model and host-resident buffers.

mod buffer;
mod dtype;
mod shape;

pub use buffer::{HostBuffer, TensorElement};
pub use dtype::DType;
pub use shape::Shape;

pub(crate) use shape::{compute_strides, indices_to_linear, linear_to_indices};
