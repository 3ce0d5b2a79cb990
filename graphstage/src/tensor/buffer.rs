use bytemuck::Pod;

use crate::error::{Error, Result};

use super::{DType, Shape};

/// Marker trait tying a Rust scalar type to its bridge dtype.
pub trait TensorElement: Pod {
    /// Dtype tag for this element type.
    const DTYPE: DType;
}

impl TensorElement for i32 {
    const DTYPE: DType = DType::I32;
}
impl TensorElement for i64 {
    const DTYPE: DType = DType::I64;
}
impl TensorElement for u32 {
    const DTYPE: DType = DType::U32;
}
impl TensorElement for u64 {
    const DTYPE: DType = DType::U64;
}
impl TensorElement for f32 {
    const DTYPE: DType = DType::F32;
}
impl TensorElement for f64 {
    const DTYPE: DType = DType::F64;
}

/// Host-resident literal data with its shape.
///
/// The invariant `bytes.len() == shape.byte_size()` holds for every
/// constructed buffer. Bools are stored one byte per element (0 or 1).
#[derive(Debug, Clone, PartialEq)]
pub struct HostBuffer {
    shape: Shape,
    bytes: Vec<u8>,
}

impl HostBuffer {
    /// Build a buffer from raw bytes, validating the byte count.
    pub fn from_bytes(shape: Shape, bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != shape.byte_size() {
            return Err(Error::InvalidArgument(format!(
                "host buffer has {} bytes but shape {} needs {}",
                bytes.len(),
                shape,
                shape.byte_size()
            )));
        }
        Ok(Self { shape, bytes })
    }

    /// Build a buffer from typed elements and axis lengths.
    pub fn of<T: TensorElement>(data: &[T], axis_lengths: impl Into<Vec<usize>>) -> Result<Self> {
        let shape = Shape::new(T::DTYPE, axis_lengths);
        if data.len() != shape.size() {
            return Err(Error::InvalidArgument(format!(
                "{} elements do not fill shape {}",
                data.len(),
                shape
            )));
        }
        Ok(Self {
            shape,
            bytes: bytemuck::cast_slice(data).to_vec(),
        })
    }

    /// Scalar buffer from a single typed value.
    pub fn scalar<T: TensorElement>(value: T) -> Self {
        Self {
            shape: Shape::scalar(T::DTYPE),
            bytes: bytemuck::bytes_of(&value).to_vec(),
        }
    }

    /// Boolean buffer, one byte per element.
    pub fn of_bool(data: &[bool], axis_lengths: impl Into<Vec<usize>>) -> Result<Self> {
        let shape = Shape::new(DType::Bool, axis_lengths);
        if data.len() != shape.size() {
            return Err(Error::InvalidArgument(format!(
                "{} elements do not fill shape {}",
                data.len(),
                shape
            )));
        }
        Ok(Self {
            shape,
            bytes: data.iter().map(|b| u8::from(*b)).collect(),
        })
    }

    /// Shape of the buffer.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Raw bytes of the buffer.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Typed view of the elements, checking the dtype.
    pub fn as_slice<T: TensorElement>(&self) -> Result<&[T]> {
        if self.shape.dtype != T::DTYPE {
            return Err(Error::InvalidArgument(format!(
                "buffer holds {} elements, requested {}",
                self.shape.dtype,
                T::DTYPE
            )));
        }
        Ok(bytemuck::cast_slice(&self.bytes))
    }
}
