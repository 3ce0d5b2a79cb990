//! Typed host values the interpreter backend computes with.

use crate::error::{Error, Result};
use crate::tensor::{DType, Shape};

/// Flat element storage, one variant per supported dtype.
///
/// Bools are stored one byte per element.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TensorData {
    Bool(Vec<u8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl TensorData {
    pub(crate) fn dtype(&self) -> DType {
        match self {
            TensorData::Bool(_) => DType::Bool,
            TensorData::I32(_) => DType::I32,
            TensorData::I64(_) => DType::I64,
            TensorData::U32(_) => DType::U32,
            TensorData::U64(_) => DType::U64,
            TensorData::F32(_) => DType::F32,
            TensorData::F64(_) => DType::F64,
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            TensorData::Bool(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::I64(v) => v.len(),
            TensorData::U32(v) => v.len(),
            TensorData::U64(v) => v.len(),
            TensorData::F32(v) => v.len(),
            TensorData::F64(v) => v.len(),
        }
    }
}

/// A materialized array value: axis lengths plus flat storage.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Literal {
    pub(crate) dims: Vec<usize>,
    pub(crate) data: TensorData,
}

impl Literal {
    pub(crate) fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub(crate) fn shape(&self) -> Shape {
        Shape::new(self.dtype(), self.dims.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    /// Decode packed host bytes into typed storage.
    pub(crate) fn from_bytes(shape: &Shape, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != shape.byte_size() {
            return Err(Error::InvalidArgument(format!(
                "{} bytes do not fill shape {}",
                bytes.len(),
                shape
            )));
        }
        let data = match shape.dtype {
            DType::Bool => TensorData::Bool(bytes.to_vec()),
            DType::I32 => TensorData::I32(bytemuck::cast_slice(bytes).to_vec()),
            DType::I64 => TensorData::I64(bytemuck::cast_slice(bytes).to_vec()),
            DType::U32 => TensorData::U32(bytemuck::cast_slice(bytes).to_vec()),
            DType::U64 => TensorData::U64(bytemuck::cast_slice(bytes).to_vec()),
            DType::F32 => TensorData::F32(bytemuck::cast_slice(bytes).to_vec()),
            DType::F64 => TensorData::F64(bytemuck::cast_slice(bytes).to_vec()),
            other => {
                return Err(Error::UnsupportedDType {
                    dtype: other,
                    backend: "interp".to_string(),
                })
            }
        };
        Ok(Self {
            dims: shape.axis_lengths.clone(),
            data,
        })
    }

    /// Encode typed storage back into packed host bytes.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        match &self.data {
            TensorData::Bool(v) => v.clone(),
            TensorData::I32(v) => bytemuck::cast_slice(v).to_vec(),
            TensorData::I64(v) => bytemuck::cast_slice(v).to_vec(),
            TensorData::U32(v) => bytemuck::cast_slice(v).to_vec(),
            TensorData::U64(v) => bytemuck::cast_slice(v).to_vec(),
            TensorData::F32(v) => bytemuck::cast_slice(v).to_vec(),
            TensorData::F64(v) => bytemuck::cast_slice(v).to_vec(),
        }
    }

    /// Rebuild the same storage under different axis lengths.
    pub(crate) fn with_dims(&self, dims: Vec<usize>) -> Self {
        Self {
            dims,
            data: self.data.clone(),
        }
    }

    /// Read an element as i64, for index arithmetic.
    pub(crate) fn index_at(&self, linear: usize) -> Result<i64> {
        let value = match &self.data {
            TensorData::I32(v) => v[linear] as i64,
            TensorData::I64(v) => v[linear],
            TensorData::U32(v) => v[linear] as i64,
            TensorData::U64(v) => v[linear] as i64,
            other => {
                return Err(Error::Execution(format!(
                    "{} is not an index dtype",
                    other.dtype()
                )))
            }
        };
        Ok(value)
    }
}

/// Arithmetic surface shared by the numeric storage types.
///
/// Integer addition and multiplication wrap; comparisons on floats follow
/// IEEE semantics.
pub(crate) trait Num: Copy + PartialOrd {
    const ZERO: Self;
    const ONE: Self;
    fn add(self, other: Self) -> Self;
    fn sub(self, other: Self) -> Self;
    fn mul(self, other: Self) -> Self;
    fn maximum(self, other: Self) -> Self;
    fn minimum(self, other: Self) -> Self;
    fn from_usize(value: usize) -> Self;
}

macro_rules! impl_num_int {
    ($($ty:ty),*) => {
        $(impl Num for $ty {
            const ZERO: Self = 0;
            const ONE: Self = 1;
            fn add(self, other: Self) -> Self { self.wrapping_add(other) }
            fn sub(self, other: Self) -> Self { self.wrapping_sub(other) }
            fn mul(self, other: Self) -> Self { self.wrapping_mul(other) }
            fn maximum(self, other: Self) -> Self { Ord::max(self, other) }
            fn minimum(self, other: Self) -> Self { Ord::min(self, other) }
            fn from_usize(value: usize) -> Self { value as $ty }
        })*
    };
}

macro_rules! impl_num_float {
    ($($ty:ty),*) => {
        $(impl Num for $ty {
            const ZERO: Self = 0.0;
            const ONE: Self = 1.0;
            fn add(self, other: Self) -> Self { self + other }
            fn sub(self, other: Self) -> Self { self - other }
            fn mul(self, other: Self) -> Self { self * other }
            fn maximum(self, other: Self) -> Self { <$ty>::max(self, other) }
            fn minimum(self, other: Self) -> Self { <$ty>::min(self, other) }
            fn from_usize(value: usize) -> Self { value as $ty }
        })*
    };
}

impl_num_int!(i32, i64, u32, u64);
impl_num_float!(f32, f64);

/// Dispatch a dtype-generic algorithm over the numeric storage variants.
///
/// `$xs` binds the typed element vector; `$body` must be generic over the
/// element type (usually through [`Num`]).
macro_rules! dispatch_num {
    ($data:expr, |$xs:ident| $body:expr, $err:expr) => {
        match $data {
            TensorData::I32($xs) => TensorData::I32($body),
            TensorData::I64($xs) => TensorData::I64($body),
            TensorData::U32($xs) => TensorData::U32($body),
            TensorData::U64($xs) => TensorData::U64($body),
            TensorData::F32($xs) => TensorData::F32($body),
            TensorData::F64($xs) => TensorData::F64($body),
            TensorData::Bool(_) => return Err($err),
        }
    };
}

pub(crate) use dispatch_num;
