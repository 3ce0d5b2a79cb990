use serde::{Deserialize, Serialize};

use super::DType;

/// Element type plus axis lengths of an array value.
///
/// An empty axis list describes a scalar (size 1).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    pub dtype: DType,
    pub axis_lengths: Vec<usize>,
}

impl Shape {
    /// Build a shape from a dtype and axis lengths.
    pub fn new(dtype: DType, axis_lengths: impl Into<Vec<usize>>) -> Self {
        Self {
            dtype,
            axis_lengths: axis_lengths.into(),
        }
    }

    /// Scalar shape of the given dtype.
    pub fn scalar(dtype: DType) -> Self {
        Self::new(dtype, Vec::new())
    }

    /// Number of axes.
    pub fn rank(&self) -> usize {
        self.axis_lengths.len()
    }

    /// Total number of elements (product of axis lengths).
    pub fn size(&self) -> usize {
        self.axis_lengths.iter().copied().product()
    }

    /// Total byte size of a packed host buffer for this shape.
    pub fn byte_size(&self) -> usize {
        self.size() * self.dtype.byte_width()
    }

    /// Length of the outermost axis, 0 for scalars.
    pub fn outer_axis_length(&self) -> usize {
        self.axis_lengths.first().copied().unwrap_or(0)
    }

    /// True if a buffer of this shape can be reinterpreted as `other`.
    ///
    /// Backends may report flattened axis lengths, so only the dtype and the
    /// total element count have to agree; ranks may differ.
    pub fn transfer_compatible(&self, other: &Shape) -> bool {
        self.dtype == other.dtype && self.size() == other.size()
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[", self.dtype)?;
        for (i, len) in self.axis_lengths.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{len}")?;
        }
        write!(f, "]")
    }
}

/// Row-major strides for the given axis lengths.
pub(crate) fn compute_strides(axis_lengths: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; axis_lengths.len()];
    let mut stride = 1usize;
    for (idx, dim) in axis_lengths.iter().rev().enumerate() {
        let i = axis_lengths.len() - 1 - idx;
        strides[i] = stride;
        stride = stride.saturating_mul(*dim);
    }
    strides
}

/// Decompose a linear offset into per-axis indices.
pub(crate) fn linear_to_indices(linear: usize, axis_lengths: &[usize]) -> Vec<usize> {
    if axis_lengths.is_empty() {
        return Vec::new();
    }
    let strides = compute_strides(axis_lengths);
    let mut rem = linear;
    let mut out = Vec::with_capacity(axis_lengths.len());
    for stride in strides {
        if stride == 0 {
            out.push(0);
        } else {
            out.push(rem / stride);
            rem %= stride;
        }
    }
    out
}

/// Recompose per-axis indices into a linear offset.
pub(crate) fn indices_to_linear(indices: &[usize], axis_lengths: &[usize]) -> usize {
    let strides = compute_strides(axis_lengths);
    indices
        .iter()
        .zip(strides.iter())
        .map(|(idx, stride)| idx * stride)
        .sum()
}
