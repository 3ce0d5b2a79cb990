use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Element data types known to the bridge.
///
/// `Bf16` and `F16` can be named by callers (the source language has them)
/// but a backend is free to reject them; see
/// [`PluginClient::supports_dtype`](crate::backend::PluginClient::supports_dtype).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Bool,
    I32,
    I64,
    U32,
    U64,
    F32,
    F64,
    Bf16,
    F16,
}

impl DType {
    /// Parse a dtype from its identifier string.
    pub fn from_ident(ident: &str) -> Result<Self> {
        match ident {
            "bool" => Ok(DType::Bool),
            "i32" => Ok(DType::I32),
            "i64" => Ok(DType::I64),
            "u32" => Ok(DType::U32),
            "u64" => Ok(DType::U64),
            "f32" => Ok(DType::F32),
            "f64" => Ok(DType::F64),
            "bf16" => Ok(DType::Bf16),
            "f16" => Ok(DType::F16),
            other => Err(Error::InvalidArgument(format!(
                "unknown dtype identifier: {other}"
            ))),
        }
    }

    /// String identifier for the dtype.
    pub fn as_str(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::U32 => "u32",
            DType::U64 => "u64",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::Bf16 => "bf16",
            DType::F16 => "f16",
        }
    }

    /// Byte width of a single element.
    pub fn byte_width(self) -> usize {
        match self {
            DType::Bool => 1,
            DType::Bf16 | DType::F16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 => 8,
        }
    }

    /// True if the dtype is an unsigned integer type.
    pub fn is_unsigned(self) -> bool {
        matches!(self, DType::U32 | DType::U64)
    }

    /// True if the dtype is a signed integer type.
    pub fn is_signed_int(self) -> bool {
        matches!(self, DType::I32 | DType::I64)
    }

    /// True if the dtype is a floating-point type.
    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64 | DType::Bf16 | DType::F16)
    }

    /// True if the dtype is any integer type.
    pub fn is_int(self) -> bool {
        self.is_signed_int() || self.is_unsigned()
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
