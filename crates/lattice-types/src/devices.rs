//! Device, data type and precision tags

use crate::{LatticeError, Result};
use serde::{Deserialize, Serialize};

/// Device a rank is bound to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    /// Host memory standing in for an accelerator
    CPU,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::CPU => write!(f, "cpu"),
        }
    }
}

/// Element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 32-bit floating point
    FP32,
    /// 16-bit floating point (IEEE 754)
    FP16,
    /// 32-bit signed integer
    INT32,
}

impl DataType {
    /// Get size in bytes for this data type
    pub fn size_bytes(&self) -> usize {
        match self {
            DataType::FP32 | DataType::INT32 => 4,
            DataType::FP16 => 2,
        }
    }

    /// Check if this is a floating point type
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::FP32 | DataType::FP16)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::FP32 => "fp32",
            DataType::FP16 => "fp16",
            DataType::INT32 => "int32",
        };
        write!(f, "{}", name)
    }
}

/// Arithmetic precision the decode engine is constructed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumericKind {
    Fp32,
    Fp16,
}

impl NumericKind {
    /// Decode the `is_half` configuration flag (0 = fp32, 1 = fp16)
    pub fn from_is_half(is_half: i64) -> Result<Self> {
        match is_half {
            0 => Ok(Self::Fp32),
            1 => Ok(Self::Fp16),
            other => Err(LatticeError::config(format!(
                "is_half should be 0 (use float) or 1 (use half), got {}",
                other
            ))),
        }
    }

    /// Data type of weights and activations
    pub fn compute_dtype(&self) -> DataType {
        match self {
            Self::Fp32 => DataType::FP32,
            Self::Fp16 => DataType::FP16,
        }
    }
}

impl std::fmt::Display for NumericKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.compute_dtype())
    }
}
