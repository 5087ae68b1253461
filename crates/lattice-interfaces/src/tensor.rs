//! Tensor descriptors
//!
//! The decode engine receives its buffers together with a descriptor of the
//! logical shape each one carries. Descriptors hold no data.

use lattice_types::DataType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a tensor lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryKind {
    /// Host memory
    Cpu,
    /// Device memory
    Gpu,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryKind::Cpu => write!(f, "cpu"),
            MemoryKind::Gpu => write!(f, "gpu"),
        }
    }
}

/// Name, placement, type and shape of one tensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDesc {
    pub name: String,
    pub memory: MemoryKind,
    pub dtype: DataType,
    pub shape: Vec<usize>,
}

impl TensorDesc {
    pub fn new(
        name: impl Into<String>,
        memory: MemoryKind,
        dtype: DataType,
        shape: Vec<usize>,
    ) -> Self {
        Self {
            name: name.into(),
            memory,
            dtype,
            shape,
        }
    }

    /// Total number of elements
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn size_bytes(&self) -> usize {
        self.numel() * self.dtype.size_bytes()
    }

    /// Whether a buffer of `len` elements can back this tensor
    pub fn fits(&self, len: usize) -> bool {
        self.numel() == len
    }
}

impl fmt::Display for TensorDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {} {:?}", self.name, self.memory, self.dtype, self.shape)
    }
}
