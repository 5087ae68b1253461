//! Core interface definitions for Lattice
//!
//! This crate defines the trait seams every rank is wired through:
//!
//! - [`ProcessGroup`]: host-side group of ranks (barrier, broadcast, split)
//! - [`CollectiveBackend`] / [`DeviceCommunicator`]: device collective communicators
//!   joined through a root-generated unique id
//! - [`DeviceContext`] / [`DeviceBuffer`]: device memory owned by one rank
//! - [`DecodeEngine`]: the forward operation of the sharded model
//!
//! Implementations live in `lattice-parallel` (local backend), `lattice-runtime`
//! (emulated device) and `lattice-engine` (reference engine).

pub mod collective;
pub mod decode_engine;
pub mod device;
pub mod memory;
pub mod model;
pub mod tensor;

pub use collective::{CollectiveBackend, DeviceCommunicator, ProcessGroup};
pub use decode_engine::{
    DecodeEngine, DecodeEngineFactory, DecodeInputs, DecodeOutputs, EngineContext,
};
pub use device::DeviceContext;
pub use memory::{AllocationTracker, DeviceBuffer, DeviceElement};
pub use model::{LayerRange, ModelShard, ModelShardConfig};
pub use tensor::{MemoryKind, TensorDesc};

pub use lattice_types::{
    CommUniqueId, DataType, Device, GlobalRank, LatticeError, MemoryUsage, NumericKind, Result,
    SamplingSettings, TokenId,
};
