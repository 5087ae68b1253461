//! Per-rank runtime: the device a rank is bound to and the buffers it owns.

pub mod buffers;
pub mod device;

pub use buffers::GenerationBuffers;
pub use device::CpuDevice;
