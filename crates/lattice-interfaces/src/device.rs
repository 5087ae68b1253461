//! Device context abstraction
//!
//! One rank is bound to exactly one device and one execution stream. The context
//! hands out owned [`DeviceBuffer`]s and exposes the completion wait the
//! orchestrator performs around every barrier.

use crate::memory::DeviceBuffer;
use async_trait::async_trait;
use lattice_types::{Device, MemoryUsage, Result};

/// Device bound to the local rank
#[async_trait]
pub trait DeviceContext: Send + Sync {
    /// Device this context drives
    fn device(&self) -> Device;

    /// Human-readable device name
    fn name(&self) -> String;

    /// Allocate a zeroed `i32` buffer
    fn alloc_i32(&self, len: usize) -> Result<DeviceBuffer<i32>>;

    /// Allocate a zeroed `f32` buffer
    fn alloc_f32(&self, len: usize) -> Result<DeviceBuffer<f32>>;

    /// Allocate an `i32` buffer initialized from host memory
    fn upload_i32(&self, host: &[i32]) -> Result<DeviceBuffer<i32>>;

    /// Copy an `i32` buffer back to host memory.
    ///
    /// Waits for work queued on the stream before the copy.
    async fn download_i32(&self, buffer: &DeviceBuffer<i32>) -> Result<Vec<i32>>;

    /// Wait until all work queued on the stream has completed
    async fn synchronize(&self) -> Result<()>;

    /// Current memory usage
    fn memory_usage(&self) -> MemoryUsage;
}
