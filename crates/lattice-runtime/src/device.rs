//! Host-memory device used when ranks run in-process

use async_trait::async_trait;
use lattice_interfaces::{AllocationTracker, DeviceBuffer, DeviceContext};
use lattice_types::{Device, MemoryUsage, Result};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tracing::debug;

/// Device context backed by host memory.
///
/// Streams are synchronous, so `synchronize` only yields to the scheduler. The
/// ordinal is the accelerator slot the rank would be bound to.
#[derive(Debug)]
pub struct CpuDevice {
    ordinal: usize,
    tracker: Arc<AllocationTracker>,
    synchronizations: AtomicUsize,
}

impl CpuDevice {
    pub fn new(ordinal: usize) -> Self {
        Self {
            ordinal,
            tracker: Arc::new(AllocationTracker::new()),
            synchronizations: AtomicUsize::new(0),
        }
    }

    /// Device refusing to hold more than `capacity` bytes
    pub fn with_capacity(ordinal: usize, capacity: usize) -> Self {
        Self {
            ordinal,
            tracker: Arc::new(AllocationTracker::with_capacity(capacity)),
            synchronizations: AtomicUsize::new(0),
        }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Completed `synchronize` calls
    pub fn synchronize_count(&self) -> usize {
        self.synchronizations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceContext for CpuDevice {
    fn device(&self) -> Device {
        Device::CPU
    }

    fn name(&self) -> String {
        format!("cpu:{}", self.ordinal)
    }

    fn alloc_i32(&self, len: usize) -> Result<DeviceBuffer<i32>> {
        DeviceBuffer::zeroed(self.device(), len, Some(self.tracker.clone()))
    }

    fn alloc_f32(&self, len: usize) -> Result<DeviceBuffer<f32>> {
        DeviceBuffer::zeroed(self.device(), len, Some(self.tracker.clone()))
    }

    fn upload_i32(&self, host: &[i32]) -> Result<DeviceBuffer<i32>> {
        DeviceBuffer::from_host(self.device(), host, Some(self.tracker.clone()))
    }

    async fn download_i32(&self, buffer: &DeviceBuffer<i32>) -> Result<Vec<i32>> {
        self.synchronize().await?;
        Ok(buffer.to_host())
    }

    async fn synchronize(&self) -> Result<()> {
        tokio::task::yield_now().await;
        let count = self.synchronizations.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("{} synchronized ({} total)", self.name(), count);
        Ok(())
    }

    fn memory_usage(&self) -> MemoryUsage {
        self.tracker.usage()
    }
}
