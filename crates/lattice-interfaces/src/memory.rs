//! Owned device memory
//!
//! A [`DeviceBuffer`] owns one device allocation for its whole lifetime. Dropping
//! it releases the allocation and updates the [`AllocationTracker`] of the device
//! it came from, so there are no paired alloc/free calls to keep in sync.

use lattice_types::{DataType, Device, LatticeError, MemoryUsage, Result};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Element types that can live in a device buffer
pub trait DeviceElement: Copy + Default + Send + Sync + std::fmt::Debug + 'static {
    const DTYPE: DataType;
}

impl DeviceElement for i32 {
    const DTYPE: DataType = DataType::INT32;
}

impl DeviceElement for f32 {
    const DTYPE: DataType = DataType::FP32;
}

/// Allocation accounting of one device
#[derive(Debug, Default)]
pub struct AllocationTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
    active: AtomicUsize,
    total_allocations: AtomicUsize,
    capacity: Option<usize>,
}

impl AllocationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker that refuses allocations past `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Reserve `size` bytes
    pub fn record_allocation(&self, size: usize) -> Result<()> {
        let previous = self.current.fetch_add(size, Ordering::SeqCst);
        let new_usage = previous + size;
        if let Some(capacity) = self.capacity {
            if new_usage > capacity {
                self.current.fetch_sub(size, Ordering::SeqCst);
                return Err(LatticeError::device(format!(
                    "out of device memory: requested {} bytes with {} of {} in use",
                    size, previous, capacity
                )));
            }
        }
        self.peak.fetch_max(new_usage, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
        self.total_allocations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Release `size` bytes
    pub fn record_release(&self, size: usize) {
        self.current.fetch_sub(size, Ordering::SeqCst);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Allocations performed since creation
    pub fn total_allocations(&self) -> usize {
        self.total_allocations.load(Ordering::SeqCst)
    }

    pub fn usage(&self) -> MemoryUsage {
        MemoryUsage {
            used_bytes: self.current.load(Ordering::SeqCst),
            peak_bytes: self.peak.load(Ordering::SeqCst),
            active_allocations: self.active.load(Ordering::SeqCst),
            total_bytes: self.capacity,
        }
    }
}

/// One owned device allocation
#[derive(Debug)]
pub struct DeviceBuffer<T: DeviceElement> {
    device: Device,
    data: Vec<T>,
    tracker: Option<Arc<AllocationTracker>>,
}

impl<T: DeviceElement> DeviceBuffer<T> {
    /// Allocate `len` zeroed elements, charging `tracker` when given
    pub fn zeroed(
        device: Device,
        len: usize,
        tracker: Option<Arc<AllocationTracker>>,
    ) -> Result<Self> {
        if let Some(tracker) = &tracker {
            tracker.record_allocation(len * T::DTYPE.size_bytes())?;
        }
        Ok(Self {
            device,
            data: vec![T::default(); len],
            tracker,
        })
    }

    /// Allocate and fill from host memory
    pub fn from_host(
        device: Device,
        host: &[T],
        tracker: Option<Arc<AllocationTracker>>,
    ) -> Result<Self> {
        let mut buffer = Self::zeroed(device, host.len(), tracker)?;
        buffer.data.copy_from_slice(host);
        Ok(buffer)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dtype(&self) -> DataType {
        T::DTYPE
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len() * T::DTYPE.size_bytes()
    }

    /// Device-side view for kernels and engines
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Mutable device-side view for kernels and engines
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Host-to-device copy of exactly `len()` elements
    pub fn copy_from_host(&mut self, host: &[T]) -> Result<()> {
        if host.len() != self.data.len() {
            return Err(LatticeError::device(format!(
                "host-to-device copy of {} elements into a buffer of {}",
                host.len(),
                self.data.len()
            )));
        }
        self.data.copy_from_slice(host);
        Ok(())
    }

    /// Device-to-host copy
    pub fn to_host(&self) -> Vec<T> {
        self.data.clone()
    }
}

impl<T: DeviceElement> Drop for DeviceBuffer<T> {
    fn drop(&mut self) {
        if let Some(tracker) = &self.tracker {
            tracker.record_release(self.data.len() * T::DTYPE.size_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_follows_buffer_lifetime() {
        let tracker = Arc::new(AllocationTracker::new());
        {
            let a = DeviceBuffer::<i32>::zeroed(Device::CPU, 16, Some(tracker.clone())).unwrap();
            let b = DeviceBuffer::<f32>::from_host(Device::CPU, &[1.0, 2.0], Some(tracker.clone()))
                .unwrap();
            assert_eq!(a.size_bytes(), 64);
            assert_eq!(b.as_slice(), &[1.0, 2.0]);

            let usage = tracker.usage();
            assert_eq!(usage.used_bytes, 72);
            assert_eq!(usage.active_allocations, 2);
        }
        let usage = tracker.usage();
        assert_eq!(usage.used_bytes, 0);
        assert_eq!(usage.peak_bytes, 72);
        assert_eq!(usage.active_allocations, 0);
        assert_eq!(tracker.total_allocations(), 2);
    }

    #[test]
    fn capacity_is_enforced() {
        let tracker = Arc::new(AllocationTracker::with_capacity(32));
        let _a = DeviceBuffer::<i32>::zeroed(Device::CPU, 8, Some(tracker.clone())).unwrap();
        let err = DeviceBuffer::<i32>::zeroed(Device::CPU, 1, Some(tracker.clone())).unwrap_err();
        assert!(matches!(err, LatticeError::Device { .. }));
        assert_eq!(tracker.usage().used_bytes, 32);
    }

    #[test]
    fn host_copies_check_length() {
        let mut buffer = DeviceBuffer::<i32>::zeroed(Device::CPU, 3, None).unwrap();
        buffer.copy_from_host(&[4, 5, 6]).unwrap();
        assert_eq!(buffer.to_host(), vec![4, 5, 6]);
        assert!(buffer.copy_from_host(&[1]).is_err());
    }
}
