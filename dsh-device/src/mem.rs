use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::handle::Device;

/// A reference-counted pointer into a [DeviceBuffer]. The buffer cannot be constructed directly,
/// instead it can only be created by allocating a new [DevicePtr] with [DevicePtr::alloc].
///
/// Cloning this type does not copy the underlying memory, but only increases the reference count.
#[derive(Clone)]
pub struct DevicePtr {
    buffer: Arc<DeviceBuffer>,
    offset: usize,
}

/// A single device allocation.
pub struct DeviceBuffer {
    device: Device,
    data: Mutex<Vec<u8>>,
    len_bytes: usize,
    host_syncs: AtomicUsize,
}

impl DevicePtr {
    pub fn alloc(device: Device, len_bytes: usize) -> Self {
        let inner = DeviceBuffer {
            device,
            data: Mutex::new(vec![0; len_bytes]),
            len_bytes,
            host_syncs: AtomicUsize::new(0),
        };
        DevicePtr {
            buffer: Arc::new(inner),
            offset: 0,
        }
    }

    pub fn device(&self) -> Device {
        self.buffer.device
    }

    pub fn offset_bytes(self, offset: usize) -> DevicePtr {
        let new_offset = self.offset + offset;

        if self.buffer.len_bytes == 0 {
            assert_eq!(offset, 0, "Non-zero offset not allowed on empty buffer");
        } else {
            assert!(
                new_offset < self.buffer.len_bytes,
                "Offset {} is out of range on {:?}",
                offset,
                self
            );
        }

        DevicePtr {
            buffer: self.buffer,
            offset: new_offset,
        }
    }

    /// The number of bytes between this pointer and the end of the underlying buffer.
    pub fn len_bytes(&self) -> usize {
        self.buffer.len_bytes - self.offset
    }

    /// The number of `DevicePtr` sharing the underlying buffer that are still alive.
    pub fn shared_count(&self) -> usize {
        Arc::strong_count(&self.buffer)
    }

    /// The number of device to host copies that read from the underlying buffer so far.
    pub fn host_syncs(&self) -> usize {
        self.buffer.host_syncs.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<Vec<u8>> {
        self.buffer.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn copy_linear_from_host(&self, buffer: &[u8]) {
        self.assert_linear_in_bounds(buffer.len());
        let mut data = self.lock();
        data[self.offset..self.offset + buffer.len()].copy_from_slice(buffer);
    }

    /// Synchronously copy device memory into `buffer`. This is a blocking synchronization point.
    pub fn copy_linear_to_host(&self, buffer: &mut [u8]) {
        self.assert_linear_in_bounds(buffer.len());
        let data = self.lock();
        buffer.copy_from_slice(&data[self.offset..self.offset + buffer.len()]);
        self.buffer.host_syncs.fetch_add(1, Ordering::SeqCst);
    }

    /// Copy device memory into a buffer owned by a kernel running on the same device.
    /// Unlike [DevicePtr::copy_linear_to_host] this is not a synchronization point.
    pub fn copy_linear_to_kernel(&self, buffer: &mut [u8]) {
        self.assert_linear_in_bounds(buffer.len());
        let data = self.lock();
        buffer.copy_from_slice(&data[self.offset..self.offset + buffer.len()]);
    }

    pub fn copy_linear_from_device(&self, other: &DevicePtr, len_bytes: usize) {
        assert_eq!(
            self.device(),
            other.device(),
            "Can only copy between buffers on the same device"
        );

        self.assert_linear_in_bounds(len_bytes);
        other.assert_linear_in_bounds(len_bytes);

        if Arc::ptr_eq(&self.buffer, &other.buffer) {
            let mut data = self.lock();
            data.copy_within(other.offset..other.offset + len_bytes, self.offset);
        } else {
            let source = other.lock()[other.offset..other.offset + len_bytes].to_vec();
            let mut data = self.lock();
            data[self.offset..self.offset + len_bytes].copy_from_slice(&source);
        }
    }

    fn assert_linear_in_bounds(&self, len: usize) {
        assert!(
            self.offset + len <= self.buffer.len_bytes,
            "Linear slice with length {} out of bounds for {:?}",
            len,
            self
        );
    }
}

impl PartialEq for DevicePtr {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer) && self.offset == other.offset
    }
}

impl Eq for DevicePtr {}

impl Debug for DevicePtr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevicePtr")
            .field("buffer", &self.buffer)
            .field("offset", &self.offset)
            .finish()
    }
}

impl Debug for DeviceBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("device", &self.device)
            .field("base_ptr", &(self as *const DeviceBuffer))
            .field("len_bytes", &self.len_bytes)
            .finish_non_exhaustive()
    }
}
