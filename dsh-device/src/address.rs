use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use dsh_graph::dtype::{DTensor, DType};
use dsh_graph::shape::ShapeVector;

use crate::error::{DeviceError, DeviceResult};
use crate::handle::Device;
use crate::mem::DevicePtr;

/// A shared, non-owning view of a value in device memory.
///
/// Clones refer to the same address: changing the pointer or the cached host shape through one clone
/// is visible through all of them. The memory itself is kept alive by the [DevicePtr].
#[derive(Clone)]
pub struct DeviceAddress {
    inner: Arc<AddressInner>,
}

struct AddressInner {
    dtype: DType,
    state: Mutex<AddressState>,
}

struct AddressState {
    ptr: Option<DevicePtr>,
    size: usize,
    host_shape: ShapeVector,
}

impl DeviceAddress {
    pub fn new(ptr: Option<DevicePtr>, size: usize, dtype: DType, host_shape: ShapeVector) -> Self {
        if let Some(ptr) = &ptr {
            assert!(
                size <= ptr.len_bytes(),
                "Address size {} does not fit in {:?}",
                size,
                ptr
            );
        }

        DeviceAddress {
            inner: Arc::new(AddressInner {
                dtype,
                state: Mutex::new(AddressState { ptr, size, host_shape }),
            }),
        }
    }

    /// An address that does not point to memory yet.
    pub fn null(dtype: DType, host_shape: ShapeVector) -> Self {
        DeviceAddress::new(None, 0, dtype, host_shape)
    }

    /// Allocate fresh memory for a tensor with the given dtype and shape.
    pub fn alloc(device: Device, dtype: DType, shape: &[usize]) -> Self {
        let size = shape.iter().product::<usize>() * dtype.size().bytes();
        let host_shape = shape.iter().map(|&d| d as i64).collect();
        DeviceAddress::new(Some(device.alloc(size)), size, dtype, host_shape)
    }

    /// Allocate memory and upload `tensor` to it.
    pub fn from_host(device: Device, tensor: &DTensor) -> Self {
        let address = DeviceAddress::alloc(device, tensor.dtype(), tensor.shape());
        // freshly allocated with exactly the right size
        if let Some(ptr) = address.ptr() {
            ptr.copy_linear_from_host(&tensor.to_le_bytes());
        }
        address
    }

    fn lock(&self) -> MutexGuard<AddressState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    pub fn size(&self) -> usize {
        self.lock().size
    }

    pub fn ptr(&self) -> Option<DevicePtr> {
        self.lock().ptr.clone()
    }

    pub fn is_ptr_valid(&self) -> bool {
        self.lock().ptr.is_some()
    }

    pub fn host_shape(&self) -> ShapeVector {
        self.lock().host_shape.clone()
    }

    pub fn set_host_shape(&self, shape: ShapeVector) {
        self.lock().host_shape = shape;
    }

    /// Point this address at new memory of `size` bytes, unless the current allocation already has that size.
    pub fn ensure_size(&self, device: Device, size: usize) {
        let mut state = self.lock();
        if state.ptr.is_none() || state.size != size {
            state.ptr = Some(device.alloc(size));
            state.size = size;
        }
    }

    /// Drop the pointer, the address becomes invalid.
    pub fn clear_ptr(&self) {
        let mut state = self.lock();
        state.ptr = None;
        state.size = 0;
    }

    /// Synchronously copy the full contents of this address into `dst`.
    ///
    /// Fails if the address is null or if `dst` does not have exactly the size of the address.
    pub fn copy_device_to_host(&self, dst: &mut [u8]) -> DeviceResult<()> {
        let state = self.lock();
        let ptr = state.ptr.as_ref().ok_or(DeviceError::NullPointer)?;
        if dst.len() != state.size {
            return Err(DeviceError::SizeMismatch(dst.len(), state.size));
        }

        debug!("Syncing {} bytes from {:?} to host", state.size, ptr.device());
        ptr.copy_linear_to_host(dst);
        Ok(())
    }

    /// The full contents of this address, read by a kernel on the device.
    pub fn kernel_read(&self) -> DeviceResult<Vec<u8>> {
        let state = self.lock();
        let ptr = state.ptr.as_ref().ok_or(DeviceError::NullPointer)?;
        let mut buffer = vec![0; state.size];
        ptr.copy_linear_to_kernel(&mut buffer);
        Ok(buffer)
    }

    pub fn copy_host_to_device(&self, src: &[u8]) -> DeviceResult<()> {
        let state = self.lock();
        let ptr = state.ptr.as_ref().ok_or(DeviceError::NullPointer)?;
        if src.len() != state.size {
            return Err(DeviceError::SizeMismatch(src.len(), state.size));
        }

        ptr.copy_linear_from_host(src);
        Ok(())
    }

    /// Copy the full contents of `other` into this address without going through the host.
    pub fn copy_from_device(&self, other: &DeviceAddress) -> DeviceResult<()> {
        let (src, src_size) = {
            let state = other.lock();
            (state.ptr.clone().ok_or(DeviceError::NullPointer)?, state.size)
        };

        let state = self.lock();
        let ptr = state.ptr.as_ref().ok_or(DeviceError::NullPointer)?;
        if src_size != state.size {
            return Err(DeviceError::SizeMismatch(src_size, state.size));
        }

        ptr.copy_linear_from_device(&src, src_size);
        Ok(())
    }

    /// The number of device to host copies performed on the memory behind this address.
    pub fn host_syncs(&self) -> usize {
        self.lock().ptr.as_ref().map_or(0, |ptr| ptr.host_syncs())
    }

    /// Whether both handles refer to the same address.
    pub fn same_address(&self, other: &DeviceAddress) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Debug for DeviceAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("DeviceAddress")
            .field("dtype", &self.inner.dtype)
            .field("size", &state.size)
            .field("host_shape", &state.host_shape)
            .field("valid", &state.ptr.is_some())
            .finish()
    }
}
