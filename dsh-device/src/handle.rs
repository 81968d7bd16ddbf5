use crate::error::{DeviceError, DeviceResult};
use crate::mem::DevicePtr;

/// The number of simulated devices.
pub const DEVICE_COUNT: i32 = 4;

/// A device index.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Device(i32);

impl Device {
    pub fn new(device: i32) -> DeviceResult<Self> {
        if (0..DEVICE_COUNT).contains(&device) {
            Ok(Device(device))
        } else {
            Err(DeviceError::DeviceNotAvailable(device))
        }
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (0..DEVICE_COUNT).map(Device)
    }

    pub fn inner(self) -> i32 {
        self.0
    }

    pub fn alloc(self, len_bytes: usize) -> DevicePtr {
        DevicePtr::alloc(self, len_bytes)
    }
}
