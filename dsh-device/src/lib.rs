#![warn(missing_debug_implementations)]
#![allow(clippy::new_without_default)]

//! Accelerator memory as seen by the shape inference core.
//!
//! Device memory is simulated with host allocations, but every transfer between "device" and host
//! goes through explicit copy functions that count the device to host synchronizations,
//! so callers can observe exactly when a value had to be pulled back to the host.
//!
//! The [DeviceAddress](address::DeviceAddress) type is the handle nodes and kernels use to refer to
//! their outputs: a possibly null pointer, a byte size, a dtype and a cached host shape.

/// The [DeviceAddress](address::DeviceAddress) handle.
pub mod address;
/// Device error type.
pub mod error;
/// The [Device](handle::Device) handle.
pub mod handle;
/// Memory management.
pub mod mem;
