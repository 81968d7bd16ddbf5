use std::error::Error;
use std::fmt::{Display, Formatter};

pub type DeviceResult<T> = Result<T, DeviceError>;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DeviceError {
    DeviceNotAvailable(i32),
    /// The address does not point to any memory.
    NullPointer,
    /// host buffer size, device allocation size
    SizeMismatch(usize, usize),
}

impl Display for DeviceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for DeviceError {}
