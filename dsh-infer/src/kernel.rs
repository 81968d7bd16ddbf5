use std::collections::BTreeMap;
use std::fmt::Debug;

use dsh_device::address::DeviceAddress;
use dsh_graph::dtype::{DTensor, DType};
use dsh_graph::shape::ShapeVector;

use crate::error::InferResult;

/// Materialized host values of the value-dependent inputs of one node, keyed by input position.
///
/// Built fresh by every inference call.
pub type DependTensorMap = BTreeMap<usize, DTensor>;

/// Where a kernel reads the data of an argument from.
#[derive(Debug, Clone)]
pub enum KernelData {
    Device(DeviceAddress),
    Host(DTensor),
    None,
}

/// A single kernel input or output: its dtype, its shape and its data.
#[derive(Debug, Clone)]
pub struct KernelTensor {
    pub dtype: DType,
    pub shape: ShapeVector,
    pub data: KernelData,
    /// A host copy of the value, attached for kernels that keep reading the device data
    /// but need the value to resize.
    pub host_value: Option<DTensor>,
}

/// Everything a kernel needs to resize and launch.
#[derive(Debug, Clone, Default)]
pub struct KernelArgs {
    pub inputs: Vec<KernelTensor>,
    pub outputs: Vec<KernelTensor>,
    /// Workspace sizes in bytes, filled in after resizing.
    pub workspace: Vec<usize>,
    pub depend_tensor_map: DependTensorMap,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum KernelModType {
    NativeCpu,
    DeprecatedNativeCpu,
    NativeGpu,
    Custom,
}

/// Kernels that take their arguments from host memory.
pub fn is_cpu_kernel_mod(kind: KernelModType) -> bool {
    matches!(kind, KernelModType::NativeCpu | KernelModType::DeprecatedNativeCpu)
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum KernelRet {
    Ok,
    ResizeFailed,
    /// An input shape is still unknown.
    UnknownShape,
    /// An output shape is still unknown.
    UnknownOutShape,
}

/// A compiled kernel that can be resized to new argument shapes and then launched.
pub trait KernelMod: Debug + Send {
    fn kind(&self) -> KernelModType;

    fn resize(&mut self, args: &KernelArgs) -> KernelRet;

    /// Workspace sizes in bytes for the shapes of the last resize.
    fn workspace_sizes(&self) -> Vec<usize> {
        vec![]
    }

    fn launch(&mut self, args: &KernelArgs) -> InferResult<()>;
}

impl KernelTensor {
    pub fn is_shape_known(&self) -> bool {
        self.shape.iter().all(|&d| d >= 0)
    }

    /// The number of elements, `None` while the shape is not fully known.
    pub fn size(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(usize::try_from(d).ok()?))
    }

    pub fn size_bytes(&self) -> Option<usize> {
        self.size()?.checked_mul(self.dtype.size().bytes())
    }

    pub fn device_address(&self) -> Option<&DeviceAddress> {
        match &self.data {
            KernelData::Device(address) => Some(address),
            KernelData::Host(_) | KernelData::None => None,
        }
    }

    /// The host value of this argument, either as the data itself or as the attached host copy.
    pub fn host_tensor(&self) -> Option<&DTensor> {
        match &self.data {
            KernelData::Host(tensor) => Some(tensor),
            KernelData::Device(_) | KernelData::None => self.host_value.as_ref(),
        }
    }
}
