//! Simple kernels for the simulated device, enough to execute the demo graphs end to end.

use bytemuck::{cast_slice, pod_read_unaligned};
use itertools::Itertools;

use dsh_device::address::DeviceAddress;
use dsh_device::handle::Device;
use dsh_graph::dtype::DType;
use dsh_graph::graph::Node;

use crate::error::{InferError, InferResult};
use crate::kernel::{KernelArgs, KernelMod, KernelModType, KernelRet, KernelTensor};

fn check_shapes(args: &KernelArgs, input_count: usize) -> KernelRet {
    if args.inputs.len() != input_count || args.outputs.len() != 1 {
        return KernelRet::ResizeFailed;
    }
    if !args.inputs.iter().all(|x| x.is_shape_known()) {
        return KernelRet::UnknownShape;
    }
    if !args.outputs[0].is_shape_known() {
        return KernelRet::UnknownOutShape;
    }
    KernelRet::Ok
}

fn device_address(node: Node, tensor: &KernelTensor) -> InferResult<&DeviceAddress> {
    tensor
        .device_address()
        .ok_or_else(|| InferError::LaunchFailed(node, "argument is not on the device".to_owned()))
}

/// Make sure the output address points to memory of the size its current shape needs.
fn prepare_output(node: Node, device: Device, output: &KernelTensor) -> InferResult<DeviceAddress> {
    let address = device_address(node, output)?.clone();
    let size = output
        .size_bytes()
        .ok_or_else(|| InferError::LaunchFailed(node, format!("unknown output shape {:?}", output.shape)))?;
    address.ensure_size(device, size);
    Ok(address)
}

/// Copies its first input to its output, used for nop nodes that are not skipped.
#[derive(Debug)]
pub struct CopyKernel {
    node: Node,
    device: Device,
}

impl CopyKernel {
    pub fn new(node: Node, device: Device) -> Self {
        CopyKernel { node, device }
    }
}

impl KernelMod for CopyKernel {
    fn kind(&self) -> KernelModType {
        KernelModType::NativeGpu
    }

    fn resize(&mut self, args: &KernelArgs) -> KernelRet {
        if args.inputs.is_empty() || args.outputs.len() != 1 {
            return KernelRet::ResizeFailed;
        }
        match (args.inputs[0].size_bytes(), args.outputs[0].size_bytes()) {
            (None, _) => KernelRet::UnknownShape,
            (_, None) => KernelRet::UnknownOutShape,
            (Some(input), Some(output)) if input == output => KernelRet::Ok,
            _ => KernelRet::ResizeFailed,
        }
    }

    fn launch(&mut self, args: &KernelArgs) -> InferResult<()> {
        let input = device_address(self.node, &args.inputs[0])?;
        let output = prepare_output(self.node, self.device, &args.outputs[0])?;

        output.copy_from_device(input)?;
        Ok(())
    }
}

/// Elementwise addition of two `f32` tensors with the same shape.
#[derive(Debug)]
pub struct AddKernel {
    node: Node,
    device: Device,
}

impl AddKernel {
    pub fn new(node: Node, device: Device) -> Self {
        AddKernel { node, device }
    }
}

impl KernelMod for AddKernel {
    fn kind(&self) -> KernelModType {
        KernelModType::NativeGpu
    }

    fn resize(&mut self, args: &KernelArgs) -> KernelRet {
        let ret = check_shapes(args, 2);
        if ret != KernelRet::Ok {
            return ret;
        }

        let (left, right) = (&args.inputs[0], &args.inputs[1]);
        if left.dtype != DType::F32 || right.dtype != DType::F32 || left.shape != right.shape {
            return KernelRet::ResizeFailed;
        }
        KernelRet::Ok
    }

    fn launch(&mut self, args: &KernelArgs) -> InferResult<()> {
        let left = device_address(self.node, &args.inputs[0])?.kernel_read()?;
        let right = device_address(self.node, &args.inputs[1])?.kernel_read()?;
        let output = prepare_output(self.node, self.device, &args.outputs[0])?;

        let result = left
            .chunks_exact(4)
            .zip(right.chunks_exact(4))
            .map(|(l, r)| pod_read_unaligned::<f32>(l) + pod_read_unaligned::<f32>(r))
            .collect_vec();
        output.copy_host_to_device(cast_slice(&result))?;
        Ok(())
    }
}

/// Fills its output with a scalar value, the shape is read from the host value of the first input.
#[derive(Debug)]
pub struct FillKernel {
    node: Node,
    device: Device,
    count: usize,
}

impl FillKernel {
    pub fn new(node: Node, device: Device) -> Self {
        FillKernel { node, device, count: 0 }
    }
}

impl KernelMod for FillKernel {
    fn kind(&self) -> KernelModType {
        KernelModType::NativeCpu
    }

    fn resize(&mut self, args: &KernelArgs) -> KernelRet {
        let ret = check_shapes(args, 2);
        if ret != KernelRet::Ok {
            return ret;
        }

        let shape = match args.inputs[0].host_tensor() {
            Some(shape) => shape,
            None => return KernelRet::UnknownShape,
        };
        let dims = shape.to_dconsts().iter().map(|d| d.as_i64()).collect::<Option<Vec<_>>>();
        let count = match dims {
            Some(dims) if dims.iter().all(|&d| d >= 0) => dims.iter().product::<i64>() as usize,
            _ => return KernelRet::ResizeFailed,
        };

        if args.outputs[0].size() != Some(count) {
            return KernelRet::ResizeFailed;
        }
        self.count = count;
        KernelRet::Ok
    }

    fn launch(&mut self, args: &KernelArgs) -> InferResult<()> {
        let value = device_address(self.node, &args.inputs[1])?.kernel_read()?;
        let output = prepare_output(self.node, self.device, &args.outputs[0])?;

        let element_bytes = output.dtype().size().bytes();
        if value.len() < element_bytes {
            return Err(InferError::LaunchFailed(self.node, "fill value too small".to_owned()));
        }
        output.copy_host_to_device(&value[..element_bytes].repeat(self.count))?;
        Ok(())
    }
}
