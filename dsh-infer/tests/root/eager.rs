use dsh_device::address::DeviceAddress;
use dsh_graph::abs::Abstract;
use dsh_graph::dtype::{DTensor, DType};
use dsh_graph::ops::primitive::{names, Primitive};
use dsh_graph::ops::registry::default_registry;
use dsh_graph::shape;
use dsh_infer::eager::ExecuteKernelInfo;
use dsh_infer::engine::InferEngine;
use dsh_infer::error::{ErrorKind, InferError};
use dsh_infer::kernel::{DependTensorMap, KernelData, KernelModType, KernelRet};

use crate::root::util::{device, f32_tensor, i64_tensor, reshape_graph, ReshapeGraph, TestKernel};

fn reshape_info(g: &ReshapeGraph, target: &[i64]) -> ExecuteKernelInfo {
    ExecuteKernelInfo {
        kernel: g.y,
        primitive: Primitive::new(names::RESHAPE),
        inputs_device_address: vec![
            DeviceAddress::from_host(device(), &f32_tensor(&[6], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])),
            DeviceAddress::from_host(device(), &i64_tensor(target)),
        ],
        outputs_device_address: vec![DeviceAddress::null(DType::F32, vec![-1, -1])],
    }
}

#[test]
fn infer_from_addresses() {
    let mut g = reshape_graph();
    let info = reshape_info(&g, &[3, 2]);

    let engine = InferEngine::new(default_registry());
    let mut map = DependTensorMap::new();
    let abs = engine
        .infer_shape_eager(&mut g.graph, &mut map, &info, &[None, None])
        .unwrap();

    let expected = Abstract::tensor(DType::F32, shape![3, 2]);
    assert_eq!(abs, expected);
    assert_eq!(g.graph[g.y].abs, expected);
    assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![1]);
    assert_eq!(map[&1], i64_tensor(&[3, 2]));

    assert_eq!(info.inputs_device_address[0].host_syncs(), 0);
    assert_eq!(info.inputs_device_address[1].host_syncs(), 1);
}

#[test]
fn supplied_tensor_wins() {
    let mut g = reshape_graph();
    let info = reshape_info(&g, &[3, 2]);

    let engine = InferEngine::new(default_registry());
    let mut map = DependTensorMap::new();
    let abs = engine
        .infer_shape_eager(&mut g.graph, &mut map, &info, &[None, Some(i64_tensor(&[1, 6]))])
        .unwrap();

    assert_eq!(abs, Abstract::tensor(DType::F32, shape![1, 6]));
    assert_eq!(info.inputs_device_address[1].host_syncs(), 0);
}

#[test]
fn missing_eager_value() {
    let mut g = reshape_graph();
    let info = reshape_info(&g, &[3, 2]);
    info.inputs_device_address[1].clear_ptr();

    let engine = InferEngine::new(default_registry());
    let mut map = DependTensorMap::new();

    let result = engine.infer_shape_eager(&mut g.graph, &mut map, &info, &[None, None]);
    assert_eq!(result, Err(InferError::MissingDependValue(1)));
    assert_eq!(result.unwrap_err().kind(), ErrorKind::MissingData);

    let result = engine.infer_shape_eager(&mut g.graph, &mut map, &info, &[None]);
    assert_eq!(result, Err(InferError::IndexOutOfRange("input tensors", 1, 1)));
    assert!(map.is_empty());
}

#[test]
fn infer_op_eager_device_kernel() {
    let mut g = reshape_graph();
    let info = reshape_info(&g, &[2, 3]);
    let (kernel, _) = TestKernel::new(KernelModType::NativeGpu, KernelRet::Ok);

    let engine = InferEngine::new(default_registry());
    let args = engine
        .infer_op_eager(&mut g.graph, kernel.as_ref(), &info, &[None, None])
        .unwrap();

    assert_eq!(info.outputs_device_address[0].host_shape(), vec![2, 3]);
    assert_eq!(args.outputs[0].shape, vec![2, 3]);
    assert_eq!(args.inputs[0].shape, vec![6]);
    assert_eq!(args.inputs[1].host_value, Some(i64_tensor(&[2, 3])));
    assert!(matches!(args.inputs[1].data, KernelData::Device(_)));
    assert_eq!(args.depend_tensor_map.len(), 1);
}

#[test]
fn infer_op_eager_host_kernel() {
    let mut g = reshape_graph();
    let info = reshape_info(&g, &[6, 1]);
    let (kernel, _) = TestKernel::new(KernelModType::DeprecatedNativeCpu, KernelRet::Ok);

    let engine = InferEngine::new(default_registry());
    let args = engine
        .infer_op_eager(&mut g.graph, kernel.as_ref(), &info, &[None, None])
        .unwrap();

    assert!(matches!(&args.inputs[1].data, KernelData::Host(tensor) if *tensor == i64_tensor(&[6, 1])));
    assert_eq!(args.inputs[1].host_value, None);
    assert_eq!(args.outputs[0].shape, vec![6, 1]);
}

#[test]
fn set_op_args_does_not_infer() {
    let g = reshape_graph();
    let info = reshape_info(&g, &[2, 3]);
    let (kernel, _) = TestKernel::new(KernelModType::NativeGpu, KernelRet::Ok);
    let before = g.graph[g.y].abs.clone();

    // the output shape was already set by an earlier inference
    info.outputs_device_address[0].set_host_shape(vec![3, 2]);

    let engine = InferEngine::new(default_registry());
    let args = engine
        .set_op_args(kernel.as_ref(), &info, &[None, Some(i64_tensor(&[2, 3]))])
        .unwrap();

    assert_eq!(g.graph[g.y].abs, before);
    assert_eq!(args.outputs[0].shape, vec![3, 2]);
    assert_eq!(args.inputs[1].host_value, Some(i64_tensor(&[2, 3])));
    assert_eq!(args.depend_tensor_map[&1], i64_tensor(&[2, 3]));
    assert_eq!(info.inputs_device_address[1].host_syncs(), 0);
}

#[test]
fn eager_scalar_fill() {
    let mut g = reshape_graph();
    let info = ExecuteKernelInfo {
        kernel: g.y,
        primitive: Primitive::new(names::FILL),
        inputs_device_address: vec![
            DeviceAddress::from_host(device(), &i64_tensor(&[2, 2])),
            DeviceAddress::from_host(device(), &DTensor::from_vec(&[], vec![0.5f32])),
        ],
        outputs_device_address: vec![DeviceAddress::null(DType::F32, vec![-1])],
    };

    let engine = InferEngine::new(default_registry());
    let mut map = DependTensorMap::new();
    let abs = engine
        .infer_shape_eager(&mut g.graph, &mut map, &info, &[None, None])
        .unwrap();

    assert_eq!(abs, Abstract::tensor(DType::F32, shape![2, 2]));
}
