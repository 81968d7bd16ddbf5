use itertools::Itertools;

use dsh_device::address::DeviceAddress;
use dsh_graph::abs::{Abstract, AbstractKind, SequenceKind};
use dsh_graph::dtype::DType;
use dsh_graph::graph::Node;
use dsh_graph::ops::registry::PrimitiveRegistry;

use crate::depend::input_abstract;
use crate::error::{InferError, InferResult};
use crate::kernel::{DependTensorMap, KernelArgs, KernelData, KernelTensor};
use crate::kernel_graph::KernelGraph;
use crate::settings::InferSettings;

/// Overlay the materialized depend values onto the kernel inputs.
///
/// Kernels running on the host take the value itself as their input data,
/// other kernels keep their device data and get the value attached as a host copy.
pub fn set_inputs_by_depend_map(map: &DependTensorMap, inputs: &mut [KernelTensor], is_cpu: bool) -> InferResult<()> {
    let len = inputs.len();
    for (&index, tensor) in map {
        let input = inputs
            .get_mut(index)
            .ok_or(InferError::IndexOutOfRange("kernel inputs", index, len))?;

        if is_cpu {
            input.dtype = tensor.dtype();
            input.shape = tensor.shape().iter().map(|&d| d as i64).collect_vec();
            input.data = KernelData::Host(tensor.clone());
        } else {
            input.host_value = Some(tensor.clone());
        }
    }
    Ok(())
}

/// Copy the just inferred output shapes into the cached host shapes of the output addresses.
///
/// Tuples have one address per element, unless the whole sequence is stored as a single value.
pub fn update_output_device_shape(addresses: &[DeviceAddress], abs: &Abstract, real_sequence_output: bool) -> InferResult<()> {
    match &abs.kind {
        AbstractKind::Sequence {
            seq: SequenceKind::Tuple,
            elements,
            ..
        } if !real_sequence_output => {
            for (i, element) in elements.iter().enumerate() {
                let address = addresses
                    .get(i)
                    .ok_or(InferError::IndexOutOfRange("output addresses", i, addresses.len()))?;
                address.set_host_shape(element.build_shape().to_shape_vector());
            }
        }
        _ => {
            let address = addresses
                .first()
                .ok_or(InferError::IndexOutOfRange("output addresses", 0, 0))?;
            address.set_host_shape(abs.build_shape().to_shape_vector());
        }
    }
    Ok(())
}

fn device_tensor(address: &DeviceAddress) -> KernelTensor {
    KernelTensor {
        dtype: address.dtype(),
        shape: address.host_shape(),
        data: KernelData::Device(address.clone()),
        host_value: None,
    }
}

/// Kernel arguments for the given device addresses, taking the shapes from their cached host shapes.
pub fn args_from_device_address(inputs: &[DeviceAddress], outputs: &[DeviceAddress]) -> KernelArgs {
    KernelArgs {
        inputs: inputs.iter().map(device_tensor).collect_vec(),
        outputs: outputs.iter().map(device_tensor).collect_vec(),
        workspace: vec![],
        depend_tensor_map: DependTensorMap::new(),
    }
}

/// Kernel arguments for `node` from its current abstract and the addresses in the graph.
///
/// The output addresses get their host shapes updated first.
pub fn args_from_node(
    kg: &KernelGraph,
    registry: &PrimitiveRegistry,
    settings: &InferSettings,
    node: Node,
) -> InferResult<KernelArgs> {
    let graph = kg.graph();
    let info = &graph[node];

    let inputs = (0..graph.node_inputs(node).len())
        .map(|i| {
            let abs = input_abstract(graph, node, i)?;
            let (producer, index) = graph.prev_node_output(node, i);
            let address = kg.output_address(registry, producer, index, settings.skip_nop_node);
            Ok(input_tensor(&abs, address))
        })
        .collect::<InferResult<Vec<_>>>()?;

    let addresses = kg.output_addresses(node);
    update_output_device_shape(addresses, &info.abs, info.real_sequence_output)?;
    let outputs = addresses.iter().map(device_tensor).collect_vec();

    Ok(KernelArgs {
        inputs,
        outputs,
        workspace: vec![],
        depend_tensor_map: DependTensorMap::new(),
    })
}

fn input_tensor(abs: &Abstract, address: Option<DeviceAddress>) -> KernelTensor {
    let shape = abs.build_shape();
    match address {
        Some(address) => KernelTensor {
            dtype: address.dtype(),
            shape: if shape.is_fixed() {
                shape.to_shape_vector()
            } else {
                address.host_shape()
            },
            data: KernelData::Device(address),
            host_value: None,
        },
        None => KernelTensor {
            dtype: abs.dtype().unwrap_or(DType::I64),
            shape: shape.to_shape_vector(),
            data: KernelData::None,
            host_value: None,
        },
    }
}
