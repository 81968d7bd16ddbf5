use log::{debug, warn};

use dsh_device::address::DeviceAddress;
use dsh_graph::abs::{Abstract, AbstractKind};
use dsh_graph::dtype::{DTensor, DType};
use dsh_graph::graph::{Graph, Node, Operation};
use dsh_graph::ops::primitive::names;
use dsh_graph::ops::registry::PrimitiveRegistry;

use crate::error::{InferError, InferResult};
use crate::kernel_graph::KernelGraph;
use crate::settings::InferSettings;

/// The common scalar dtype of a sequence whose value is treated as a single flat tensor.
///
/// Every element must be a scalar, and all of them must share the dtype of the first one.
pub fn sequence_dtype(producer: Node, abs: &Abstract) -> InferResult<DType> {
    let elements = abs.elements().unwrap_or(&[]);
    let first = match elements.first() {
        Some(first) => first,
        None => return Err(InferError::IndexOutOfRange("sequence elements", 0, 0)),
    };

    let scalar_dtype = |i: usize, element: &Abstract| match element.kind {
        AbstractKind::Scalar { dtype, .. } => Ok(dtype),
        _ => Err(InferError::NonScalarSequenceElement(producer, i)),
    };

    let expected = scalar_dtype(0, first)?;
    for (i, element) in elements.iter().enumerate().skip(1) {
        let dtype = scalar_dtype(i, element)?;
        if dtype != expected {
            return Err(InferError::SequenceTypeMismatch(producer, i, expected, dtype));
        }
    }

    Ok(expected)
}

/// Build an empty host tensor with the dtype and shape output `index` of `producer` currently has.
///
/// Returns `None` for real sequence outputs without any elements.
pub fn tensor_template(
    kg: &KernelGraph,
    registry: &PrimitiveRegistry,
    settings: &InferSettings,
    producer: Node,
    index: usize,
) -> InferResult<Option<DTensor>> {
    let graph = kg.graph();
    let info = &graph[producer];
    let abs = &info.abs;

    // real sequences are materialized as a single flat tensor
    if info.real_sequence_output && abs.is_sequence() {
        let len = abs.elements().map_or(0, |e| e.len());
        if len == 0 {
            return Ok(None);
        }
        let dtype = sequence_dtype(producer, abs)?;
        return Ok(Some(DTensor::zeros(dtype, &[len])));
    }

    let element = match &abs.kind {
        AbstractKind::Sequence { elements, .. } => elements
            .get(index)
            .ok_or(InferError::IndexOutOfRange("sequence elements", index, elements.len()))?,
        _ => abs,
    };

    let address = kg.output_address(registry, producer, index, settings.skip_nop_node);
    let logical_dtype = element.dtype().unwrap_or(DType::I64);
    let dtype = match (&info.operation, &address) {
        (Operation::Constant, _) | (_, None) => logical_dtype,
        (_, Some(address)) => address.dtype(),
    };

    let shape = match &element.kind {
        AbstractKind::Scalar { .. } => vec![1],
        _ => match element.build_shape().as_fixed() {
            Some(shape) => shape,
            None => padding_shape(producer, index, address.as_ref())?,
        },
    };

    Ok(Some(DTensor::zeros(dtype, &shape)))
}

/// The runtime shape of an output as recorded on its device address.
fn padding_shape(producer: Node, index: usize, address: Option<&DeviceAddress>) -> InferResult<Vec<usize>> {
    let address = address.ok_or(InferError::UnresolvedShape(producer, index))?;
    address
        .host_shape()
        .iter()
        .map(|&d| usize::try_from(d).map_err(|_| InferError::UnresolvedShape(producer, index)))
        .collect()
}

/// Fill `tensor` with the contents of `address`. This is a blocking device to host copy.
pub fn sync_into(tensor: &mut DTensor, address: &DeviceAddress) -> InferResult<()> {
    let mut bytes = vec![0; tensor.size_bytes()];
    address.copy_device_to_host(&mut bytes)?;
    tensor.copy_from_le_bytes(&bytes);
    debug!("Synced {} bytes into host tensor {:?}", bytes.len(), tensor.shape());
    Ok(())
}

/// Materialize the current value of input `input_index` of `node` on the host.
///
/// `producer` is the resolved producer of that input together with its output index.
/// The value is copied from the matching entry of `side_channel` if it holds a valid address,
/// otherwise from the output address attached to the producer.
pub fn depend_value_tensor(
    kg: &KernelGraph,
    registry: &PrimitiveRegistry,
    settings: &InferSettings,
    node: Node,
    input_index: usize,
    producer: (Node, usize),
    side_channel: Option<&[Option<DeviceAddress>]>,
) -> InferResult<DTensor> {
    let (producer, output_index) = producer;

    let mut tensor = match tensor_template(kg, registry, settings, producer, output_index)? {
        Some(tensor) => tensor,
        None => {
            debug!("Producer {:?} of input {} is an empty sequence", producer, input_index);
            return Ok(DTensor::zeros(DType::I64, &[0]));
        }
    };

    // the real value is carried by the host expression data, not by device memory
    if is_host_expression(kg.graph(), producer) {
        return Ok(tensor);
    }

    if let Some(side_channel) = side_channel {
        match side_channel.get(input_index) {
            Some(Some(address)) if address.is_ptr_valid() => {
                sync_into(&mut tensor, address)?;
                return Ok(tensor);
            }
            _ => warn!(
                "No valid side channel address for input {} of {:?}, using the producer output",
                input_index, node
            ),
        }
    }

    match kg.output_address(registry, producer, output_index, settings.skip_nop_node) {
        Some(address) if address.is_ptr_valid() => {
            sync_into(&mut tensor, &address)?;
            Ok(tensor)
        }
        _ => Err(InferError::MissingData(node, input_index)),
    }
}

/// Materialize input `index` of a single op from caller-supplied tensors and device addresses.
///
/// A supplied host tensor wins, otherwise the value is copied from the device address,
/// using its dtype and cached host shape.
pub fn depend_value_tensor_from_list(
    addresses: &[DeviceAddress],
    tensors: &[Option<DTensor>],
    index: usize,
) -> InferResult<DTensor> {
    let tensor = tensors
        .get(index)
        .ok_or(InferError::IndexOutOfRange("input tensors", index, tensors.len()))?;
    if let Some(tensor) = tensor {
        return Ok(tensor.clone());
    }

    let address = addresses
        .get(index)
        .ok_or(InferError::IndexOutOfRange("input addresses", index, addresses.len()))?;
    if !address.is_ptr_valid() {
        return Err(InferError::MissingDependValue(index));
    }

    let shape = address
        .host_shape()
        .iter()
        .map(|&d| usize::try_from(d).map_err(|_| InferError::MissingDependValue(index)))
        .collect::<InferResult<Vec<_>>>()?;

    let mut tensor = DTensor::zeros(address.dtype(), &shape);
    sync_into(&mut tensor, address)?;
    Ok(tensor)
}

fn is_host_expression(graph: &Graph, node: Node) -> bool {
    graph.is_primitive_apply(node, names::HOST_EXECUTE)
}
