use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

use itertools::Itertools;
use log::debug;

use dsh_device::address::DeviceAddress;
use dsh_device::handle::Device;
use dsh_graph::abs::{Abstract, AbstractKind, SequenceKind};
use dsh_graph::dtype::{DTensor, DType};
use dsh_graph::graph::{Graph, Node, Operation};
use dsh_graph::ops::registry::PrimitiveRegistry;

use crate::error::{InferError, InferResult};
use crate::kernel::{KernelArgs, KernelMod, KernelRet};

/// A [Graph] prepared for execution: every node has device addresses for its outputs,
/// and nodes that run on a device can have a kernel attached.
pub struct KernelGraph {
    graph: Graph,
    device: Device,
    infos: HashMap<Node, KernelInfo>,
}

#[derive(Debug, Default)]
pub struct KernelInfo {
    pub outputs: Vec<DeviceAddress>,
    pub kernel: Option<Box<dyn KernelMod>>,
    /// The arguments bound by the last inference of this node.
    pub args: Option<KernelArgs>,
}

impl KernelGraph {
    /// Wrap `graph`, uploading the values of constants and creating output addresses for all other nodes.
    ///
    /// Outputs with a fully known shape are allocated immediately, the others get a null address.
    pub fn new(graph: Graph, device: Device) -> Self {
        let mut infos = HashMap::new();

        for node in graph.nodes() {
            let info = &graph[node];
            let outputs = match &info.operation {
                Operation::Constant => vec![constant_address(device, &info.abs)],
                Operation::Parameter { .. } | Operation::Apply { .. } => {
                    if info.real_sequence_output {
                        vec![empty_address(device, &info.abs)]
                    } else {
                        output_abstracts(&info.abs)
                            .iter()
                            .map(|abs| empty_address(device, abs))
                            .collect_vec()
                    }
                }
                Operation::Return { .. } => continue,
            };

            infos.insert(
                node,
                KernelInfo {
                    outputs,
                    kernel: None,
                    args: None,
                },
            );
        }

        KernelGraph { graph, device, infos }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn info(&self, node: Node) -> Option<&KernelInfo> {
        self.infos.get(&node)
    }

    pub fn output_addresses(&self, node: Node) -> &[DeviceAddress] {
        self.infos.get(&node).map_or(&[], |info| &info.outputs)
    }

    pub fn set_output_addresses(&mut self, node: Node, outputs: Vec<DeviceAddress>) {
        self.infos.entry(node).or_default().outputs = outputs;
    }

    /// The device address holding output `index` of `node`.
    ///
    /// If `skip_nop_node` is set, nop nodes are not executed and share the address of their input,
    /// so the chain of nop producers is followed until a real producer is found.
    pub fn output_address(
        &self,
        registry: &PrimitiveRegistry,
        node: Node,
        index: usize,
        skip_nop_node: bool,
    ) -> Option<DeviceAddress> {
        let (mut node, mut index) = (node, index);
        if skip_nop_node {
            while self.is_nop(registry, node) {
                (node, index) = self.graph.prev_node_output(node, 0);
            }
        }
        self.output_addresses(node).get(index).cloned()
    }

    /// Whether `node` applies a nop primitive that can be skipped.
    pub fn is_nop(&self, registry: &PrimitiveRegistry, node: Node) -> bool {
        match self.graph.primitive(node) {
            Some(primitive) => registry.is_nop(primitive) && !self.graph.node_inputs(node).is_empty(),
            None => false,
        }
    }

    /// Upload a new value for a top-level input.
    pub fn set_input(&mut self, node: Node, tensor: &DTensor) -> InferResult<()> {
        let address = self
            .output_addresses(node)
            .first()
            .cloned()
            .ok_or(InferError::IndexOutOfRange("output addresses", 0, 0))?;
        assert_eq!(
            address.dtype(),
            tensor.dtype(),
            "Input {:?} expects dtype {}",
            node,
            address.dtype()
        );

        address.ensure_size(self.device, tensor.size_bytes());
        address.copy_host_to_device(&tensor.to_le_bytes())?;
        address.set_host_shape(tensor.shape().iter().map(|&d| d as i64).collect());
        Ok(())
    }

    /// Download the current value of output `index` of `node`, using the cached host shape of its address.
    pub fn read_output(&self, registry: &PrimitiveRegistry, node: Node, index: usize, skip_nop_node: bool) -> InferResult<DTensor> {
        let address = self
            .output_address(registry, node, index, skip_nop_node)
            .ok_or(InferError::MissingData(node, index))?;

        let abs = &self.graph[node].abs;
        let shape = match abs.build_shape().as_fixed() {
            Some(shape) if !abs.is_sequence() => shape,
            _ => address
                .host_shape()
                .iter()
                .map(|&d| usize::try_from(d).map_err(|_| InferError::UnresolvedShape(node, index)))
                .collect::<InferResult<Vec<_>>>()?,
        };

        let mut tensor = DTensor::zeros(address.dtype(), &shape);
        let mut bytes = vec![0; tensor.size_bytes()];
        address.copy_device_to_host(&mut bytes)?;
        tensor.copy_from_le_bytes(&bytes);
        Ok(tensor)
    }

    pub fn set_kernel(&mut self, node: Node, kernel: Box<dyn KernelMod>) {
        self.infos.entry(node).or_default().kernel = Some(kernel);
    }

    pub fn kernel(&self, node: Node) -> Option<&dyn KernelMod> {
        self.infos.get(&node)?.kernel.as_deref()
    }

    pub fn has_kernel(&self, node: Node) -> bool {
        self.kernel(node).is_some()
    }

    pub fn kernel_args(&self, node: Node) -> Option<&KernelArgs> {
        self.infos.get(&node)?.args.as_ref()
    }

    pub fn set_kernel_args(&mut self, node: Node, args: KernelArgs) {
        self.infos.entry(node).or_default().args = Some(args);
    }

    /// Resize the kernel of `node` with its stored arguments, then record the workspace sizes.
    pub fn resize_kernel(&mut self, node: Node) -> InferResult<()> {
        let info = self.infos.get_mut(&node).ok_or(InferError::MissingKernel(node))?;
        let kernel = info.kernel.as_mut().ok_or(InferError::MissingKernel(node))?;
        let args = info.args.get_or_insert_with(KernelArgs::default);

        debug!("Resize for node {:?}", node);
        match kernel.resize(args) {
            KernelRet::ResizeFailed => Err(InferError::ResizeFailed(node, KernelRet::ResizeFailed)),
            ret => {
                if ret != KernelRet::Ok {
                    debug!("Resize of {:?} returned {:?}", node, ret);
                }
                args.workspace = kernel.workspace_sizes();
                Ok(())
            }
        }
    }

    pub fn launch_kernel(&mut self, node: Node) -> InferResult<()> {
        let info = self.infos.get_mut(&node).ok_or(InferError::MissingKernel(node))?;
        let kernel = info.kernel.as_mut().ok_or(InferError::MissingKernel(node))?;
        let args = info.args.as_ref().ok_or(InferError::MissingData(node, 0))?;
        kernel.launch(args)
    }
}

/// The abstracts of the separate outputs of a node: one per element for tuples, otherwise just the node's own.
pub fn output_abstracts(abs: &Abstract) -> Vec<Abstract> {
    match &abs.kind {
        AbstractKind::Sequence {
            seq: SequenceKind::Tuple,
            elements,
            ..
        } => elements.clone(),
        _ => vec![abs.clone()],
    }
}

fn address_dtype(abs: &Abstract) -> DType {
    match &abs.kind {
        AbstractKind::Scalar { dtype, .. } | AbstractKind::Tensor { dtype, .. } => *dtype,
        AbstractKind::Sequence { elements, .. } => elements.first().and_then(|e| e.dtype()).unwrap_or(DType::I64),
    }
}

fn empty_address(device: Device, abs: &Abstract) -> DeviceAddress {
    let dtype = address_dtype(abs);
    let shape = abs.build_shape();
    match shape.as_fixed() {
        Some(dims) => DeviceAddress::alloc(device, dtype, &dims),
        None => DeviceAddress::null(dtype, shape.to_shape_vector()),
    }
}

fn constant_address(device: Device, abs: &Abstract) -> DeviceAddress {
    let value = match (&abs.kind, abs.value_tensor()) {
        (_, Some(tensor)) => Some(tensor.clone()),
        (AbstractKind::Scalar { value: Some(value), .. }, None) => Some(scalar_tensor(value.to_bytes(), value.dtype())),
        _ => None,
    };

    match value {
        Some(tensor) => DeviceAddress::from_host(device, &tensor),
        None => empty_address(device, abs),
    }
}

fn scalar_tensor(bytes: Vec<u8>, dtype: DType) -> DTensor {
    let mut tensor = DTensor::zeros(dtype, &[1]);
    tensor.copy_from_le_bytes(&bytes);
    tensor
}

impl Debug for KernelGraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelGraph")
            .field("graph", &self.graph)
            .field("device", &self.device)
            .field("kernels", &self.infos.values().filter(|info| info.kernel.is_some()).count())
            .finish_non_exhaustive()
    }
}
