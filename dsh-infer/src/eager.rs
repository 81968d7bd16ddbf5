use std::collections::btree_map::Entry;

use itertools::Itertools;
use log::debug;

use dsh_device::address::DeviceAddress;
use dsh_graph::abs::Abstract;
use dsh_graph::dtype::DTensor;
use dsh_graph::graph::{Graph, Node};
use dsh_graph::ops::primitive::Primitive;
use dsh_graph::shape::Shape;

use crate::bind::{args_from_device_address, set_inputs_by_depend_map, update_output_device_shape};
use crate::engine::InferEngine;
use crate::error::{InferError, InferResult, ToInferResult};
use crate::kernel::{is_cpu_kernel_mod, DependTensorMap, KernelArgs, KernelMod};
use crate::materialize::depend_value_tensor_from_list;

/// A single op dispatched outside of graph execution.
///
/// The inputs come only from device addresses and caller-supplied host tensors,
/// the graph is only used to record the inferred abstract of `kernel`.
#[derive(Debug, Clone)]
pub struct ExecuteKernelInfo {
    pub kernel: Node,
    pub primitive: Primitive,
    pub inputs_device_address: Vec<DeviceAddress>,
    pub outputs_device_address: Vec<DeviceAddress>,
}

impl InferEngine<'_> {
    fn eager_depend_map(
        &self,
        info: &ExecuteKernelInfo,
        input_tensors: &[Option<DTensor>],
        map: &mut DependTensorMap,
    ) -> InferResult<()> {
        map.clear();

        let input_count = info.inputs_device_address.len();
        for index in self.registry().value_depend(&info.primitive, input_count) {
            let tensor = depend_value_tensor_from_list(&info.inputs_device_address, input_tensors, index)?;
            match map.entry(index) {
                Entry::Occupied(_) => return Err(InferError::DuplicateDependInput(info.kernel, index)),
                Entry::Vacant(entry) => {
                    entry.insert(tensor);
                }
            }
        }

        Ok(())
    }

    /// Infer the output abstract of a single op and record it on `info.kernel`.
    ///
    /// Value-dependent inputs are materialized into `map`,
    /// the other inputs are described by the dtype and cached host shape of their address.
    pub fn infer_shape_eager(
        &self,
        graph: &mut Graph,
        map: &mut DependTensorMap,
        info: &ExecuteKernelInfo,
        input_tensors: &[Option<DTensor>],
    ) -> InferResult<Abstract> {
        self.eager_depend_map(info, input_tensors, map)?;

        let args = info
            .inputs_device_address
            .iter()
            .enumerate()
            .map(|(i, address)| match map.get(&i) {
                Some(tensor) => Abstract::tensor_value(tensor.clone()),
                None => Abstract::tensor(address.dtype(), Shape::from_shape_vector(&address.host_shape())),
            })
            .collect_vec();

        let abs = self.registry().infer(&info.primitive, &args).to_infer_result(info.kernel)?;
        debug!("Eager inference of {} gives {}", info.primitive, abs);

        graph.replace_abstract(info.kernel, abs.clone());
        Ok(abs)
    }

    /// Kernel arguments for a single op from its addresses and the already inferred abstract.
    pub fn kernel_args_for_node(
        &self,
        kernel: &dyn KernelMod,
        info: &ExecuteKernelInfo,
        abs: &Abstract,
        map: DependTensorMap,
    ) -> InferResult<KernelArgs> {
        update_output_device_shape(&info.outputs_device_address, abs, false)?;

        let mut args = args_from_device_address(&info.inputs_device_address, &info.outputs_device_address);
        set_inputs_by_depend_map(&map, &mut args.inputs, is_cpu_kernel_mod(kernel.kind()))?;
        args.depend_tensor_map = map;
        Ok(args)
    }

    /// Infer the output of a single op and bind the arguments for its kernel.
    pub fn infer_op_eager(
        &self,
        graph: &mut Graph,
        kernel: &dyn KernelMod,
        info: &ExecuteKernelInfo,
        input_tensors: &[Option<DTensor>],
    ) -> InferResult<KernelArgs> {
        let mut map = DependTensorMap::new();
        let abs = self.infer_shape_eager(graph, &mut map, info, input_tensors)?;
        self.kernel_args_for_node(kernel, info, &abs, map)
    }

    /// Bind the arguments for a single op whose output shapes are already known, without inferring again.
    pub fn set_op_args(
        &self,
        kernel: &dyn KernelMod,
        info: &ExecuteKernelInfo,
        input_tensors: &[Option<DTensor>],
    ) -> InferResult<KernelArgs> {
        let mut map = DependTensorMap::new();
        self.eager_depend_map(info, input_tensors, &mut map)?;

        let mut args = args_from_device_address(&info.inputs_device_address, &info.outputs_device_address);
        set_inputs_by_depend_map(&map, &mut args.inputs, is_cpu_kernel_mod(kernel.kind()))?;
        args.depend_tensor_map = map;
        Ok(args)
    }
}
