use std::collections::btree_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};

use dsh_device::address::DeviceAddress;
use dsh_graph::abs::{Abstract, HostExprData};
use dsh_graph::graph::{Callee, Graph, Node, Operation, Subgraph};
use dsh_graph::ops::primitive::{names, AttrValue, Primitive};
use dsh_graph::ops::registry::PrimitiveRegistry;

use crate::bind;
use crate::depend::{input_abstract, value_depend_indices};
use crate::error::{InferError, InferResult, ToInferResult};
use crate::hook::HostExprInfer;
use crate::kernel::{is_cpu_kernel_mod, DependTensorMap, KernelArgs};
use crate::kernel_graph::KernelGraph;
use crate::materialize::depend_value_tensor;
use crate::rebuild::rebuild_abstract;
use crate::settings::InferSettings;

/// Runtime shape inference for single nodes of a [KernelGraph].
///
/// The engine itself is stateless between calls, everything it learns is written back into the graph:
/// the new abstract of the node, the attributes of its primitive and the host shapes of its outputs.
#[derive(Debug, Clone)]
pub struct InferEngine<'r> {
    registry: &'r PrimitiveRegistry,
    hook: Option<Arc<dyn HostExprInfer>>,
    settings: InferSettings,
}

/// The inputs of a node after dependency resolution, ready to be passed to an inference function.
#[derive(Debug, Default)]
struct ResolvedInputs {
    args: Vec<Abstract>,
    has_host_data: bool,
    list_start: Vec<i64>,
}

impl<'r> InferEngine<'r> {
    pub fn new(registry: &'r PrimitiveRegistry) -> Self {
        InferEngine {
            registry,
            hook: None,
            settings: InferSettings::default(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn HostExprInfer>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn with_settings(mut self, settings: InferSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> &'r PrimitiveRegistry {
        self.registry
    }

    pub fn settings(&self) -> &InferSettings {
        &self.settings
    }

    pub fn has_hook(&self) -> bool {
        self.hook.is_some()
    }

    /// Infer the output abstract of `node` from the current values of its value-dependent inputs,
    /// and replace the abstract of `node` with the result.
    ///
    /// `map` is cleared and then receives the materialized host value of every value-dependent input.
    /// `side_channel` optionally holds fresher device addresses for the inputs of `node`, by position.
    pub fn infer_shape(
        &self,
        kg: &mut KernelGraph,
        node: Node,
        map: &mut DependTensorMap,
        side_channel: Option<&[Option<DeviceAddress>]>,
    ) -> InferResult<()> {
        self.infer_node(kg, node, map, side_channel, true)
    }

    fn infer_node(
        &self,
        kg: &mut KernelGraph,
        node: Node,
        map: &mut DependTensorMap,
        side_channel: Option<&[Option<DeviceAddress>]>,
        walk_nops: bool,
    ) -> InferResult<()> {
        map.clear();

        let callee = match &kg.graph()[node].operation {
            Operation::Apply { callee, .. } => callee.clone(),
            _ => return Err(InferError::InvalidNode(node)),
        };
        debug!("Infer shape for {:?} = {}", node, kg.graph()[node].abs);

        let resolved = self.resolve_inputs(kg, node, map, side_channel, walk_nops)?;

        let abs = match callee {
            Callee::Primitive(_) => {
                let list_start = AttrValue::Ints(resolved.list_start.clone());
                kg.graph_mut()
                    .set_primitive_attr(node, self.settings.list_start_attr, list_start);

                // re-read the primitive to see the attribute we just set
                let primitive = kg.graph().primitive(node).cloned().ok_or(InferError::InvalidNode(node))?;
                self.infer_primitive(kg.graph(), node, &primitive, &resolved.args, resolved.has_host_data)?
            }
            Callee::Subgraph(sub) => self.infer_subgraph(kg.graph(), node, sub, &resolved.args)?,
        };

        let user_data = abs.user_data.clone();
        let old = kg.graph_mut().replace_abstract(node, abs);
        kg.graph_mut().set_user_data(node, user_data);
        debug!("Abstract of {:?} changes from {} to {}", node, old, kg.graph()[node].abs);

        Ok(())
    }

    fn resolve_inputs(
        &self,
        kg: &mut KernelGraph,
        node: Node,
        map: &mut DependTensorMap,
        side_channel: Option<&[Option<DeviceAddress>]>,
        walk_nops: bool,
    ) -> InferResult<ResolvedInputs> {
        let depend = value_depend_indices(self.registry, kg.graph(), node);
        let input_count = kg.graph().node_inputs(node).len();

        let mut resolved = ResolvedInputs::default();
        let mut prev_user_data: Option<HostExprData> = None;

        for i in 0..input_count {
            let (producer, index) = kg.graph().prev_node_output(node, i);
            if walk_nops && self.settings.skip_nop_node {
                self.infer_nop_chain(kg, producer)?;
            }

            if !depend.contains(&i) {
                resolved.args.push(input_abstract(kg.graph(), node, i)?);
                continue;
            }

            let tensor = depend_value_tensor(
                kg,
                self.registry,
                &self.settings,
                node,
                i,
                (producer, index),
                side_channel,
            )?;
            let abs = rebuild_abstract(kg.graph(), producer, &tensor, index)?;

            match map.entry(i) {
                Entry::Occupied(_) => return Err(InferError::DuplicateDependInput(node, i)),
                Entry::Vacant(entry) => {
                    entry.insert(tensor);
                }
            }

            if abs.user_data.is_some() {
                resolved.has_host_data = true;

                // a new list starts wherever a different host expression produced a sequence,
                // also when only a single element of that sequence is used here
                let graph = kg.graph();
                let is_host_sequence =
                    graph.is_primitive_apply(producer, names::HOST_EXECUTE) && graph[producer].abs.is_sequence();
                if is_host_sequence && abs.user_data != prev_user_data {
                    resolved.list_start.push(i as i64);
                    prev_user_data = abs.user_data.clone();
                }
            }

            resolved.args.push(abs);
        }

        Ok(resolved)
    }

    /// Infer the chain of nop nodes ending in `start`, starting from the one furthest upstream.
    ///
    /// Nop nodes are not executed when they are skipped, so nothing else would update their abstracts.
    fn infer_nop_chain(&self, kg: &mut KernelGraph, start: Node) -> InferResult<()> {
        let mut chain = vec![];
        let mut current = start;
        while kg.is_nop(self.registry, current) {
            chain.push(current);
            current = kg.graph().prev_node_output(current, 0).0;
        }

        while let Some(nop) = chain.pop() {
            debug!("Infer skipped nop node {:?}", nop);
            let mut scratch = DependTensorMap::new();
            self.infer_node(kg, nop, &mut scratch, None, false)?;
        }

        Ok(())
    }

    /// Infer the output of a primitive from fully resolved input abstracts.
    pub fn infer_primitive(
        &self,
        graph: &Graph,
        node: Node,
        primitive: &Primitive,
        args: &[Abstract],
        has_host_data: bool,
    ) -> InferResult<Abstract> {
        if !has_host_data && !primitive.is(names::HOST_EXECUTE) {
            return self.registry.infer(primitive, args).to_infer_result(node);
        }

        match &self.hook {
            Some(hook) => hook.infer(graph, node, primitive, args),
            None => {
                warn!(
                    "No host expression inference registered, using pure inference for {:?} ({})",
                    node, primitive
                );
                let abs = self.registry.infer(primitive, args).to_infer_result(node)?;
                debug!("Pure inference of {:?} gives {}", node, abs);
                Ok(abs)
            }
        }
    }

    /// Infer the result of calling `sub` from `node` with the given argument abstracts.
    ///
    /// The abstracts inside the subgraph are only tracked locally and are not written back,
    /// since the same subgraph can be called from multiple places with different arguments.
    pub fn infer_subgraph(&self, graph: &Graph, node: Node, sub: Subgraph, args: &[Abstract]) -> InferResult<Abstract> {
        let info = &graph[sub];
        if info.parameters.len() != args.len() {
            return Err(InferError::ParameterCountMismatch(sub, info.parameters.len(), args.len()));
        }
        debug!("Infer subgraph {:?} '{}' called from {:?}", sub, info.name, node);

        let mut map: HashMap<Node, Abstract> = info.parameters.iter().copied().zip(args.iter().cloned()).collect();

        for inner in graph.subgraph_topo_order(sub) {
            match &graph[inner].operation {
                Operation::Apply { callee, inputs } => {
                    let inputs = inputs
                        .iter()
                        .map(|x| map.get(x).cloned().unwrap_or_else(|| graph[*x].abs.clone()))
                        .collect::<Vec<_>>();

                    let abs = match callee {
                        Callee::Primitive(primitive) => {
                            let has_host_data = inputs.iter().any(|abs| abs.user_data.is_some());
                            self.infer_primitive(graph, inner, primitive, &inputs, has_host_data)?
                        }
                        &Callee::Subgraph(callee) => self.infer_subgraph(graph, inner, callee, &inputs)?,
                    };
                    map.insert(inner, abs);
                }
                &Operation::Return { input } => {
                    return map.get(&input).cloned().ok_or(InferError::UnmappedReturn(inner));
                }
                Operation::Parameter { .. } | Operation::Constant => {}
            }
        }

        Err(InferError::UnmappedReturn(info.ret))
    }

    /// Infer the shape of `node` and bind the arguments of its kernel.
    ///
    /// The arguments are stored on the node and also returned. On failure nothing is stored.
    pub fn infer_op(
        &self,
        kg: &mut KernelGraph,
        node: Node,
        side_channel: Option<&[Option<DeviceAddress>]>,
    ) -> InferResult<KernelArgs> {
        let kind = kg.kernel(node).ok_or(InferError::MissingKernel(node))?.kind();

        let mut map = DependTensorMap::new();
        self.infer_shape(kg, node, &mut map, side_channel)?;

        let mut args = bind::args_from_node(kg, self.registry, &self.settings, node)?;
        bind::set_inputs_by_depend_map(&map, &mut args.inputs, is_cpu_kernel_mod(kind))?;
        args.depend_tensor_map = map;

        kg.set_kernel_args(node, args.clone());
        Ok(args)
    }
}
