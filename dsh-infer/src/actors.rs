use std::collections::HashMap;

use indexmap::IndexMap;
use itertools::Itertools;
use log::debug;

use dsh_device::address::DeviceAddress;
use dsh_graph::graph::Node;

use crate::bind::args_from_node;
use crate::depend::value_depend_indices;
use crate::engine::InferEngine;
use crate::error::InferResult;
use crate::kernel_graph::KernelGraph;

/// Side channel addresses per node, by input position.
pub type SideChannels = HashMap<Node, Vec<Option<DeviceAddress>>>;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ActorKind {
    /// Infer the output shape and bind the kernel arguments.
    Infer,
    /// Resize the kernel with the bound arguments.
    Init,
}

#[derive(Debug, Clone)]
pub struct CustomActor {
    pub name: String,
    pub kernel: Node,
    pub kind: ActorKind,
}

impl CustomActor {
    fn new(kg: &KernelGraph, kernel: Node, kind: ActorKind) -> Self {
        let id = &kg.graph()[kernel].debug_id;
        let base = if id.is_empty() { format!("{:?}", kernel) } else { id.clone() };
        let suffix = match kind {
            ActorKind::Infer => "infer",
            ActorKind::Init => "init",
        };

        CustomActor {
            name: format!("{}_{}", base, suffix),
            kernel,
            kind,
        }
    }

    pub fn run(&self, engine: &InferEngine, kg: &mut KernelGraph, side_channel: Option<&[Option<DeviceAddress>]>) -> InferResult<()> {
        debug!("Running actor {}", self.name);
        match self.kind {
            ActorKind::Infer => engine.infer_op(kg, self.kernel, side_channel).map(|_| ()),
            ActorKind::Init => kg.resize_kernel(self.kernel),
        }
    }
}

/// The infer and init actors of every kernel node with a dynamic shape, in graph order.
///
/// Kernel nodes with static shapes get their arguments bound and resized once, the first time they run.
#[derive(Debug, Clone, Default)]
pub struct CustomActors {
    actors: IndexMap<Node, (CustomActor, CustomActor)>,
}

impl CustomActors {
    pub fn build(engine: &InferEngine, kg: &KernelGraph) -> Self {
        let mut actors = IndexMap::new();

        for node in kg.graph().nodes() {
            if !kg.has_kernel(node) || is_skipped(engine, kg, node) {
                continue;
            }
            if is_dynamic(engine, kg, node) {
                let infer = CustomActor::new(kg, node, ActorKind::Infer);
                let init = CustomActor::new(kg, node, ActorKind::Init);
                actors.insert(node, (infer, init));
            }
        }

        CustomActors { actors }
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    pub fn contains(&self, node: Node) -> bool {
        self.actors.contains_key(&node)
    }

    pub fn actors(&self) -> impl Iterator<Item = &CustomActor> {
        self.actors.values().flat_map(|(infer, init)| [infer, init])
    }

    /// Execute every kernel node once, in graph order.
    pub fn run_step(&self, engine: &InferEngine, kg: &mut KernelGraph, side_channels: Option<&SideChannels>) -> InferResult<()> {
        let nodes = kg.graph().nodes().collect_vec();

        for node in nodes {
            if !kg.has_kernel(node) || is_skipped(engine, kg, node) {
                continue;
            }

            match self.actors.get(&node) {
                Some((infer, init)) => {
                    let side_channel = side_channels.and_then(|s| s.get(&node)).map(|s| s.as_slice());
                    infer.run(engine, kg, side_channel)?;
                    init.run(engine, kg, side_channel)?;
                }
                None => {
                    if kg.kernel_args(node).is_none() {
                        let args = args_from_node(kg, engine.registry(), engine.settings(), node)?;
                        kg.set_kernel_args(node, args);
                        kg.resize_kernel(node)?;
                    }
                }
            }

            kg.launch_kernel(node)?;
        }

        Ok(())
    }
}

fn is_skipped(engine: &InferEngine, kg: &KernelGraph, node: Node) -> bool {
    engine.settings().skip_nop_node && kg.is_nop(engine.registry(), node)
}

/// Whether the output shape of `node` can change between steps.
fn is_dynamic(engine: &InferEngine, kg: &KernelGraph, node: Node) -> bool {
    let graph = kg.graph();
    graph[node].abs.is_dynamic()
        || graph.node_inputs(node).iter().any(|&x| graph[x].abs.is_dynamic())
        || !value_depend_indices(engine.registry(), graph, node).is_empty()
}
