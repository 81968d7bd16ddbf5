use std::collections::BTreeSet;

use dsh_graph::abs::Abstract;
use dsh_graph::graph::{Callee, Graph, Node, Operation};
use dsh_graph::ops::registry::PrimitiveRegistry;

use crate::error::{InferError, InferResult};

/// The input positions of `node` whose concrete value is needed to infer its output.
///
/// Recomputed on every call, since the set can depend on the attributes of the primitive.
/// Subgraph calls and other nodes have no value-dependent inputs.
pub fn value_depend_indices(registry: &PrimitiveRegistry, graph: &Graph, node: Node) -> BTreeSet<usize> {
    match &graph[node].operation {
        Operation::Apply {
            callee: Callee::Primitive(primitive),
            inputs,
        } => registry.value_depend(primitive, inputs.len()).into_iter().collect(),
        _ => BTreeSet::new(),
    }
}

/// The abstract of input `index` of `node` as seen by its inference function, without its value.
///
/// Inputs produced by a positional sequence are unwrapped to the selected element,
/// which is the first one when the sequence is used without selecting from it.
pub fn input_abstract(graph: &Graph, node: Node, index: usize) -> InferResult<Abstract> {
    let (producer, output_index) = graph.prev_node_output(node, index);
    let info = &graph[producer];

    match info.abs.elements() {
        Some(elements) if !info.real_sequence_output => elements
            .get(output_index)
            .cloned()
            .ok_or(InferError::IndexOutOfRange("sequence elements", output_index, elements.len())),
        _ => Ok(info.abs.clone()),
    }
}
