use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Display, Formatter};
use std::ops::Index;

use itertools::Itertools;
use rand::random;

use crate::abs::{Abstract, HostExprData};
use crate::dtype::{DConst, DSize, DTensor};
use crate::ops::primitive::{names, AttrValue, Primitive};
use crate::ops::registry::{default_registry, PrimitiveRegistry};

/// The graph datastructure the inference engine works on.
///
/// Nodes are stored in an append-only arena, so a [Node] handle never becomes invalid.
/// Nodes either live at the top level of the graph or inside one of its subgraphs.
/// A subgraph has ordered parameters and a single return node, and can be called from other nodes.
///
/// This type implements `Index<Node>` and `Index<Subgraph>`. There is intentionally no `IndexMut`,
/// the abstract of a node can only be changed through [Graph::replace_abstract].
///
/// ```
/// # use dsh_graph::graph::*;
/// # use dsh_graph::abs::Abstract;
/// # use dsh_graph::dtype::{DTensor, DType};
/// # use dsh_graph::ops::primitive::{names, Primitive};
/// # use dsh_graph::shape;
/// let mut graph = Graph::new();
/// let x = graph.parameter(Abstract::tensor(DType::F32, shape![6]));
/// let target = graph.constant_tensor(DTensor::from_vec(&[2], vec![2i64, 3]));
/// let y = graph.apply(Primitive::new(names::RESHAPE), &[x, target]);
/// graph.output(y);
///
/// assert_eq!(graph[y].abs, Abstract::tensor(DType::F32, shape![2, 3]));
/// ```
#[derive(Clone)]
pub struct Graph {
    check: u32,
    nodes: Vec<NodeInfo>,
    subgraphs: Vec<SubgraphInfo>,
    inputs: Vec<Node>,
    outputs: Vec<Node>,
}

/// A node in a [Graph].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Node {
    index: usize,
    check: u32,
}

/// A subgraph in a [Graph].
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Subgraph {
    index: usize,
    check: u32,
}

#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub operation: Operation,
    /// The current abstract of the output of this node.
    pub abs: Abstract,
    pub debug_id: String,
    /// The subgraph this node belongs to, `None` for top-level nodes.
    pub owner: Option<Subgraph>,
    /// Host-expression payload attached to the output of this node.
    pub user_data: Option<HostExprData>,
    /// The sequence output of this node is treated as a single value instead of per element.
    pub real_sequence_output: bool,
}

#[derive(Debug, Clone)]
pub struct SubgraphInfo {
    pub name: String,
    pub parameters: Vec<Node>,
    pub ret: Node,
}

#[derive(Debug, Clone)]
pub enum Operation {
    Parameter { index: usize },
    /// The value is stored in the abstract of the node.
    Constant,
    Apply { callee: Callee, inputs: Vec<Node> },
    Return { input: Node },
}

#[derive(Debug, Clone)]
pub enum Callee {
    Primitive(Primitive),
    Subgraph(Subgraph),
}

impl Operation {
    pub fn inputs(&self) -> Vec<Node> {
        match self {
            Operation::Parameter { .. } | Operation::Constant => vec![],
            Operation::Apply { inputs, .. } => inputs.clone(),
            &Operation::Return { input } => vec![input],
        }
    }

    fn clone_map(&self, mut f: impl FnMut(Node) -> Node, mut g: impl FnMut(Subgraph) -> Subgraph) -> Operation {
        match self {
            &Operation::Parameter { index } => Operation::Parameter { index },
            Operation::Constant => Operation::Constant,
            Operation::Apply { callee, inputs } => Operation::Apply {
                callee: match callee {
                    Callee::Primitive(p) => Callee::Primitive(p.clone()),
                    &Callee::Subgraph(s) => Callee::Subgraph(g(s)),
                },
                inputs: inputs.iter().map(|&x| f(x)).collect_vec(),
            },
            &Operation::Return { input } => Operation::Return { input: f(input) },
        }
    }
}

impl Index<Node> for Graph {
    type Output = NodeInfo;

    fn index(&self, node: Node) -> &Self::Output {
        self.check_contains(node);
        &self.nodes[node.index]
    }
}

impl Index<Subgraph> for Graph {
    type Output = SubgraphInfo;

    fn index(&self, sub: Subgraph) -> &Self::Output {
        self.check_contains_subgraph(sub);
        &self.subgraphs[sub.index]
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            check: random(),
            nodes: vec![],
            subgraphs: vec![],
            inputs: vec![],
            outputs: vec![],
        }
    }

    fn check_contains(&self, node: Node) {
        assert_eq!(node.check, self.check, "Node {:?} does not belong to this graph", node);
        assert!(node.index < self.nodes.len());
    }

    fn check_contains_subgraph(&self, sub: Subgraph) {
        assert_eq!(sub.check, self.check, "Subgraph {:?} does not belong to this graph", sub);
        assert!(sub.index < self.subgraphs.len());
    }

    /// Iterate over all nodes in this graph, in topological order,
    /// which means that nodes will only be visited after all of their inputs have been visited.
    pub fn nodes(&self) -> impl Iterator<Item = Node> {
        let check = self.check;
        (0..self.nodes.len()).map(move |index| Node { index, check })
    }

    pub fn subgraphs(&self) -> impl Iterator<Item = Subgraph> {
        let check = self.check;
        (0..self.subgraphs.len()).map(move |index| Subgraph { index, check })
    }

    pub fn inputs(&self) -> &[Node] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Node] {
        &self.outputs
    }

    #[must_use]
    fn push(&mut self, abs: Abstract, operation: Operation, owner: Option<Subgraph>) -> Node {
        for input in operation.inputs() {
            self.check_contains(input);
        }

        let index = self.nodes.len();
        self.nodes.push(NodeInfo {
            operation,
            abs,
            debug_id: String::new(),
            owner,
            user_data: None,
            real_sequence_output: false,
        });

        Node {
            index,
            check: self.check,
        }
    }

    /// Equivalent to `self[node].debug_id = id`,
    /// but that would not work since there is intentionally no implementation of `IndexMut` for `Graph`.
    pub fn set_debug_id(&mut self, node: Node, id: impl Into<String>) {
        self.check_contains(node);
        self.nodes[node.index].debug_id = id.into();
    }

    pub fn set_user_data(&mut self, node: Node, user_data: Option<HostExprData>) {
        self.check_contains(node);
        self.nodes[node.index].user_data = user_data;
    }

    pub fn set_real_sequence_output(&mut self, node: Node, real: bool) {
        self.check_contains(node);
        self.nodes[node.index].real_sequence_output = real;
    }

    /// Replace the abstract of `node`, returning the previous one.
    pub fn replace_abstract(&mut self, node: Node, abs: Abstract) -> Abstract {
        self.check_contains(node);
        std::mem::replace(&mut self.nodes[node.index].abs, abs)
    }

    /// Set an attribute on the primitive applied by `node`.
    pub fn set_primitive_attr(&mut self, node: Node, key: &str, value: AttrValue) {
        self.check_contains(node);
        match &mut self.nodes[node.index].operation {
            Operation::Apply {
                callee: Callee::Primitive(primitive),
                ..
            } => primitive.set_attr(key, value),
            _ => panic!("Node {:?} does not apply a primitive", node),
        }
    }

    /// Declare a new top-level input.
    #[must_use]
    pub fn parameter(&mut self, abs: Abstract) -> Node {
        let index = self.inputs.len();
        let node = self.push(abs, Operation::Parameter { index }, None);
        self.inputs.push(node);
        node
    }

    /// Declare a new constant, the value is carried by the abstract.
    #[must_use]
    pub fn constant(&mut self, abs: Abstract) -> Node {
        self.push(abs, Operation::Constant, None)
    }

    #[must_use]
    pub fn constant_tensor(&mut self, tensor: DTensor) -> Node {
        self.constant(Abstract::tensor_value(tensor))
    }

    #[must_use]
    pub fn constant_scalar(&mut self, value: DConst) -> Node {
        self.constant(Abstract::scalar_const(value))
    }

    /// Apply a built-in primitive, the abstract is inferred statically with the default registry.
    #[must_use]
    pub fn apply(&mut self, primitive: Primitive, inputs: &[Node]) -> Node {
        self.apply_in(default_registry(), primitive, inputs)
    }

    /// Apply a primitive, the abstract is inferred statically with the given registry.
    #[must_use]
    pub fn apply_in(&mut self, registry: &PrimitiveRegistry, primitive: Primitive, inputs: &[Node]) -> Node {
        let args = inputs.iter().map(|&x| self[x].abs.clone()).collect_vec();
        let abs = match registry.infer(&primitive, &args) {
            Ok(abs) => abs,
            Err(e) => panic!("Failed to infer {} with inputs {:?}: {}", primitive, args, e),
        };
        self.apply_with_abstract(primitive, inputs, abs)
    }

    /// Apply a primitive with an explicitly given abstract, without running inference.
    #[must_use]
    pub fn apply_with_abstract(&mut self, primitive: Primitive, inputs: &[Node], abs: Abstract) -> Node {
        let operation = Operation::Apply {
            callee: Callee::Primitive(primitive),
            inputs: inputs.to_vec(),
        };
        self.push(abs, operation, None)
    }

    /// Select an element of a sequence output.
    #[must_use]
    pub fn tuple_get_item(&mut self, input: Node, index: usize) -> Node {
        let index = self.constant_scalar(DConst::I(DSize::S64, index as i64));
        self.apply(Primitive::new(names::TUPLE_GET_ITEM), &[input, index])
    }

    /// Add `body` as a new subgraph of this graph.
    ///
    /// The inputs of `body` become the parameters of the subgraph,
    /// its single output becomes the returned value. Subgraphs of `body` are copied along.
    #[must_use]
    pub fn add_subgraph(&mut self, name: impl Into<String>, body: &Graph) -> Subgraph {
        assert_eq!(body.outputs.len(), 1, "Subgraph body must have exactly one output");

        let check = self.check;
        let base = self.subgraphs.len();
        let map_sub = |s: Subgraph| Subgraph {
            index: base + s.index,
            check,
        };
        let outer = Subgraph {
            index: base + body.subgraphs.len(),
            check,
        };

        let mut map: HashMap<Node, Node> = HashMap::new();
        for body_node in body.nodes() {
            let info = &body[body_node];
            let operation = info.operation.clone_map(|x| map[&x], map_sub);
            let owner = Some(info.owner.map_or(outer, map_sub));

            let node = self.push(info.abs.clone(), operation, owner);
            let new_info = &mut self.nodes[node.index];
            new_info.debug_id = info.debug_id.clone();
            new_info.user_data = info.user_data.clone();
            new_info.real_sequence_output = info.real_sequence_output;

            map.insert(body_node, node);
        }

        for info in &body.subgraphs {
            self.subgraphs.push(SubgraphInfo {
                name: info.name.clone(),
                parameters: info.parameters.iter().map(|p| map[p]).collect_vec(),
                ret: map[&info.ret],
            });
        }

        let result = map[&body.outputs[0]];
        let ret = self.push(
            self[result].abs.clone(),
            Operation::Return { input: result },
            Some(outer),
        );
        self.subgraphs.push(SubgraphInfo {
            name: name.into(),
            parameters: body.inputs.iter().map(|p| map[p]).collect_vec(),
            ret,
        });

        outer
    }

    /// Call a subgraph. The abstract of the call is the statically known abstract of the returned value.
    #[must_use]
    pub fn call(&mut self, sub: Subgraph, inputs: &[Node]) -> Node {
        self.check_contains_subgraph(sub);
        let info = &self.subgraphs[sub.index];
        assert_eq!(inputs.len(), info.parameters.len(), "Wrong number of inputs");

        let abs = self[info.ret].abs.clone();
        let operation = Operation::Apply {
            callee: Callee::Subgraph(sub),
            inputs: inputs.to_vec(),
        };
        self.push(abs, operation, None)
    }

    /// Register an existing node as an output.
    pub fn output(&mut self, node: Node) {
        self.check_contains(node);
        self.outputs.push(node);
    }

    pub fn output_all(&mut self, nodes: &[Node]) {
        for &node in nodes {
            self.output(node)
        }
    }

    /// The inputs of an apply node, an empty slice for other nodes.
    pub fn node_inputs(&self, node: Node) -> &[Node] {
        match &self[node].operation {
            Operation::Apply { inputs, .. } => inputs,
            _ => &[],
        }
    }

    pub fn primitive(&self, node: Node) -> Option<&Primitive> {
        match &self[node].operation {
            Operation::Apply {
                callee: Callee::Primitive(primitive),
                ..
            } => Some(primitive),
            _ => None,
        }
    }

    pub fn is_primitive_apply(&self, node: Node, name: &str) -> bool {
        self.primitive(node).map_or(false, |p| p.is(name))
    }

    /// Resolve input `index` of `node` to the node that actually produces the value,
    /// together with the output index of that producer.
    ///
    /// `TupleGetItem` selections are followed through, as are selections from `MakeTuple` nodes.
    pub fn prev_node_output(&self, node: Node, index: usize) -> (Node, usize) {
        let inputs = self.node_inputs(node);
        assert!(
            index < inputs.len(),
            "Input index {} out of range for node {:?} with {} inputs",
            index,
            node,
            inputs.len()
        );

        let mut current = inputs[index];
        let mut selected: Vec<usize> = vec![];

        loop {
            if self.is_primitive_apply(current, names::TUPLE_GET_ITEM) {
                let get_inputs = self.node_inputs(current);
                let item = self[get_inputs[1]].abs.scalar_value().and_then(DConst::as_i64);
                if let Some(item) = item.and_then(|i| usize::try_from(i).ok()) {
                    selected.push(item);
                    current = get_inputs[0];
                    continue;
                }
            }

            if self.is_primitive_apply(current, names::MAKE_TUPLE) {
                if let Some(&item) = selected.last() {
                    let make_inputs = self.node_inputs(current);
                    if item < make_inputs.len() {
                        selected.pop();
                        current = make_inputs[item];
                        continue;
                    }
                }
            }

            break;
        }

        // nested selections that could not be resolved are kept on the outermost producer
        (current, selected.first().copied().unwrap_or(0))
    }

    /// The nodes reachable from the return node of `sub`, in topological order.
    pub fn subgraph_topo_order(&self, sub: Subgraph) -> Vec<Node> {
        let ret = self[sub].ret;

        let mut result = vec![];
        let mut visited = HashSet::new();
        let mut stack = vec![(ret, false)];

        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                result.push(node);
                continue;
            }
            if !visited.insert(node) {
                continue;
            }

            stack.push((node, true));
            for input in self[node].operation.inputs().into_iter().rev() {
                if !visited.contains(&input) {
                    stack.push((input, false));
                }
            }
        }

        result
    }
}

impl Debug for Graph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("inputs", &self.inputs.iter().map(|&n| &self[n].abs).collect_vec())
            .field("outputs", &self.outputs.iter().map(|&n| &self[n].abs).collect_vec())
            .field("subgraphs", &self.subgraphs.len())
            .finish_non_exhaustive()
    }
}

impl Display for Graph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Graph {{")?;
        writeln!(f, "  check: {},", self.check)?;
        writeln!(f, "  inputs: {:?},", self.inputs)?;
        writeln!(f, "  outputs: {:?},", self.outputs)?;

        writeln!(f, "  subgraphs: [")?;
        for (sub, info) in self.subgraphs().zip(&self.subgraphs) {
            writeln!(
                f,
                "    {:?} = {:?}({:?}) -> {:?},",
                sub, info.name, info.parameters, info.ret
            )?;
        }
        writeln!(f, "  ],")?;

        writeln!(f, "  nodes: [")?;
        for node in self.nodes() {
            let info = &self[node];
            let owner = info.owner.map_or(String::new(), |s| format!(" in {:?}", s));
            let op = match &info.operation {
                Operation::Parameter { index } => format!("Parameter({})", index),
                Operation::Constant => "Constant".to_owned(),
                Operation::Apply { callee, inputs } => match callee {
                    Callee::Primitive(p) => format!("{}{:?}", p, inputs),
                    Callee::Subgraph(s) => format!("call {:?}{:?}", s, inputs),
                },
                Operation::Return { input } => format!("Return({:?})", input),
            };
            writeln!(f, "    {:?} = {} : {}{},", node, op, info.abs, owner)?;
        }
        writeln!(f, "  ],")?;

        writeln!(f, "}}")?;
        Ok(())
    }
}

impl Node {
    pub fn index(self) -> usize {
        self.index
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let Node { index, check } = self;
        if f.alternate() {
            write!(f, "Node {{ index: {}, check: {} }}", index, check)
        } else {
            write!(f, "Node({})", index)
        }
    }
}

impl Debug for Subgraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Subgraph({})", self.index)
    }
}
