use dsh_graph::abs::Abstract;
use dsh_graph::dtype::{DConst, DSize, DTensor, DType};
use dsh_graph::graph::{Graph, Operation};
use dsh_graph::ops::primitive::{attrs, names, AttrValue, Primitive};
use dsh_graph::shape;
use dsh_graph::shape::Dim;

#[test]
fn replace_abstract_returns_previous() {
    let mut graph = Graph::new();
    let x = graph.parameter(Abstract::tensor(DType::F32, shape![Dim::Unknown]));

    let old = graph.replace_abstract(x, Abstract::tensor(DType::F32, shape![5]));
    assert_eq!(old, Abstract::tensor(DType::F32, shape![Dim::Unknown]));
    assert_eq!(graph[x].abs, Abstract::tensor(DType::F32, shape![5]));
}

#[test]
#[should_panic]
fn node_from_other_graph() {
    let mut a = Graph::new();
    let mut b = Graph::new();
    let x = a.parameter(Abstract::scalar(DType::F32));
    let _ = b.apply(Primitive::new(names::IDENTITY), &[x]);
}

#[test]
fn prev_node_output_through_tuple_get_item() {
    let mut graph = Graph::new();
    let x = graph.parameter(Abstract::tensor(DType::F32, shape![4, 6]));
    let split = Primitive::new(names::SPLIT)
        .with_attr(attrs::AXIS, AttrValue::Int(1))
        .with_attr(attrs::OUTPUT_NUM, AttrValue::Int(2));
    let parts = graph.apply(split, &[x]);
    let second = graph.tuple_get_item(parts, 1);
    let y = graph.apply(Primitive::new(names::IDENTITY), &[second]);

    assert_eq!(graph[second].abs, Abstract::tensor(DType::F32, shape![4, 3]));
    assert_eq!(graph.prev_node_output(y, 0), (parts, 1));
}

#[test]
fn prev_node_output_through_make_tuple() {
    let mut graph = Graph::new();
    let a = graph.parameter(Abstract::tensor(DType::F32, shape![2]));
    let b = graph.parameter(Abstract::tensor(DType::I64, shape![3]));
    let tuple = graph.apply(Primitive::new(names::MAKE_TUPLE), &[a, b]);
    let item = graph.tuple_get_item(tuple, 1);
    let y = graph.apply(Primitive::new(names::IDENTITY), &[item]);

    assert_eq!(graph.prev_node_output(y, 0), (b, 0));
    assert_eq!(graph.prev_node_output(item, 0), (tuple, 0));
}

#[test]
fn subgraph_copy_and_call() {
    let mut body = Graph::new();
    let p0 = body.parameter(Abstract::tensor(DType::F32, shape![2, 3]));
    let p1 = body.parameter(Abstract::tensor(DType::F32, shape![3]));
    let sum = body.apply(Primitive::new(names::ADD), &[p0, p1]);
    body.output(sum);

    let mut graph = Graph::new();
    let sub = graph.add_subgraph("add_bias", &body);
    assert_eq!(graph[sub].parameters.len(), 2);

    let x = graph.parameter(Abstract::tensor(DType::F32, shape![2, 3]));
    let b = graph.parameter(Abstract::tensor(DType::F32, shape![3]));
    let call = graph.call(sub, &[x, b]);
    assert_eq!(graph[call].abs, Abstract::tensor(DType::F32, shape![2, 3]));

    let order = graph.subgraph_topo_order(sub);
    let ret = graph[sub].ret;
    assert_eq!(order.last(), Some(&ret));
    assert!(matches!(graph[ret].operation, Operation::Return { .. }));
    for &param in &graph[sub].parameters {
        assert_eq!(graph[param].owner, Some(sub));
        assert!(order.contains(&param));
    }

    // inputs come before their users
    let pos = |n| order.iter().position(|&m| m == n).unwrap();
    for &node in &order {
        for input in graph[node].operation.inputs() {
            assert!(pos(input) < pos(node));
        }
    }
}

#[test]
fn nested_subgraphs_are_copied() {
    let mut inner = Graph::new();
    let p = inner.parameter(Abstract::tensor(DType::F32, shape![4]));
    let y = inner.apply(Primitive::new(names::IDENTITY), &[p]);
    inner.output(y);

    let mut middle = Graph::new();
    let inner_sub = middle.add_subgraph("inner", &inner);
    let q = middle.parameter(Abstract::tensor(DType::F32, shape![4]));
    let call = middle.call(inner_sub, &[q]);
    middle.output(call);

    let mut graph = Graph::new();
    let outer_sub = graph.add_subgraph("middle", &middle);
    assert_eq!(graph.subgraphs().count(), 2);
    assert_eq!(graph[outer_sub].name, "middle");
    assert_eq!(graph[outer_sub].parameters.len(), 1);

    let order = graph.subgraph_topo_order(outer_sub);
    let calls = order
        .iter()
        .filter(|&&n| matches!(graph[n].operation, Operation::Apply { .. }) && graph.primitive(n).is_none())
        .count();
    assert_eq!(calls, 1);
}

#[test]
fn set_primitive_attr() {
    let mut graph = Graph::new();
    let x = graph.parameter(Abstract::tensor(DType::F32, shape![2]));
    let y = graph.apply(Primitive::new(names::IDENTITY), &[x]);
    graph.set_primitive_attr(y, attrs::LIST_START_INDEX, AttrValue::Int(3));
    assert_eq!(graph.primitive(y).unwrap().attr_int(attrs::LIST_START_INDEX), Some(3));
}

#[test]
fn constants_carry_values() {
    let mut graph = Graph::new();
    let c = graph.constant_scalar(DConst::I(DSize::S32, 7));
    let t = graph.constant_tensor(DTensor::from_vec(&[2], vec![1.0f32, 2.0]));

    assert_eq!(graph[c].abs.scalar_value(), Some(DConst::I(DSize::S32, 7)));
    assert_eq!(graph[t].abs.build_shape(), shape![2]);
    assert!(graph[t].abs.value_tensor().is_some());
}
