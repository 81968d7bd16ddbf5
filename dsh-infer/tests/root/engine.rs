use dsh_device::address::DeviceAddress;
use dsh_graph::abs::{Abstract, HostExprData};
use dsh_graph::dtype::{DConst, DSize, DTensor, DType};
use dsh_graph::graph::{Graph, Node};
use dsh_graph::ops::primitive::{attrs, names, AttrValue, Primitive};
use dsh_graph::ops::registry::{default_registry, PrimitiveDef, PrimitiveRegistry, ValueDepend};
use dsh_graph::ops::result::OpResult;
use dsh_graph::shape;
use dsh_graph::shape::{Dim, Shape};
use dsh_infer::depend::input_abstract;
use dsh_infer::engine::InferEngine;
use dsh_infer::error::{ErrorKind, InferError};
use dsh_infer::kernel::{DependTensorMap, KernelData, KernelModType, KernelRet};
use dsh_infer::kernel_graph::KernelGraph;
use dsh_infer::rebuild::rebuild_abstract;
use dsh_infer::settings::InferSettings;

use crate::root::util::{device, f32_tensor, i64_tensor, reshape_graph, RecordingHook, TestKernel};

#[test]
fn reshape_from_target_value() {
    let g = reshape_graph();
    let mut kg = KernelGraph::new(g.graph, device());
    kg.set_input(g.x, &f32_tensor(&[6], &[0.0; 6])).unwrap();
    kg.set_input(g.target, &i64_tensor(&[2, 3])).unwrap();

    let engine = InferEngine::new(default_registry());
    let mut map = DependTensorMap::new();
    engine.infer_shape(&mut kg, g.y, &mut map, None).unwrap();

    assert_eq!(kg.graph()[g.y].abs, Abstract::tensor(DType::F32, shape![2, 3]));
    assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![1]);
    assert_eq!(map[&1], i64_tensor(&[2, 3]));

    // the abstract the inference function saw for the target carries its value
    let target_abs = rebuild_abstract(kg.graph(), g.target, &map[&1], 0).unwrap();
    assert_eq!(target_abs.value_tensor(), Some(&i64_tensor(&[2, 3])));

    // only the value-dependent input was synced
    assert_eq!(kg.output_addresses(g.target)[0].host_syncs(), 1);
    assert_eq!(kg.output_addresses(g.x)[0].host_syncs(), 0);
}

#[test]
fn reshape_follows_new_values() {
    let g = reshape_graph();
    let mut kg = KernelGraph::new(g.graph, device());
    let engine = InferEngine::new(default_registry());
    let mut map = DependTensorMap::new();

    for (rows, cols) in [(2, 3), (3, 2), (1, 6), (6, 1)] {
        kg.set_input(g.target, &i64_tensor(&[rows, cols])).unwrap();
        engine.infer_shape(&mut kg, g.y, &mut map, None).unwrap();

        let expected = Abstract::tensor(DType::F32, shape![rows as usize, cols as usize]);
        assert_eq!(kg.graph()[g.y].abs, expected);
        assert_eq!(map.len(), 1);
    }
}

#[test]
fn no_depend_inputs_no_syncs() {
    let mut graph = Graph::new();
    let x = graph.parameter(Abstract::tensor(DType::F32, shape![Dim::Unknown, 4]));
    let y = graph.parameter(Abstract::tensor(DType::F32, shape![3, 1]));
    let sum = graph.apply(Primitive::new(names::ADD), &[x, y]);

    let expected = default_registry()
        .infer(&Primitive::new(names::ADD), &[graph[x].abs.clone(), graph[y].abs.clone()])
        .unwrap();

    let mut kg = KernelGraph::new(graph, device());
    kg.set_input(x, &f32_tensor(&[3, 4], &[1.0; 12])).unwrap();

    let engine = InferEngine::new(default_registry());
    let mut map = DependTensorMap::new();
    map.insert(7, i64_tensor(&[1]));
    engine.infer_shape(&mut kg, sum, &mut map, None).unwrap();

    assert!(map.is_empty());
    assert_eq!(kg.graph()[sum].abs, expected);
    assert_eq!(expected, Abstract::tensor(DType::F32, shape![3, 4]));
    assert_eq!(kg.output_addresses(x)[0].host_syncs(), 0);
    assert_eq!(kg.output_addresses(y)[0].host_syncs(), 0);
}

#[test]
fn missing_depend_value() {
    let g = reshape_graph();
    let mut kg = KernelGraph::new(g.graph, device());
    kg.output_addresses(g.target)[0].clear_ptr();
    let before = kg.graph()[g.y].abs.clone();

    let engine = InferEngine::new(default_registry());
    let mut map = DependTensorMap::new();
    let result = engine.infer_shape(&mut kg, g.y, &mut map, None);

    assert_eq!(result, Err(InferError::MissingData(g.y, 1)));
    assert_eq!(result.unwrap_err().kind(), ErrorKind::MissingData);
    assert!(map.is_empty());
    assert_eq!(kg.graph()[g.y].abs, before);
}

#[test]
fn missing_depend_value_binds_nothing() {
    let g = reshape_graph();
    let mut kg = KernelGraph::new(g.graph, device());
    let (kernel, counters) = TestKernel::new(KernelModType::NativeGpu, KernelRet::Ok);
    kg.set_kernel(g.y, kernel);
    kg.output_addresses(g.target)[0].clear_ptr();

    let engine = InferEngine::new(default_registry());
    let result = engine.infer_op(&mut kg, g.y, None);

    assert_eq!(result.unwrap_err(), InferError::MissingData(g.y, 1));
    assert!(kg.kernel_args(g.y).is_none());
    assert_eq!(counters.resizes(), 0);
}

#[test]
fn side_channel_value_is_used() {
    let g = reshape_graph();
    let mut kg = KernelGraph::new(g.graph, device());
    kg.set_input(g.target, &i64_tensor(&[2, 3])).unwrap();

    let fresh = DeviceAddress::from_host(device(), &i64_tensor(&[3, 2]));
    let side_channel = vec![None, Some(fresh)];

    let engine = InferEngine::new(default_registry());
    let mut map = DependTensorMap::new();
    engine
        .infer_shape(&mut kg, g.y, &mut map, Some(side_channel.as_slice()))
        .unwrap();

    assert_eq!(kg.graph()[g.y].abs, Abstract::tensor(DType::F32, shape![3, 2]));
    assert_eq!(map[&1], i64_tensor(&[3, 2]));
}

struct NopChain {
    kg: KernelGraph,
    reshape: Node,
    second: Node,
    sum: Node,
}

/// `sum = Add(i2, i2)` with `i2 = Identity(Identity(Reshape(x, target)))`.
fn nop_chain() -> NopChain {
    let mut graph = Graph::new();
    let x = graph.parameter(Abstract::tensor(DType::F32, shape![Dim::Unknown]));
    let target = graph.parameter(Abstract::tensor(DType::I64, shape![2]));
    let reshape = graph.apply(Primitive::new(names::RESHAPE), &[x, target]);
    let first = graph.apply(Primitive::new(names::IDENTITY), &[reshape]);
    let second = graph.apply(Primitive::new(names::IDENTITY), &[first]);
    let sum = graph.apply(Primitive::new(names::ADD), &[second, second]);
    graph.output(sum);

    let mut kg = KernelGraph::new(graph, device());
    kg.set_input(x, &f32_tensor(&[6], &[0.0; 6])).unwrap();
    kg.set_input(target, &i64_tensor(&[3, 2])).unwrap();

    NopChain {
        kg,
        reshape,
        second,
        sum,
    }
}

#[test]
fn skipped_nops_are_inferred_first() {
    let mut chain = nop_chain();
    assert_eq!(chain.kg.graph()[chain.sum].abs, Abstract::tensor(DType::F32, Shape::unknown_dims(2)));

    let engine = InferEngine::new(default_registry());
    let mut map = DependTensorMap::new();
    engine.infer_shape(&mut chain.kg, chain.sum, &mut map, None).unwrap();

    let expected = Abstract::tensor(DType::F32, shape![3, 2]);
    assert_eq!(chain.kg.graph()[chain.reshape].abs, expected);
    assert_eq!(chain.kg.graph()[chain.second].abs, expected);
    assert_eq!(chain.kg.graph()[chain.sum].abs, expected);

    // the map only ever describes the node that was asked for
    assert!(map.is_empty());
}

#[test]
fn kept_nops_are_not_walked() {
    let mut chain = nop_chain();

    let settings = InferSettings {
        skip_nop_node: false,
        ..InferSettings::default()
    };
    let engine = InferEngine::new(default_registry()).with_settings(settings);
    let mut map = DependTensorMap::new();
    engine.infer_shape(&mut chain.kg, chain.sum, &mut map, None).unwrap();

    let unknown = Abstract::tensor(DType::F32, Shape::unknown_dims(2));
    assert_eq!(chain.kg.graph()[chain.reshape].abs, unknown);
    assert_eq!(chain.kg.graph()[chain.second].abs, unknown);
    assert_eq!(chain.kg.graph()[chain.sum].abs, unknown);
}

#[test]
fn host_expression_without_hook() {
    let mut graph = Graph::new();
    let x = graph.parameter(Abstract::tensor(DType::F32, shape![2]));
    let expr = graph.apply(Primitive::new(names::HOST_EXECUTE), &[x]);
    let mut kg = KernelGraph::new(graph, device());

    let engine = InferEngine::new(default_registry());
    assert!(!engine.has_hook());

    let mut map = DependTensorMap::new();
    engine.infer_shape(&mut kg, expr, &mut map, None).unwrap();

    // pure inference gives the placeholder
    assert_eq!(kg.graph()[expr].abs, Abstract::tensor(DType::F32, shape![1]));
    assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![0]);
    assert_eq!(kg.graph()[expr].user_data, None);
}

#[test]
fn host_expression_with_hook() {
    let mut graph = Graph::new();
    let x = graph.parameter(Abstract::tensor(DType::F32, shape![2]));
    let expr = graph.apply(Primitive::new(names::HOST_EXECUTE), &[x]);
    let mut kg = KernelGraph::new(graph, device());

    let result = Abstract::tensor(DType::I64, shape![5]);
    let hook = RecordingHook::new(result.clone());
    let engine = InferEngine::new(default_registry()).with_hook(hook.clone());

    let mut map = DependTensorMap::new();
    engine.infer_shape(&mut kg, expr, &mut map, None).unwrap();

    assert_eq!(kg.graph()[expr].abs, result);
    assert_eq!(hook.call_count(), 1);
    assert_eq!(hook.calls.lock().unwrap()[0], (expr, 1));
}

#[test]
fn host_data_inputs_use_hook() {
    let mut graph = Graph::new();
    let dims = graph.parameter(Abstract::tensor(DType::I64, shape![2]));
    let value = graph.parameter(Abstract::scalar(DType::F32));
    let data = HostExprData::new("x.shape", vec![4usize, 4]);
    graph.set_user_data(dims, Some(data.clone()));
    let fill = graph.apply(Primitive::new(names::FILL), &[dims, value]);

    let mut kg = KernelGraph::new(graph, device());
    kg.set_input(dims, &i64_tensor(&[4, 4])).unwrap();

    let result = Abstract::tensor(DType::F32, shape![4, 4]);
    let hook = RecordingHook::new(result.clone());
    let engine = InferEngine::new(default_registry()).with_hook(hook.clone());

    let mut map = DependTensorMap::new();
    engine.infer_shape(&mut kg, fill, &mut map, None).unwrap();

    assert_eq!(hook.call_count(), 1);
    assert_eq!(kg.graph()[fill].abs, result.with_user_data(Some(data.clone())));
    assert_eq!(kg.graph()[fill].user_data, Some(data));

    // the producer is not a host expression, so no list starts
    let primitive = kg.graph().primitive(fill).unwrap();
    assert_eq!(primitive.attr_ints(attrs::LIST_START_INDEX), Some(&[][..]));
}

#[test]
fn host_data_is_cleared_when_gone() {
    let mut graph = Graph::new();
    let dims = graph.parameter(Abstract::tensor(DType::I64, shape![2]));
    let value = graph.parameter(Abstract::scalar(DType::F32));
    let data = HostExprData::new("x.shape", ());
    graph.set_user_data(dims, Some(data.clone()));
    let fill = graph.apply(Primitive::new(names::FILL), &[dims, value]);

    let mut kg = KernelGraph::new(graph, device());
    kg.set_input(dims, &i64_tensor(&[3, 3])).unwrap();

    let hook = RecordingHook::new(Abstract::tensor(DType::F32, shape![3, 3]));
    let engine = InferEngine::new(default_registry()).with_hook(hook.clone());
    let mut map = DependTensorMap::new();

    engine.infer_shape(&mut kg, fill, &mut map, None).unwrap();
    assert_eq!(kg.graph()[fill].user_data, Some(data));

    // the next step no longer has a host expression behind the dims
    kg.graph_mut().set_user_data(dims, None);
    kg.set_input(dims, &i64_tensor(&[1, 4])).unwrap();
    engine.infer_shape(&mut kg, fill, &mut map, None).unwrap();

    assert_eq!(hook.call_count(), 1);
    assert_eq!(kg.graph()[fill].abs, Abstract::tensor(DType::F32, shape![1, 4]));
    assert_eq!(kg.graph()[fill].user_data, None);
}

#[test]
fn sequence_used_directly_is_the_first_element() {
    let mut graph = Graph::new();
    let x = graph.parameter(Abstract::tensor(DType::F32, shape![4, 2]));
    let split = Primitive::new(names::SPLIT)
        .with_attr(attrs::AXIS, AttrValue::Int(0))
        .with_attr(attrs::OUTPUT_NUM, AttrValue::Int(2));
    let parts = graph.apply(split, &[x]);
    let sum = graph.apply_with_abstract(
        Primitive::new(names::ADD),
        &[parts, parts],
        Abstract::tensor(DType::F32, Shape::UnknownRank),
    );
    let mut kg = KernelGraph::new(graph, device());

    let engine = InferEngine::new(default_registry());
    let mut map = DependTensorMap::new();
    engine.infer_shape(&mut kg, sum, &mut map, None).unwrap();

    let element = Abstract::tensor(DType::F32, shape![2, 2]);
    assert_eq!(kg.graph()[sum].abs, element);

    // a value-dependent use of the same input sees the same element
    let plain = input_abstract(kg.graph(), sum, 0).unwrap();
    let value = f32_tensor(&[2, 2], &[0.0; 4]);
    let rebuilt = rebuild_abstract(kg.graph(), parts, &value, 0).unwrap();
    assert_eq!(plain, element);
    assert_eq!(rebuilt, plain.with_value(value));
}

#[test]
fn host_data_without_hook_is_pure() {
    let mut graph = Graph::new();
    let dims = graph.parameter(Abstract::tensor(DType::I64, shape![2]));
    let value = graph.parameter(Abstract::scalar(DType::F32));
    graph.set_user_data(dims, Some(HostExprData::new("x.shape", ())));
    let fill = graph.apply(Primitive::new(names::FILL), &[dims, value]);

    let mut kg = KernelGraph::new(graph, device());
    kg.set_input(dims, &i64_tensor(&[2, 5])).unwrap();

    let engine = InferEngine::new(default_registry());
    let mut map = DependTensorMap::new();
    engine.infer_shape(&mut kg, fill, &mut map, None).unwrap();

    assert_eq!(kg.graph()[fill].abs, Abstract::tensor(DType::F32, shape![2, 5]));
}

const PACK: &str = "Pack";

fn pack_infer(_: &Primitive, args: &[Abstract]) -> OpResult<Abstract> {
    Ok(Abstract::tensor(DType::I64, Shape::fixed(&[args.len()])))
}

fn pack_registry() -> PrimitiveRegistry {
    let mut registry = PrimitiveRegistry::with_builtins();
    registry.register(PrimitiveDef {
        name: PACK,
        infer: pack_infer,
        value_depend: ValueDepend::All,
        nop: false,
    });
    registry
}

/// `Pack(first, 7, second)` where both sequences are produced by host expressions.
fn list_start_attr(same_expression: bool) -> AttrValue {
    let registry = pack_registry();

    let mut graph = Graph::new();
    let first_data = HostExprData::new("a", ());
    let second_data = if same_expression {
        first_data.clone()
    } else {
        HostExprData::new("b", ())
    };

    let first = graph.apply_with_abstract(
        Primitive::new(names::HOST_EXECUTE),
        &[],
        Abstract::list(vec![Abstract::scalar(DType::I64); 2]),
    );
    graph.set_real_sequence_output(first, true);
    graph.set_user_data(first, Some(first_data));

    let constant = graph.constant_scalar(DConst::I(DSize::S64, 7));

    let second = graph.apply_with_abstract(
        Primitive::new(names::HOST_EXECUTE),
        &[],
        Abstract::list(vec![Abstract::scalar(DType::I64); 3]),
    );
    graph.set_real_sequence_output(second, true);
    graph.set_user_data(second, Some(second_data));

    let pack = graph.apply_in(&registry, Primitive::new(PACK), &[first, constant, second]);
    let mut kg = KernelGraph::new(graph, device());

    let hook = RecordingHook::new(Abstract::tensor(DType::I64, shape![3]));
    let engine = InferEngine::new(&registry).with_hook(hook.clone());
    let mut map = DependTensorMap::new();
    engine.infer_shape(&mut kg, pack, &mut map, None).unwrap();

    assert_eq!(hook.call_count(), 1);
    assert_eq!(map.len(), 3);
    assert_eq!(map[&0], DTensor::zeros(DType::I64, &[2]));
    assert_eq!(map[&1], DTensor::from_vec(&[1], vec![7i64]));

    // host expression values are never copied from the device
    assert_eq!(kg.output_addresses(first)[0].host_syncs(), 0);
    assert_eq!(kg.output_addresses(second)[0].host_syncs(), 0);

    kg.graph()
        .primitive(pack)
        .and_then(|p| p.attr(attrs::LIST_START_INDEX))
        .cloned()
        .unwrap()
}

#[test]
fn list_start_per_host_expression() {
    assert_eq!(list_start_attr(false), AttrValue::Ints(vec![0, 2]));
}

#[test]
fn list_start_same_host_expression() {
    assert_eq!(list_start_attr(true), AttrValue::Ints(vec![0]));
}

#[test]
fn list_start_for_selected_elements() {
    let registry = pack_registry();

    let mut graph = Graph::new();
    let expr = graph.apply_with_abstract(
        Primitive::new(names::HOST_EXECUTE),
        &[],
        Abstract::tuple(vec![Abstract::tensor(DType::I64, shape![1]); 2]),
    );
    graph.set_user_data(expr, Some(HostExprData::new("divmod", ())));
    let first = graph.tuple_get_item(expr, 0);
    let second = graph.tuple_get_item(expr, 1);
    let pack = graph.apply_in(&registry, Primitive::new(PACK), &[first, second]);
    let mut kg = KernelGraph::new(graph, device());

    let hook = RecordingHook::new(Abstract::tensor(DType::I64, shape![2]));
    let engine = InferEngine::new(&registry).with_hook(hook.clone());
    let mut map = DependTensorMap::new();
    engine.infer_shape(&mut kg, pack, &mut map, None).unwrap();

    assert_eq!(hook.call_count(), 1);
    let primitive = kg.graph().primitive(pack).unwrap();
    assert_eq!(primitive.attr(attrs::LIST_START_INDEX), Some(&AttrValue::Ints(vec![0])));
}

#[test]
fn list_start_attr_is_always_set() {
    let g = reshape_graph();
    let mut kg = KernelGraph::new(g.graph, device());
    kg.set_input(g.target, &i64_tensor(&[3, 2])).unwrap();
    assert_eq!(kg.graph().primitive(g.y).unwrap().attr(attrs::LIST_START_INDEX), None);

    let engine = InferEngine::new(default_registry());
    let mut map = DependTensorMap::new();
    engine.infer_shape(&mut kg, g.y, &mut map, None).unwrap();

    let primitive = kg.graph().primitive(g.y).unwrap();
    assert_eq!(primitive.attr(attrs::LIST_START_INDEX), Some(&AttrValue::Ints(vec![])));
}

#[test]
fn parameter_is_invalid() {
    let g = reshape_graph();
    let mut kg = KernelGraph::new(g.graph, device());

    let engine = InferEngine::new(default_registry());
    let mut map = DependTensorMap::new();
    let result = engine.infer_shape(&mut kg, g.x, &mut map, None);

    assert_eq!(result, Err(InferError::InvalidNode(g.x)));
    assert_eq!(result.unwrap_err().kind(), ErrorKind::ShapeContractViolation);
}

#[test]
fn inference_failure_is_reported() {
    let g = reshape_graph();
    let mut kg = KernelGraph::new(g.graph, device());
    kg.set_input(g.x, &f32_tensor(&[6], &[0.0; 6])).unwrap();
    kg.set_input(g.target, &i64_tensor(&[-1, -1])).unwrap();

    let engine = InferEngine::new(default_registry());
    let mut map = DependTensorMap::new();
    let err = engine.infer_shape(&mut kg, g.y, &mut map, None).unwrap_err();

    assert!(matches!(err, InferError::Inference(node, _) if node == g.y), "{}", err);
    assert_eq!(err.kind(), ErrorKind::InferenceFailure);
}

#[test]
fn infer_op_requires_kernel() {
    let g = reshape_graph();
    let mut kg = KernelGraph::new(g.graph, device());
    kg.set_input(g.target, &i64_tensor(&[2, 3])).unwrap();

    let engine = InferEngine::new(default_registry());
    let result = engine.infer_op(&mut kg, g.y, None);

    assert_eq!(result.unwrap_err(), InferError::MissingKernel(g.y));
    assert!(kg.kernel_args(g.y).is_none());
}

#[test]
fn infer_op_device_kernel() {
    let g = reshape_graph();
    let mut kg = KernelGraph::new(g.graph, device());
    kg.set_input(g.x, &f32_tensor(&[6], &[0.0; 6])).unwrap();
    kg.set_input(g.target, &i64_tensor(&[2, 3])).unwrap();
    let (kernel, _) = TestKernel::new(KernelModType::NativeGpu, KernelRet::Ok);
    kg.set_kernel(g.y, kernel);

    let engine = InferEngine::new(default_registry());
    let args = engine.infer_op(&mut kg, g.y, None).unwrap();

    assert_eq!(args.inputs.len(), 2);
    assert_eq!(args.inputs[0].shape, vec![6]);
    assert!(matches!(args.inputs[1].data, KernelData::Device(_)));
    assert_eq!(args.inputs[1].host_value, Some(i64_tensor(&[2, 3])));
    assert_eq!(args.inputs[0].host_value, None);

    assert_eq!(args.outputs.len(), 1);
    assert_eq!(args.outputs[0].shape, vec![2, 3]);
    assert_eq!(kg.output_addresses(g.y)[0].host_shape(), vec![2, 3]);

    assert_eq!(args.depend_tensor_map.keys().copied().collect::<Vec<_>>(), vec![1]);
    let stored = kg.kernel_args(g.y).unwrap();
    assert_eq!(stored.outputs[0].shape, vec![2, 3]);
}

#[test]
fn infer_op_host_kernel() {
    let g = reshape_graph();
    let mut kg = KernelGraph::new(g.graph, device());
    kg.set_input(g.target, &i64_tensor(&[3, 2])).unwrap();
    let (kernel, _) = TestKernel::new(KernelModType::NativeCpu, KernelRet::Ok);
    kg.set_kernel(g.y, kernel);

    let engine = InferEngine::new(default_registry());
    let args = engine.infer_op(&mut kg, g.y, None).unwrap();

    let input = &args.inputs[1];
    assert!(matches!(&input.data, KernelData::Host(tensor) if *tensor == i64_tensor(&[3, 2])));
    assert_eq!(input.dtype, DType::I64);
    assert_eq!(input.shape, vec![2]);
    assert_eq!(input.host_value, None);
    assert_eq!(args.outputs[0].shape, vec![3, 2]);
}
