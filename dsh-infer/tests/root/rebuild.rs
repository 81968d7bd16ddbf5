use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use dsh_graph::abs::{Abstract, HostExprData, SequenceKind};
use dsh_graph::dtype::{DConst, DSize, DTensor, DType};
use dsh_graph::graph::Graph;
use dsh_graph::ops::primitive::{attrs, names, AttrValue, Primitive};
use dsh_graph::shape;
use dsh_infer::error::{ErrorKind, InferError};
use dsh_infer::rebuild::{rebuild_abstract, sequence_from_tensor};

#[test]
fn scalar_round_trip() {
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..16 {
        let cases = [
            (DType::I32, DTensor::scalar(rng.gen::<i32>())),
            (DType::I64, DTensor::scalar(rng.gen::<i64>())),
            (DType::F32, DTensor::scalar(rng.gen::<f32>() * 1e6)),
            (DType::F64, DTensor::scalar(rng.gen::<f64>() - 0.5)),
        ];

        for (dtype, tensor) in cases {
            let mut graph = Graph::new();
            let node = graph.parameter(Abstract::scalar(dtype));

            let abs = rebuild_abstract(&graph, node, &tensor, 0).unwrap();
            assert_eq!(abs.dtype(), Some(dtype));
            assert_eq!(abs.scalar_value(), tensor.first_dconst());
        }
    }
}

#[test]
fn scalar_extremes() {
    let mut graph = Graph::new();
    let node = graph.parameter(Abstract::scalar(DType::I64));

    let abs = rebuild_abstract(&graph, node, &DTensor::scalar(i64::MIN), 0).unwrap();
    assert_eq!(abs.scalar_value(), Some(DConst::I(DSize::S64, i64::MIN)));

    let abs = rebuild_abstract(&graph, node, &DTensor::scalar(f64::EPSILON), 0).unwrap();
    assert_eq!(abs.scalar_value(), Some(DConst::f64(f64::EPSILON)));
}

#[test]
fn scalar_unsupported_dtype() {
    let mut graph = Graph::new();
    let node = graph.parameter(Abstract::scalar(DType::U(DSize::S8)));

    let result = rebuild_abstract(&graph, node, &DTensor::scalar(3u8), 0);
    assert_eq!(result, Err(InferError::UnsupportedDType(DType::U(DSize::S8))));
    assert_eq!(result.unwrap_err().kind(), ErrorKind::TypeMismatch);
}

#[test]
fn scalar_from_empty_tensor() {
    let mut graph = Graph::new();
    let node = graph.parameter(Abstract::scalar(DType::I32));

    let result = rebuild_abstract(&graph, node, &DTensor::zeros(DType::I32, &[0]), 0);
    assert_eq!(result, Err(InferError::EmptyValue(node)));
}

#[test]
fn tensor_gets_value() {
    let mut graph = Graph::new();
    let node = graph.parameter(Abstract::tensor(DType::I64, shape![2]));
    let tensor = DTensor::from_vec(&[2], vec![2i64, 3]);

    let abs = rebuild_abstract(&graph, node, &tensor, 0).unwrap();
    assert_eq!(abs, Abstract::tensor(DType::I64, shape![2]).with_value(tensor));
    assert_eq!(graph[node].abs.value_tensor(), None);
}

#[test]
fn real_sequence_elements() {
    let values = vec![5i64, -2, 0, 9, 11];
    let tensor = DTensor::from_vec(&[values.len()], values.clone());

    for seq in [SequenceKind::Tuple, SequenceKind::List] {
        let mut graph = Graph::new();
        let node = graph.parameter(Abstract::sequence(seq, vec![Abstract::scalar(DType::I64); values.len()]));
        graph.set_real_sequence_output(node, true);

        let abs = rebuild_abstract(&graph, node, &tensor, 0).unwrap();
        assert_eq!(abs.sequence_kind(), Some(seq));
        assert_eq!(abs.value_tensor(), Some(&tensor));

        let elements = abs.elements().unwrap();
        assert_eq!(elements.len(), values.len());
        for (element, &value) in elements.iter().zip(&values) {
            assert_eq!(element.scalar_value(), Some(DConst::I(DSize::S64, value)));
        }
    }
}

#[test]
fn real_sequence_unsupported_dtype() {
    let tensor = DTensor::from_vec(&[2], vec![1u16, 2]);
    let result = sequence_from_tensor(&tensor, SequenceKind::List);
    assert_eq!(result, Err(InferError::UnsupportedDType(DType::U(DSize::S16))));
}

#[test]
fn positional_sequence_element() {
    let mut graph = Graph::new();
    let x = graph.parameter(Abstract::tensor(DType::F32, shape![4, 2]));
    let split = Primitive::new(names::SPLIT)
        .with_attr(attrs::AXIS, AttrValue::Int(0))
        .with_attr(attrs::OUTPUT_NUM, AttrValue::Int(2));
    let parts = graph.apply(split, &[x]);

    let tensor = DTensor::from_vec(&[2, 2], vec![1f32, 2.0, 3.0, 4.0]);
    let abs = rebuild_abstract(&graph, parts, &tensor, 1).unwrap();
    assert_eq!(abs, Abstract::tensor(DType::F32, shape![2, 2]).with_value(tensor.clone()));

    let result = rebuild_abstract(&graph, parts, &tensor, 2);
    assert_eq!(result, Err(InferError::IndexOutOfRange("sequence elements", 2, 2)));
    assert_eq!(result.unwrap_err().kind(), ErrorKind::ShapeContractViolation);
}

#[test]
fn user_data_is_propagated() {
    let mut graph = Graph::new();
    let node = graph.parameter(Abstract::scalar(DType::I64));
    let data = HostExprData::new("len(x)", 17usize);
    graph.set_user_data(node, Some(data.clone()));

    let abs = rebuild_abstract(&graph, node, &DTensor::scalar(17i64), 0).unwrap();
    assert_eq!(abs.user_data, Some(data));
    assert_eq!(abs.user_data.as_ref().and_then(|d| d.downcast_ref::<usize>()), Some(&17));
}
