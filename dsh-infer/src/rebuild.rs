use itertools::Itertools;

use dsh_graph::abs::{Abstract, AbstractKind, SequenceKind};
use dsh_graph::dtype::{DConst, DSize, DTensor, DType};
use dsh_graph::graph::{Graph, Node};

use crate::error::{InferError, InferResult};

/// The element types values can be read back as when rebuilding scalars and real sequences.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ScalarKind {
    I32,
    I64,
    F32,
    F64,
}

impl ScalarKind {
    pub fn from_dtype(dtype: DType) -> Option<ScalarKind> {
        match dtype {
            DType::I(DSize::S32) => Some(ScalarKind::I32),
            DType::I(DSize::S64) => Some(ScalarKind::I64),
            DType::F32 => Some(ScalarKind::F32),
            DType::F64 => Some(ScalarKind::F64),
            _ => None,
        }
    }
}

/// Read all elements of `tensor` as scalar constants, in logical order.
fn scalar_elements(tensor: &DTensor) -> InferResult<Vec<DConst>> {
    let kind = ScalarKind::from_dtype(tensor.dtype()).ok_or(InferError::UnsupportedDType(tensor.dtype()))?;

    let values = match (kind, tensor) {
        (ScalarKind::I32, DTensor::I32(inner)) => inner.iter().map(|&x| DConst::I(DSize::S32, x as i64)).collect_vec(),
        (ScalarKind::I64, DTensor::I64(inner)) => inner.iter().map(|&x| DConst::I(DSize::S64, x)).collect_vec(),
        (ScalarKind::F32, DTensor::F32(inner)) => inner.iter().map(|&x| DConst::f32(x)).collect_vec(),
        (ScalarKind::F64, DTensor::F64(inner)) => inner.iter().map(|&x| DConst::f64(x)).collect_vec(),
        _ => return Err(InferError::UnsupportedDType(tensor.dtype())),
    };
    Ok(values)
}

/// A scalar abstract holding the single value stored in `tensor`.
pub fn scalar_from_tensor(node: Node, tensor: &DTensor) -> InferResult<Abstract> {
    let value = scalar_elements(tensor)?
        .first()
        .copied()
        .ok_or(InferError::EmptyValue(node))?;
    Ok(Abstract::scalar_const(value))
}

/// A sequence with one scalar element per value in `tensor`.
pub fn sequence_from_tensor(tensor: &DTensor, seq: SequenceKind) -> InferResult<Abstract> {
    let elements = scalar_elements(tensor)?
        .into_iter()
        .map(Abstract::scalar_const)
        .collect_vec();
    Ok(Abstract::sequence(seq, elements).with_value(tensor.clone()))
}

/// Fold the materialized value of output `index` of `input` into a new abstract
/// with the same category as the current abstract of `input`.
///
/// Host expression data attached to `input` is carried over onto the new abstract.
pub fn rebuild_abstract(graph: &Graph, input: Node, tensor: &DTensor, index: usize) -> InferResult<Abstract> {
    let info = &graph[input];
    let original = &info.abs;

    let abs = match &original.kind {
        AbstractKind::Tensor { .. } => original.clone().with_value(tensor.clone()),
        AbstractKind::Scalar { .. } => scalar_from_tensor(input, tensor)?,
        AbstractKind::Sequence { seq, .. } if info.real_sequence_output => sequence_from_tensor(tensor, *seq)?,
        AbstractKind::Sequence { elements, .. } => elements
            .get(index)
            .ok_or(InferError::IndexOutOfRange("sequence elements", index, elements.len()))?
            .clone()
            .with_value(tensor.clone()),
    };

    Ok(abs.with_user_data(info.user_data.clone()))
}
