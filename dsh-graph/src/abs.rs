use std::any::Any;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use itertools::Itertools;

use crate::dtype::{DConst, DTensor, DType};
use crate::shape::{Dim, Shape};

/// The abstract descriptor of a value: its type and shape, and optionally its concrete value.
#[derive(Debug, Clone, PartialEq)]
pub struct Abstract {
    pub kind: AbstractKind,
    /// Out-of-band payload for values produced by an opaque host expression.
    pub user_data: Option<HostExprData>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AbstractKind {
    Scalar {
        dtype: DType,
        value: Option<DConst>,
    },
    Tensor {
        dtype: DType,
        shape: Shape,
        value: Option<DTensor>,
    },
    Sequence {
        seq: SequenceKind,
        elements: Vec<Abstract>,
        value: Option<DTensor>,
    },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SequenceKind {
    Tuple,
    List,
}

/// Opaque host-side payload attached to the outputs of host expressions.
///
/// Two instances are only equal if they are clones of the same payload.
#[derive(Clone)]
pub struct HostExprData {
    inner: Arc<HostExprInner>,
}

struct HostExprInner {
    expression: String,
    object: Box<dyn Any + Send + Sync>,
}

impl HostExprData {
    pub fn new(expression: impl Into<String>, object: impl Any + Send + Sync) -> Self {
        HostExprData {
            inner: Arc::new(HostExprInner {
                expression: expression.into(),
                object: Box::new(object),
            }),
        }
    }

    pub fn expression(&self) -> &str {
        &self.inner.expression
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.object.downcast_ref()
    }
}

impl PartialEq for HostExprData {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Debug for HostExprData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "HostExprData({:?})", self.inner.expression)
    }
}

impl Abstract {
    fn new(kind: AbstractKind) -> Self {
        Abstract { kind, user_data: None }
    }

    pub fn scalar(dtype: DType) -> Self {
        Abstract::new(AbstractKind::Scalar { dtype, value: None })
    }

    pub fn scalar_const(value: DConst) -> Self {
        Abstract::new(AbstractKind::Scalar {
            dtype: value.dtype(),
            value: Some(value),
        })
    }

    pub fn tensor(dtype: DType, shape: Shape) -> Self {
        Abstract::new(AbstractKind::Tensor {
            dtype,
            shape,
            value: None,
        })
    }

    /// A tensor abstract that fully describes the given constant.
    pub fn tensor_value(value: DTensor) -> Self {
        Abstract::new(AbstractKind::Tensor {
            dtype: value.dtype(),
            shape: Shape::fixed(value.shape()),
            value: Some(value),
        })
    }

    pub fn sequence(seq: SequenceKind, elements: Vec<Abstract>) -> Self {
        Abstract::new(AbstractKind::Sequence {
            seq,
            elements,
            value: None,
        })
    }

    pub fn tuple(elements: Vec<Abstract>) -> Self {
        Abstract::sequence(SequenceKind::Tuple, elements)
    }

    pub fn list(elements: Vec<Abstract>) -> Self {
        Abstract::sequence(SequenceKind::List, elements)
    }

    /// Attach a concrete value. Scalars keep only the first element of the tensor.
    #[must_use]
    pub fn with_value(mut self, tensor: DTensor) -> Self {
        match &mut self.kind {
            AbstractKind::Scalar { value, .. } => *value = tensor.first_dconst(),
            AbstractKind::Tensor { value, .. } => *value = Some(tensor),
            AbstractKind::Sequence { value, .. } => *value = Some(tensor),
        }
        self
    }

    #[must_use]
    pub fn with_user_data(mut self, user_data: Option<HostExprData>) -> Self {
        self.user_data = user_data;
        self
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, AbstractKind::Scalar { .. })
    }

    pub fn is_tensor(&self) -> bool {
        matches!(self.kind, AbstractKind::Tensor { .. })
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self.kind, AbstractKind::Sequence { .. })
    }

    pub fn sequence_kind(&self) -> Option<SequenceKind> {
        match self.kind {
            AbstractKind::Sequence { seq, .. } => Some(seq),
            _ => None,
        }
    }

    pub fn elements(&self) -> Option<&[Abstract]> {
        match &self.kind {
            AbstractKind::Sequence { elements, .. } => Some(elements),
            _ => None,
        }
    }

    /// The element at `index` for sequences, `None` for other kinds or when out of bounds.
    pub fn element(&self, index: usize) -> Option<&Abstract> {
        self.elements()?.get(index)
    }

    /// The dtype of scalars and tensors. Sequences have no single dtype.
    pub fn dtype(&self) -> Option<DType> {
        match self.kind {
            AbstractKind::Scalar { dtype, .. } => Some(dtype),
            AbstractKind::Tensor { dtype, .. } => Some(dtype),
            AbstractKind::Sequence { .. } => None,
        }
    }

    /// The shape this value has when viewed as a single tensor.
    ///
    /// Scalars are rank zero, sequences are viewed as a flat tensor with one entry per element.
    pub fn build_shape(&self) -> Shape {
        match &self.kind {
            AbstractKind::Scalar { .. } => Shape::SCALAR,
            AbstractKind::Tensor { shape, .. } => shape.clone(),
            AbstractKind::Sequence { elements, .. } => Shape::fixed(&[elements.len()]),
        }
    }

    pub fn value_tensor(&self) -> Option<&DTensor> {
        match &self.kind {
            AbstractKind::Scalar { .. } => None,
            AbstractKind::Tensor { value, .. } => value.as_ref(),
            AbstractKind::Sequence { value, .. } => value.as_ref(),
        }
    }

    pub fn scalar_value(&self) -> Option<DConst> {
        match self.kind {
            AbstractKind::Scalar { value, .. } => value,
            _ => None,
        }
    }

    /// Whether any shape inside this abstract still contains unknown dimensions or rank.
    pub fn is_dynamic(&self) -> bool {
        match &self.kind {
            AbstractKind::Scalar { .. } => false,
            AbstractKind::Tensor { shape, .. } => match shape {
                Shape::Ranked(dims) => dims.contains(&Dim::Unknown),
                Shape::UnknownRank => true,
            },
            AbstractKind::Sequence { elements, .. } => elements.iter().any(|e| e.is_dynamic()),
        }
    }
}

impl Display for Abstract {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            AbstractKind::Scalar { dtype, value } => match value {
                Some(value) => write!(f, "Scalar({} = {})", dtype, value)?,
                None => write!(f, "Scalar({})", dtype)?,
            },
            AbstractKind::Tensor { dtype, shape, value } => {
                write!(f, "Tensor({}, {})", dtype, shape)?;
                if value.is_some() {
                    write!(f, "+value")?;
                }
            }
            AbstractKind::Sequence { seq, elements, .. } => {
                write!(f, "{:?}[{}]", seq, elements.iter().join(", "))?;
            }
        }
        if self.user_data.is_some() {
            write!(f, "+user_data")?;
        }
        Ok(())
    }
}
