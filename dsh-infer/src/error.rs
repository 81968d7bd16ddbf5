use std::error::Error;
use std::fmt::{Display, Formatter};

use dsh_device::error::DeviceError;
use dsh_graph::dtype::DType;
use dsh_graph::graph::{Node, Subgraph};
use dsh_graph::ops::result::OpError;

use crate::kernel::KernelRet;

pub type InferResult<T> = Result<T, InferError>;

#[derive(Debug, Clone, PartialEq)]
pub enum InferError {
    /// node, input index
    MissingData(Node, usize),
    /// input index
    MissingDependValue(usize),

    /// producer, element index, dtype of the first element, dtype of this element
    SequenceTypeMismatch(Node, usize, DType, DType),
    /// producer, element index
    NonScalarSequenceElement(Node, usize),
    UnsupportedDType(DType),

    /// what was indexed, index, length
    IndexOutOfRange(&'static str, usize, usize),
    /// subgraph, parameter count, argument count
    ParameterCountMismatch(Subgraph, usize, usize),
    UnmappedReturn(Node),
    /// producer, output index
    UnresolvedShape(Node, usize),
    EmptyValue(Node),
    /// node, input index
    DuplicateDependInput(Node, usize),
    /// The node does not apply a primitive or subgraph.
    InvalidNode(Node),

    Inference(Node, OpError),
    Hook(Node, String),

    Device(DeviceError),

    MissingKernel(Node),
    ResizeFailed(Node, KernelRet),
    LaunchFailed(Node, String),
}

/// The broad category of an [InferError].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// No valid source for a value-dependent input.
    MissingData,
    /// Inconsistent or unsupported dtypes while materializing values.
    TypeMismatch,
    /// Out of range indices and mismatched counts.
    ShapeContractViolation,
    /// The primitive or subgraph inference itself rejected its inputs.
    InferenceFailure,
    Device,
    Kernel,
}

impl InferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InferError::MissingData(_, _) | InferError::MissingDependValue(_) => ErrorKind::MissingData,

            InferError::SequenceTypeMismatch(_, _, _, _)
            | InferError::NonScalarSequenceElement(_, _)
            | InferError::UnsupportedDType(_) => ErrorKind::TypeMismatch,

            InferError::IndexOutOfRange(_, _, _)
            | InferError::ParameterCountMismatch(_, _, _)
            | InferError::UnmappedReturn(_)
            | InferError::UnresolvedShape(_, _)
            | InferError::EmptyValue(_)
            | InferError::DuplicateDependInput(_, _)
            | InferError::InvalidNode(_) => ErrorKind::ShapeContractViolation,

            InferError::Inference(_, _) | InferError::Hook(_, _) => ErrorKind::InferenceFailure,

            InferError::Device(_) => ErrorKind::Device,

            InferError::MissingKernel(_) | InferError::ResizeFailed(_, _) | InferError::LaunchFailed(_, _) => {
                ErrorKind::Kernel
            }
        }
    }
}

impl From<DeviceError> for InferError {
    fn from(e: DeviceError) -> Self {
        InferError::Device(e)
    }
}

pub trait ToInferResult {
    type T;
    fn to_infer_result(self, node: Node) -> InferResult<Self::T>;
}

impl<T> ToInferResult for Result<T, OpError> {
    type T = T;
    fn to_infer_result(self, node: Node) -> InferResult<T> {
        self.map_err(|e| InferError::Inference(node, e))
    }
}

impl Display for InferError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for InferError {}
