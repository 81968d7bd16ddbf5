use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::dtype::DType;
use crate::shape::Shape;

pub type OpResult<T> = Result<T, OpError>;

/// Rejection of a primitive's inputs by its shape/type inference.
#[derive(Debug, Clone, PartialEq)]
pub enum OpError {
    UnknownPrimitive(String),

    /// primitive, expected, actual
    WrongArgCount(String, usize, usize),
    /// primitive, argument index, description of what was expected
    InvalidArg(String, usize, String),
    /// primitive, left, right
    TypeMismatch(String, DType, DType),
    /// primitive, left, right
    IncompatibleShapes(String, Shape, Shape),
    /// primitive, index, length
    IndexOutOfRange(String, i64, usize),

    MissingAttribute(String, &'static str),
}

pub trait UnwrapArg {
    type T;
    fn unwrap_arg(self, primitive: &str, index: usize, expected: &str) -> OpResult<Self::T>;
}

impl<T> UnwrapArg for Option<T> {
    type T = T;
    fn unwrap_arg(self, primitive: &str, index: usize, expected: &str) -> OpResult<T> {
        self.ok_or_else(|| OpError::InvalidArg(primitive.to_owned(), index, expected.to_owned()))
    }
}

impl Display for OpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for OpError {}
