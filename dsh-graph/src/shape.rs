use std::fmt::{Debug, Display, Formatter};

use itertools::Itertools;

/// A single dimension, possibly only known at runtime.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub enum Dim {
    Known(usize),
    Unknown,
}

/// The shape of a tensor. Either the rank is known and each dimension is a [Dim],
/// or even the rank is unknown until the value is available at runtime.
#[derive(Clone, Eq, PartialEq, Hash)]
pub enum Shape {
    Ranked(Vec<Dim>),
    UnknownRank,
}

/// Signed marker for an unknown dimension in a [ShapeVector].
pub const UNKNOWN_DIM: i64 = -1;
/// Signed marker for an unknown rank in a [ShapeVector].
pub const UNKNOWN_RANK: i64 = -2;

/// The signed shape form device addresses and kernels exchange.
pub type ShapeVector = Vec<i64>;

/// Build a ranked [Shape] from a list of dimensions, anything that converts into [Dim] is accepted.
#[macro_export]
macro_rules! shape {
    [$($dim:expr),* $(,)?] => {
        $crate::shape::Shape::Ranked(vec![$($crate::shape::Dim::from($dim)),*])
    };
}

impl Shape {
    pub const SCALAR: Shape = Shape::Ranked(Vec::new());

    pub fn new(dims: Vec<Dim>) -> Shape {
        Shape::Ranked(dims)
    }

    pub fn fixed(dims: &[usize]) -> Shape {
        Shape::Ranked(dims.iter().map(|&d| Dim::Known(d)).collect_vec())
    }

    /// A shape with the given rank where every dimension is unknown.
    pub fn unknown_dims(rank: usize) -> Shape {
        Shape::Ranked(vec![Dim::Unknown; rank])
    }

    pub fn dims(&self) -> Option<&[Dim]> {
        match self {
            Shape::Ranked(dims) => Some(dims),
            Shape::UnknownRank => None,
        }
    }

    pub fn rank(&self) -> Option<usize> {
        self.dims().map(|dims| dims.len())
    }

    pub fn is_fixed(&self) -> bool {
        self.as_fixed().is_some()
    }

    pub fn as_fixed(&self) -> Option<Vec<usize>> {
        self.dims()?.iter().map(|d| d.value()).collect()
    }

    pub fn unwrap_fixed(&self, what: &str) -> Vec<usize> {
        match self.as_fixed() {
            Some(dims) => dims,
            None => panic!("{} must be fixed, but was {}", what, self),
        }
    }

    /// The number of elements, if known and representable as `usize`.
    pub fn size(&self) -> Option<usize> {
        self.as_fixed()?.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    pub fn to_shape_vector(&self) -> ShapeVector {
        match self {
            Shape::Ranked(dims) => dims
                .iter()
                .map(|d| match *d {
                    Dim::Known(v) => v as i64,
                    Dim::Unknown => UNKNOWN_DIM,
                })
                .collect_vec(),
            Shape::UnknownRank => vec![UNKNOWN_RANK],
        }
    }

    pub fn from_shape_vector(vector: &[i64]) -> Shape {
        if vector.contains(&UNKNOWN_RANK) {
            return Shape::UnknownRank;
        }

        let dims = vector
            .iter()
            .map(|&v| {
                assert!(v >= UNKNOWN_DIM, "Invalid dimension {} in shape vector {:?}", v, vector);
                if v == UNKNOWN_DIM {
                    Dim::Unknown
                } else {
                    Dim::Known(v as usize)
                }
            })
            .collect_vec();
        Shape::Ranked(dims)
    }
}

impl Dim {
    pub fn value(self) -> Option<usize> {
        match self {
            Dim::Known(v) => Some(v),
            Dim::Unknown => None,
        }
    }
}

impl From<usize> for Dim {
    fn from(value: usize) -> Self {
        Dim::Known(value)
    }
}

impl Display for Dim {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Dim::Known(v) => write!(f, "{}", v),
            Dim::Unknown => write!(f, "?"),
        }
    }
}

impl Debug for Dim {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Dim({})", self)
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Shape::Ranked(dims) => {
                if dims.is_empty() {
                    write!(f, "()")
                } else {
                    write!(f, "({})", dims.iter().join(" x "))
                }
            }
            Shape::UnknownRank => write!(f, "(*)"),
        }
    }
}

impl Debug for Shape {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Shape{}", self)
    }
}
