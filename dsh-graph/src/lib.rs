#![warn(missing_debug_implementations)]
#![allow(clippy::new_without_default)]

//! Graph intermediate representation for runtime shape inference.
//!
//! The core type of this crate is [Graph](graph::Graph), an append-only arena of nodes and subgraphs.
//! Every node carries an [Abstract](abs::Abstract) describing the type and shape of its output,
//! and optionally its concrete value once it is known.
//!
//! Primitives are described by a [PrimitiveRegistry](ops::registry::PrimitiveRegistry),
//! which holds their pure shape inference function and which of their inputs are value-dependent.
//!
//! ```
//! # use dsh_graph::abs::Abstract;
//! # use dsh_graph::dtype::DType;
//! # use dsh_graph::graph::Graph;
//! # use dsh_graph::ops::primitive::{names, Primitive};
//! # use dsh_graph::ops::registry::default_registry;
//! # use dsh_graph::shape::{Dim, Shape};
//! # use dsh_graph::shape;
//! let mut graph = Graph::new();
//! let x = graph.parameter(Abstract::tensor(DType::F32, shape![Dim::Unknown, 4]));
//! let target = graph.parameter(Abstract::tensor(DType::I64, shape![2]));
//! let reshape = Primitive::new(names::RESHAPE);
//!
//! // the target shape is only known at runtime
//! assert_eq!(default_registry().value_depend(&reshape, 2), vec![1]);
//! let y = graph.apply(reshape, &[x, target]);
//! assert_eq!(graph[y].abs, Abstract::tensor(DType::F32, Shape::unknown_dims(2)));
//! ```

/// The [ndarray] crate is used for host tensor storage, and re-exported for convenience.
pub use ndarray;

/// The [Abstract](abs::Abstract) value descriptor.
pub mod abs;
/// The [DType](dtype::DType) enum and host tensors.
pub mod dtype;
/// The core graph datastructure.
pub mod graph;
/// Primitives, their registry and their shape inference.
pub mod ops;
/// The [Shape](shape::Shape) type and utilities.
pub mod shape;
