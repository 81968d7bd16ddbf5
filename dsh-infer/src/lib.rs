#![warn(missing_debug_implementations)]
#![allow(clippy::new_without_default)]
#![allow(clippy::len_without_is_empty)]

//! Runtime shape inference for graphs whose shapes depend on the values of tensors.
//!
//! Before a node with a dynamic shape can be executed, the values of its value-dependent inputs are
//! copied back from the device ([materialize]), folded into the abstracts of those inputs ([rebuild]),
//! and passed to the inference function of the primitive or subgraph ([engine]).
//! The resulting abstract is then turned into kernel arguments ([bind]).
//!
//! Device to host copies are blocking, so they only happen for the inputs [depend] marks as value-dependent.
//!
//! ```
//! # use dsh_device::handle::Device;
//! # use dsh_graph::abs::Abstract;
//! # use dsh_graph::dtype::{DTensor, DType};
//! # use dsh_graph::graph::Graph;
//! # use dsh_graph::ops::primitive::{names, Primitive};
//! # use dsh_graph::ops::registry::default_registry;
//! # use dsh_graph::shape;
//! # use dsh_infer::engine::InferEngine;
//! # use dsh_infer::kernel::DependTensorMap;
//! # use dsh_infer::kernel_graph::KernelGraph;
//! let mut graph = Graph::new();
//! let x = graph.parameter(Abstract::tensor(DType::F32, shape![6]));
//! let target = graph.parameter(Abstract::tensor(DType::I64, shape![2]));
//! let y = graph.apply(Primitive::new(names::RESHAPE), &[x, target]);
//! graph.output(y);
//!
//! let device = Device::new(0).unwrap();
//! let mut kg = KernelGraph::new(graph, device);
//! kg.set_input(target, &DTensor::from_vec(&[2], vec![2i64, 3])).unwrap();
//!
//! let engine = InferEngine::new(default_registry());
//! let mut map = DependTensorMap::new();
//! engine.infer_shape(&mut kg, y, &mut map, None).unwrap();
//!
//! assert_eq!(kg.graph()[y].abs, Abstract::tensor(DType::F32, shape![2, 3]));
//! assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![1]);
//! ```

pub mod actors;
pub mod bind;
pub mod depend;
pub mod eager;
pub mod engine;
pub mod error;
pub mod hook;
pub mod kernel;
pub mod kernel_graph;
pub mod kernels;
pub mod materialize;
pub mod rebuild;
pub mod settings;
