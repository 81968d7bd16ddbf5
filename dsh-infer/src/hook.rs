use std::fmt::Debug;

use dsh_graph::abs::Abstract;
use dsh_graph::graph::{Graph, Node};
use dsh_graph::ops::primitive::Primitive;

use crate::error::InferResult;

/// Inference for nodes whose inputs carry host expression data,
/// typically backed by an interpreter that can evaluate the expressions.
///
/// Implementations are constructed once and shared with every [InferEngine](crate::engine::InferEngine)
/// that needs them. Engines without a hook fall back to pure inference.
pub trait HostExprInfer: Debug + Send + Sync {
    fn infer(&self, graph: &Graph, node: Node, primitive: &Primitive, args: &[Abstract]) -> InferResult<Abstract>;
}
