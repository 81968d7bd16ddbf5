use dsh_graph::ops::primitive::attrs;

/// Settings for the inference engine.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct InferSettings {
    /// Nop nodes are elided before execution: their shapes are inferred on behalf of their users,
    /// and their output addresses are read through to the first non-nop producer.
    pub skip_nop_node: bool,
    /// The primitive attribute that receives the input positions where a new host-expression list starts.
    pub list_start_attr: &'static str,
}

impl Default for InferSettings {
    fn default() -> Self {
        InferSettings {
            skip_nop_node: true,
            list_start_attr: attrs::LIST_START_INDEX,
        }
    }
}
