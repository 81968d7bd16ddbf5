use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

use lazy_static::lazy_static;

use crate::abs::Abstract;
use crate::ops::infer;
use crate::ops::primitive::{attrs, names, Primitive};
use crate::ops::result::{OpError, OpResult};

/// Pure shape/type inference for a primitive, from the abstracts of its inputs.
pub type InferFn = fn(&Primitive, &[Abstract]) -> OpResult<Abstract>;

/// Which inputs of a primitive need their concrete value for shape inference.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ValueDepend {
    None,
    Fixed(&'static [usize]),
    /// Every input is value-dependent.
    All,
    /// The indices are read from an integer-list attribute of the primitive instance.
    ByAttr(&'static str),
}

#[derive(Copy, Clone)]
pub struct PrimitiveDef {
    pub name: &'static str,
    pub infer: InferFn,
    pub value_depend: ValueDepend,
    /// The output is the first input, unchanged in memory. Nop nodes can be elided before execution.
    pub nop: bool,
}

/// The set of primitives known to the inference engine.
#[derive(Debug, Clone, Default)]
pub struct PrimitiveRegistry {
    defs: HashMap<&'static str, PrimitiveDef>,
}

lazy_static! {
    static ref DEFAULT_REGISTRY: PrimitiveRegistry = PrimitiveRegistry::with_builtins();
}

/// The process-wide registry containing only the built-in primitives.
pub fn default_registry() -> &'static PrimitiveRegistry {
    &DEFAULT_REGISTRY
}

impl PrimitiveRegistry {
    pub fn new() -> Self {
        PrimitiveRegistry { defs: HashMap::new() }
    }

    pub fn with_builtins() -> Self {
        let mut registry = PrimitiveRegistry::new();

        let builtins: [(&'static str, InferFn, ValueDepend, bool); 12] = [
            (names::IDENTITY, infer::identity, ValueDepend::None, true),
            (names::RESHAPE, infer::reshape, ValueDepend::Fixed(&[1]), true),
            (names::EXPAND_DIMS, infer::expand_dims, ValueDepend::None, true),
            (names::ADD, infer::add, ValueDepend::None, false),
            (names::SHAPE, infer::shape, ValueDepend::None, false),
            (names::TUPLE_GET_ITEM, infer::tuple_get_item, ValueDepend::None, false),
            (names::MAKE_TUPLE, infer::make_tuple, ValueDepend::None, false),
            (names::SPLIT, infer::split, ValueDepend::None, false),
            (names::FILL, infer::fill, ValueDepend::Fixed(&[0]), false),
            (names::SCALAR_ADD, infer::scalar_add, ValueDepend::None, false),
            (names::SHAPE_CALC, infer::shape_calc, ValueDepend::ByAttr(attrs::VALUE_DEPEND), false),
            (names::HOST_EXECUTE, infer::host_execute, ValueDepend::All, false),
        ];

        for (name, infer, value_depend, nop) in builtins {
            registry.register(PrimitiveDef {
                name,
                infer,
                value_depend,
                nop,
            });
        }

        registry
    }

    /// Register a primitive, replacing any existing definition with the same name.
    pub fn register(&mut self, def: PrimitiveDef) {
        self.defs.insert(def.name, def);
    }

    pub fn get(&self, name: &str) -> Option<&PrimitiveDef> {
        self.defs.get(name)
    }

    pub fn is_nop(&self, primitive: &Primitive) -> bool {
        self.get(&primitive.name).map_or(false, |def| def.nop)
    }

    /// Run the pure inference function of `primitive`.
    pub fn infer(&self, primitive: &Primitive, args: &[Abstract]) -> OpResult<Abstract> {
        let def = self
            .get(&primitive.name)
            .ok_or_else(|| OpError::UnknownPrimitive(primitive.name.clone()))?;
        (def.infer)(primitive, args)
    }

    /// The value-dependent input positions of this primitive instance, sorted and deduplicated.
    ///
    /// Positions that don't exist for `input_count` inputs are dropped.
    pub fn value_depend(&self, primitive: &Primitive, input_count: usize) -> Vec<usize> {
        let def = match self.get(&primitive.name) {
            Some(def) => def,
            None => return vec![],
        };

        let mut indices = match def.value_depend {
            ValueDepend::None => vec![],
            ValueDepend::Fixed(indices) => indices.to_vec(),
            ValueDepend::All => (0..input_count).collect(),
            ValueDepend::ByAttr(attr) => primitive
                .attr_ints(attr)
                .unwrap_or(&[])
                .iter()
                .filter_map(|&i| usize::try_from(i).ok())
                .collect(),
        };

        indices.retain(|&i| i < input_count);
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

impl Debug for PrimitiveDef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimitiveDef")
            .field("name", &self.name)
            .field("value_depend", &self.value_depend)
            .field("nop", &self.nop)
            .finish_non_exhaustive()
    }
}
