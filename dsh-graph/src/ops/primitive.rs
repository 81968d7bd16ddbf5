use std::fmt::{Display, Formatter};

use indexmap::IndexMap;
use itertools::Itertools;

/// Names of the built-in primitives.
pub mod names {
    pub const IDENTITY: &str = "Identity";
    pub const RESHAPE: &str = "Reshape";
    pub const EXPAND_DIMS: &str = "ExpandDims";
    pub const ADD: &str = "Add";
    pub const SHAPE: &str = "Shape";
    pub const TUPLE_GET_ITEM: &str = "TupleGetItem";
    pub const MAKE_TUPLE: &str = "MakeTuple";
    pub const SPLIT: &str = "Split";
    pub const FILL: &str = "Fill";
    pub const SCALAR_ADD: &str = "ScalarAdd";
    pub const SHAPE_CALC: &str = "ShapeCalc";
    /// Opaque host expression, its outputs carry host-side user data.
    pub const HOST_EXECUTE: &str = "HostExecute";
}

/// Attribute names used by the built-in primitives.
pub mod attrs {
    pub const VALUE_DEPEND: &str = "value_depend";
    pub const AXIS: &str = "axis";
    pub const OUTPUT_NUM: &str = "output_num";
    pub const LIST_START_INDEX: &str = "list_start_index";
}

/// An operator together with its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    pub name: String,
    pub attrs: IndexMap<String, AttrValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Ints(Vec<i64>),
    Bool(bool),
    Str(String),
}

impl Primitive {
    pub fn new(name: impl Into<String>) -> Self {
        Primitive {
            name: name.into(),
            attrs: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn with_attr(mut self, key: &str, value: AttrValue) -> Self {
        self.attrs.insert(key.to_owned(), value);
        self
    }

    pub fn set_attr(&mut self, key: &str, value: AttrValue) {
        self.attrs.insert(key.to_owned(), value);
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    pub fn attr_int(&self, key: &str) -> Option<i64> {
        match self.attr(key)? {
            &AttrValue::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn attr_ints(&self, key: &str) -> Option<&[i64]> {
        match self.attr(key)? {
            AttrValue::Ints(v) => Some(v),
            _ => None,
        }
    }

    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }
}

impl Display for AttrValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::Int(v) => write!(f, "{}", v),
            AttrValue::Ints(v) => write!(f, "[{}]", v.iter().join(", ")),
            AttrValue::Bool(v) => write!(f, "{}", v),
            AttrValue::Str(v) => write!(f, "{:?}", v),
        }
    }
}

impl Display for Primitive {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.attrs.is_empty() {
            let attrs = self.attrs.iter().map(|(k, v)| format!("{}={}", k, v)).join(", ");
            write!(f, "[{}]", attrs)?;
        }
        Ok(())
    }
}
