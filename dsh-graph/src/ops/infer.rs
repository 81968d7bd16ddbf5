//! Shape and type inference for the built-in primitives.
//!
//! Every function only looks at the abstracts of the inputs. Values that are not known yet
//! lead to unknown dimensions or an unknown rank in the output instead of an error.

use std::cmp::max;

use itertools::{zip_eq, Itertools};

use crate::abs::{Abstract, AbstractKind};
use crate::dtype::{DConst, DSize, DType};
use crate::ops::primitive::{attrs, names, Primitive};
use crate::ops::result::{OpError, OpResult, UnwrapArg};
use crate::shape::{Dim, Shape};

fn check_arg_count(primitive: &Primitive, args: &[Abstract], expected: usize) -> OpResult<()> {
    if args.len() != expected {
        return Err(OpError::WrongArgCount(primitive.name.clone(), expected, args.len()));
    }
    Ok(())
}

/// The dtype and shape of an argument that is used as a tensor. Scalars count as rank zero tensors.
fn tensor_arg(primitive: &Primitive, args: &[Abstract], index: usize) -> OpResult<(DType, Shape)> {
    match &args[index].kind {
        AbstractKind::Scalar { dtype, .. } => Ok((*dtype, Shape::SCALAR)),
        AbstractKind::Tensor { dtype, shape, .. } => Ok((*dtype, shape.clone())),
        AbstractKind::Sequence { .. } => Err(OpError::InvalidArg(
            primitive.name.clone(),
            index,
            "tensor or scalar".to_owned(),
        )),
    }
}

/// The integer values held by an abstract, one entry per element, `None` for elements not known yet.
///
/// Returns `None` if even the number of elements is unknown.
pub fn shape_values(abs: &Abstract) -> Option<Vec<Option<i64>>> {
    if let Some(tensor) = abs.value_tensor() {
        return Some(tensor.to_dconsts().into_iter().map(DConst::as_i64).collect_vec());
    }

    match &abs.kind {
        AbstractKind::Scalar { value, .. } => Some(vec![value.and_then(DConst::as_i64)]),
        AbstractKind::Tensor { shape, .. } => match shape.as_fixed()?.as_slice() {
            [] => Some(vec![None]),
            &[n] => Some(vec![None; n]),
            _ => None,
        },
        AbstractKind::Sequence { elements, .. } => Some(
            elements
                .iter()
                .map(|e| e.scalar_value().and_then(DConst::as_i64))
                .collect_vec(),
        ),
    }
}

/// The fully known integer values of an abstract, if any.
pub fn abstract_to_i64s(abs: &Abstract) -> Option<Vec<i64>> {
    shape_values(abs)?.into_iter().collect()
}

fn shape_from_values(primitive: &Primitive, index: usize, values: Option<Vec<Option<i64>>>) -> OpResult<Shape> {
    let values = match values {
        Some(values) => values,
        None => return Ok(Shape::UnknownRank),
    };

    let dims = values
        .into_iter()
        .map(|v| match v {
            None => Ok(Dim::Unknown),
            Some(v) if v >= 0 => Ok(Dim::Known(v as usize)),
            Some(v) => Err(OpError::InvalidArg(
                primitive.name.clone(),
                index,
                format!("non-negative dimension, got {}", v),
            )),
        })
        .collect::<OpResult<Vec<_>>>()?;

    Ok(Shape::Ranked(dims))
}

pub fn broadcast_shapes(primitive: &Primitive, left: &Shape, right: &Shape) -> OpResult<Shape> {
    let (left_dims, right_dims) = match (left.dims(), right.dims()) {
        (Some(l), Some(r)) => (l, r),
        _ => return Ok(Shape::UnknownRank),
    };

    let rank = max(left_dims.len(), right_dims.len());
    let pad = |dims: &[Dim]| {
        let mut result = vec![Dim::Known(1); rank - dims.len()];
        result.extend_from_slice(dims);
        result
    };

    let result = zip_eq(pad(left_dims), pad(right_dims))
        .map(|(l, r)| match (l, r) {
            (Dim::Known(1), other) | (other, Dim::Known(1)) => Ok(other),
            (Dim::Known(l), Dim::Known(r)) if l == r => Ok(Dim::Known(l)),
            (Dim::Known(k), Dim::Unknown) | (Dim::Unknown, Dim::Known(k)) => Ok(Dim::Known(k)),
            (Dim::Unknown, Dim::Unknown) => Ok(Dim::Unknown),
            _ => Err(OpError::IncompatibleShapes(
                primitive.name.clone(),
                left.clone(),
                right.clone(),
            )),
        })
        .collect::<OpResult<Vec<_>>>()?;

    Ok(Shape::Ranked(result))
}

pub fn identity(primitive: &Primitive, args: &[Abstract]) -> OpResult<Abstract> {
    check_arg_count(primitive, args, 1)?;
    Ok(args[0].clone().with_user_data(None))
}

pub fn reshape(primitive: &Primitive, args: &[Abstract]) -> OpResult<Abstract> {
    check_arg_count(primitive, args, 2)?;
    let (dtype, input_shape) = tensor_arg(primitive, args, 0)?;

    let values = match shape_values(&args[1]) {
        Some(values) => values,
        None => return Ok(Abstract::tensor(dtype, Shape::UnknownRank)),
    };

    let known: Option<Vec<i64>> = values.iter().copied().collect();
    let known = match known {
        Some(known) => known,
        None => {
            let dims = values
                .iter()
                .map(|v| match v {
                    &Some(v) if v >= 0 => Dim::Known(v as usize),
                    _ => Dim::Unknown,
                })
                .collect_vec();
            return Ok(Abstract::tensor(dtype, Shape::Ranked(dims)));
        }
    };

    let mut infer_index = None;
    let mut known_product = 1usize;
    for (i, &v) in known.iter().enumerate() {
        match v {
            -1 => {
                if infer_index.replace(i).is_some() {
                    return Err(OpError::InvalidArg(
                        primitive.name.clone(),
                        1,
                        "at most one -1 dimension".to_owned(),
                    ));
                }
            }
            v if v >= 0 => {
                known_product = known_product.checked_mul(v as usize).ok_or_else(|| {
                    OpError::InvalidArg(primitive.name.clone(), 1, format!("shape with fewer elements, got {:?}", known))
                })?
            }
            v => {
                return Err(OpError::InvalidArg(
                    primitive.name.clone(),
                    1,
                    format!("dimension >= -1, got {}", v),
                ))
            }
        }
    }

    let input_size = input_shape.size();
    if input_size.is_none() && input_shape.is_fixed() {
        return Err(OpError::InvalidArg(
            primitive.name.clone(),
            0,
            format!("input with fewer elements, got {}", input_shape),
        ));
    }
    let mut dims = known.iter().map(|&v| Dim::Known(v.max(0) as usize)).collect_vec();

    match (infer_index, input_size) {
        (Some(i), Some(size)) => {
            if known_product == 0 || size % known_product != 0 {
                return Err(OpError::IncompatibleShapes(
                    primitive.name.clone(),
                    input_shape,
                    Shape::Ranked(dims),
                ));
            }
            dims[i] = Dim::Known(size / known_product);
        }
        (Some(i), None) => dims[i] = Dim::Unknown,
        (None, Some(size)) => {
            if size != known_product {
                return Err(OpError::IncompatibleShapes(
                    primitive.name.clone(),
                    input_shape,
                    Shape::Ranked(dims),
                ));
            }
        }
        (None, None) => {}
    }

    Ok(Abstract::tensor(dtype, Shape::Ranked(dims)))
}

pub fn expand_dims(primitive: &Primitive, args: &[Abstract]) -> OpResult<Abstract> {
    check_arg_count(primitive, args, 1)?;
    let (dtype, shape) = tensor_arg(primitive, args, 0)?;
    let axis = primitive
        .attr_int(attrs::AXIS)
        .ok_or_else(|| OpError::MissingAttribute(primitive.name.clone(), attrs::AXIS))?;

    let dims = match shape {
        Shape::Ranked(dims) => dims,
        Shape::UnknownRank => return Ok(Abstract::tensor(dtype, Shape::UnknownRank)),
    };

    let rank = dims.len() as i64;
    if axis < -rank - 1 || axis > rank {
        return Err(OpError::IndexOutOfRange(primitive.name.clone(), axis, dims.len() + 1));
    }
    let axis = (if axis < 0 { axis + rank + 1 } else { axis }) as usize;

    let mut dims = dims;
    dims.insert(axis, Dim::Known(1));
    Ok(Abstract::tensor(dtype, Shape::Ranked(dims)))
}

pub fn add(primitive: &Primitive, args: &[Abstract]) -> OpResult<Abstract> {
    check_arg_count(primitive, args, 2)?;
    let (left_dtype, left_shape) = tensor_arg(primitive, args, 0)?;
    let (right_dtype, right_shape) = tensor_arg(primitive, args, 1)?;

    if left_dtype != right_dtype {
        return Err(OpError::TypeMismatch(primitive.name.clone(), left_dtype, right_dtype));
    }

    if args[0].is_scalar() && args[1].is_scalar() {
        return Ok(Abstract::scalar(left_dtype));
    }

    let shape = broadcast_shapes(primitive, &left_shape, &right_shape)?;
    Ok(Abstract::tensor(left_dtype, shape))
}

pub fn shape(primitive: &Primitive, args: &[Abstract]) -> OpResult<Abstract> {
    check_arg_count(primitive, args, 1)?;
    let (_, shape) = tensor_arg(primitive, args, 0)?;

    match shape {
        Shape::Ranked(dims) => {
            let elements = dims
                .iter()
                .map(|d| match *d {
                    Dim::Known(v) => Abstract::scalar_const(DConst::I(DSize::S64, v as i64)),
                    Dim::Unknown => Abstract::scalar(DType::I64),
                })
                .collect_vec();
            Ok(Abstract::tuple(elements))
        }
        Shape::UnknownRank => Ok(Abstract::tensor(DType::I64, Shape::unknown_dims(1))),
    }
}

pub fn tuple_get_item(primitive: &Primitive, args: &[Abstract]) -> OpResult<Abstract> {
    check_arg_count(primitive, args, 2)?;
    let elements = args[0].elements().unwrap_arg(&primitive.name, 0, "sequence")?;
    let index = args[1]
        .scalar_value()
        .and_then(DConst::as_i64)
        .unwrap_arg(&primitive.name, 1, "constant integer index")?;

    usize::try_from(index)
        .ok()
        .and_then(|i| elements.get(i))
        .cloned()
        .ok_or_else(|| OpError::IndexOutOfRange(primitive.name.clone(), index, elements.len()))
}

pub fn make_tuple(_: &Primitive, args: &[Abstract]) -> OpResult<Abstract> {
    Ok(Abstract::tuple(args.to_vec()))
}

pub fn split(primitive: &Primitive, args: &[Abstract]) -> OpResult<Abstract> {
    check_arg_count(primitive, args, 1)?;
    let (dtype, shape) = tensor_arg(primitive, args, 0)?;
    let axis = primitive
        .attr_int(attrs::AXIS)
        .ok_or_else(|| OpError::MissingAttribute(primitive.name.clone(), attrs::AXIS))?;
    let count = primitive
        .attr_int(attrs::OUTPUT_NUM)
        .ok_or_else(|| OpError::MissingAttribute(primitive.name.clone(), attrs::OUTPUT_NUM))?;
    if count <= 0 {
        return Err(OpError::InvalidArg(
            primitive.name.clone(),
            0,
            format!("positive output_num, got {}", count),
        ));
    }
    let count = count as usize;

    let dims = match shape {
        Shape::Ranked(dims) => dims,
        Shape::UnknownRank => {
            let element = Abstract::tensor(dtype, Shape::UnknownRank);
            return Ok(Abstract::tuple(vec![element; count]));
        }
    };

    let rank = dims.len() as i64;
    if axis < -rank || axis >= rank {
        return Err(OpError::IndexOutOfRange(primitive.name.clone(), axis, dims.len()));
    }
    let axis = (if axis < 0 { axis + rank } else { axis }) as usize;

    let mut result_dims = dims.clone();
    result_dims[axis] = match dims[axis] {
        Dim::Known(size) if size % count == 0 => Dim::Known(size / count),
        Dim::Known(_) => {
            return Err(OpError::InvalidArg(
                primitive.name.clone(),
                0,
                format!("axis {} divisible by {}", axis, count),
            ))
        }
        Dim::Unknown => Dim::Unknown,
    };

    let element = Abstract::tensor(dtype, Shape::Ranked(result_dims));
    Ok(Abstract::tuple(vec![element; count]))
}

pub fn fill(primitive: &Primitive, args: &[Abstract]) -> OpResult<Abstract> {
    check_arg_count(primitive, args, 2)?;
    let shape = shape_from_values(primitive, 0, shape_values(&args[0]))?;
    let dtype = args[1].dtype().unwrap_arg(&primitive.name, 1, "scalar fill value")?;
    Ok(Abstract::tensor(dtype, shape))
}

pub fn scalar_add(primitive: &Primitive, args: &[Abstract]) -> OpResult<Abstract> {
    check_arg_count(primitive, args, 2)?;
    let (left_dtype, right_dtype) = match (&args[0].kind, &args[1].kind) {
        (AbstractKind::Scalar { dtype: left, .. }, AbstractKind::Scalar { dtype: right, .. }) => (*left, *right),
        _ => return Err(OpError::InvalidArg(primitive.name.clone(), 0, "two scalars".to_owned())),
    };
    if left_dtype != right_dtype {
        return Err(OpError::TypeMismatch(primitive.name.clone(), left_dtype, right_dtype));
    }

    let value = match (args[0].scalar_value(), args[1].scalar_value()) {
        (Some(DConst::I(size, l)), Some(DConst::I(_, r))) => Some(DConst::I(size, wrap_signed(size, l.wrapping_add(r)))),
        (Some(DConst::U(size, l)), Some(DConst::U(_, r))) => {
            Some(DConst::U(size, wrap_unsigned(size, l.wrapping_add(r))))
        }
        (Some(DConst::F32(l)), Some(DConst::F32(r))) => Some(DConst::f32(l.into_inner() + r.into_inner())),
        (Some(DConst::F64(l)), Some(DConst::F64(r))) => Some(DConst::f64(l.into_inner() + r.into_inner())),
        _ => None,
    };

    Ok(match value {
        Some(value) => Abstract::scalar_const(value),
        None => Abstract::scalar(left_dtype),
    })
}

fn wrap_signed(size: DSize, value: i64) -> i64 {
    match size {
        DSize::S8 => value as i8 as i64,
        DSize::S16 => value as i16 as i64,
        DSize::S32 => value as i32 as i64,
        DSize::S64 => value,
    }
}

fn wrap_unsigned(size: DSize, value: u64) -> u64 {
    match size {
        DSize::S8 => value as u8 as u64,
        DSize::S16 => value as u16 as u64,
        DSize::S32 => value as u32 as u64,
        DSize::S64 => value,
    }
}

/// Broadcast the shapes of all inputs and return the result as a tuple of integers.
///
/// For the positions listed in the `value_depend` attribute the input's value is used as the shape,
/// for the other positions the input's own shape.
pub fn shape_calc(primitive: &Primitive, args: &[Abstract]) -> OpResult<Abstract> {
    if args.is_empty() {
        return Err(OpError::WrongArgCount(primitive.name.clone(), 1, 0));
    }
    let depend = primitive.attr_ints(attrs::VALUE_DEPEND).unwrap_or(&[]);

    let mut result = Shape::SCALAR;
    for (i, arg) in args.iter().enumerate() {
        let shape = if depend.contains(&(i as i64)) {
            shape_from_values(primitive, i, shape_values(arg))?
        } else {
            arg.build_shape()
        };
        result = broadcast_shapes(primitive, &result, &shape)?;
    }

    let dims = match result {
        Shape::Ranked(dims) => dims,
        Shape::UnknownRank => return Ok(Abstract::tensor(DType::I64, Shape::unknown_dims(1))),
    };

    let elements = dims
        .iter()
        .map(|d| match d.value() {
            Some(v) => Abstract::scalar_const(DConst::I(DSize::S64, v as i64)),
            None => Abstract::scalar(DType::I64),
        })
        .collect_vec();
    Ok(Abstract::tuple(elements))
}

/// Without an interpreter the result of a host expression can't be known,
/// this placeholder is what pure inference yields.
pub fn host_execute(primitive: &Primitive, _: &[Abstract]) -> OpResult<Abstract> {
    debug_assert!(primitive.is(names::HOST_EXECUTE));
    Ok(Abstract::tensor(DType::F32, Shape::fixed(&[1])))
}
