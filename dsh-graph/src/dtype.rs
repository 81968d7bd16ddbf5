use std::fmt::{Display, Formatter};

use bytemuck::{cast_slice, cast_slice_mut, Pod};
use decorum::Total;
use itertools::Itertools;
use ndarray::{ArcArray, IxDyn};
use num_traits::ToPrimitive;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DType {
    F32,
    F64,
    I(DSize),
    U(DSize),
    Bool,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DSize {
    S8,
    S16,
    S32,
    S64,
}

/// A single scalar value, tagged with its dtype.
///
/// Floats are wrapped in [Total] so constants can be compared and hashed exactly,
/// including `NaN` values.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DConst {
    F32(Total<f32>),
    F64(Total<f64>),
    I(DSize, i64),
    U(DSize, u64),
    Bool(bool),
}

/// Wrapper type for `bool` so host tensors can have a dedicated element type.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DBool(pub bool);

/// We're using an ArcArray so reshaping and cloning are cheap.
pub type Tensor<T> = ArcArray<T, IxDyn>;

/// A host-resident tensor of any supported dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum DTensor {
    F32(Tensor<f32>),
    F64(Tensor<f64>),
    I8(Tensor<i8>),
    I16(Tensor<i16>),
    I32(Tensor<i32>),
    I64(Tensor<i64>),
    U8(Tensor<u8>),
    U16(Tensor<u16>),
    U32(Tensor<u32>),
    U64(Tensor<u64>),
    Bool(Tensor<DBool>),
}

/// Match on a [DTensor], binding the element type as `$ty`,
/// the variant constructor as `$f` and the inner tensor as `$inner`.
#[macro_export]
macro_rules! dispatch_dtensor {
    ($outer:expr, |$ty:ident, $f:ident, $inner:ident| $expr:expr) => {{
        use $crate::dtype::DTensor;
        match $outer {
            DTensor::F32($inner) => {
                #[allow(dead_code)]
                type $ty = f32;
                #[allow(unused_variables)]
                let $f = DTensor::F32;
                $expr
            }
            DTensor::F64($inner) => {
                #[allow(dead_code)]
                type $ty = f64;
                #[allow(unused_variables)]
                let $f = DTensor::F64;
                $expr
            }
            DTensor::I8($inner) => {
                #[allow(dead_code)]
                type $ty = i8;
                #[allow(unused_variables)]
                let $f = DTensor::I8;
                $expr
            }
            DTensor::I16($inner) => {
                #[allow(dead_code)]
                type $ty = i16;
                #[allow(unused_variables)]
                let $f = DTensor::I16;
                $expr
            }
            DTensor::I32($inner) => {
                #[allow(dead_code)]
                type $ty = i32;
                #[allow(unused_variables)]
                let $f = DTensor::I32;
                $expr
            }
            DTensor::I64($inner) => {
                #[allow(dead_code)]
                type $ty = i64;
                #[allow(unused_variables)]
                let $f = DTensor::I64;
                $expr
            }
            DTensor::U8($inner) => {
                #[allow(dead_code)]
                type $ty = u8;
                #[allow(unused_variables)]
                let $f = DTensor::U8;
                $expr
            }
            DTensor::U16($inner) => {
                #[allow(dead_code)]
                type $ty = u16;
                #[allow(unused_variables)]
                let $f = DTensor::U16;
                $expr
            }
            DTensor::U32($inner) => {
                #[allow(dead_code)]
                type $ty = u32;
                #[allow(unused_variables)]
                let $f = DTensor::U32;
                $expr
            }
            DTensor::U64($inner) => {
                #[allow(dead_code)]
                type $ty = u64;
                #[allow(unused_variables)]
                let $f = DTensor::U64;
                $expr
            }
            DTensor::Bool($inner) => {
                #[allow(dead_code)]
                type $ty = $crate::dtype::DBool;
                #[allow(unused_variables)]
                let $f = DTensor::Bool;
                $expr
            }
        }
    }};
}

/// Match on a [DType], binding the element type as `$ty` and the matching [DTensor] constructor as `$ft`.
#[macro_export]
macro_rules! dispatch_dtype {
    ($outer:expr, |$ty:ident, $ft:ident| $expr:expr) => {{
        use $crate::dtype::{DSize, DTensor, DType};
        match $outer {
            DType::F32 => {
                type $ty = f32;
                let $ft = DTensor::F32;
                $expr
            }
            DType::F64 => {
                type $ty = f64;
                let $ft = DTensor::F64;
                $expr
            }
            DType::I(DSize::S8) => {
                type $ty = i8;
                let $ft = DTensor::I8;
                $expr
            }
            DType::I(DSize::S16) => {
                type $ty = i16;
                let $ft = DTensor::I16;
                $expr
            }
            DType::I(DSize::S32) => {
                type $ty = i32;
                let $ft = DTensor::I32;
                $expr
            }
            DType::I(DSize::S64) => {
                type $ty = i64;
                let $ft = DTensor::I64;
                $expr
            }
            DType::U(DSize::S8) => {
                type $ty = u8;
                let $ft = DTensor::U8;
                $expr
            }
            DType::U(DSize::S16) => {
                type $ty = u16;
                let $ft = DTensor::U16;
                $expr
            }
            DType::U(DSize::S32) => {
                type $ty = u32;
                let $ft = DTensor::U32;
                $expr
            }
            DType::U(DSize::S64) => {
                type $ty = u64;
                let $ft = DTensor::U64;
                $expr
            }
            DType::Bool => {
                type $ty = $crate::dtype::DBool;
                let $ft = DTensor::Bool;
                $expr
            }
        }
    }};
}

impl DType {
    pub const I32: DType = DType::I(DSize::S32);
    pub const I64: DType = DType::I(DSize::S64);

    pub fn size(self) -> DSize {
        match self {
            DType::F32 => DSize::S32,
            DType::F64 => DSize::S64,
            DType::I(size) => size,
            DType::U(size) => size,
            DType::Bool => DSize::S8,
        }
    }

    pub fn is_signed(self) -> bool {
        match self {
            DType::F32 | DType::F64 => true,
            DType::I(_) => true,
            DType::U(_) | DType::Bool => false,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    pub fn is_int(self) -> bool {
        matches!(self, DType::I(_) | DType::U(_))
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::I(DSize::S8) => "int8",
            DType::I(DSize::S16) => "int16",
            DType::I(DSize::S32) => "int32",
            DType::I(DSize::S64) => "int64",
            DType::U(DSize::S8) => "uint8",
            DType::U(DSize::S16) => "uint16",
            DType::U(DSize::S32) => "uint32",
            DType::U(DSize::S64) => "uint64",
            DType::Bool => "bool",
        }
    }
}

impl Display for DType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl DSize {
    pub fn bytes(self) -> usize {
        match self {
            DSize::S8 => 1,
            DSize::S16 => 2,
            DSize::S32 => 4,
            DSize::S64 => 8,
        }
    }
}

impl DConst {
    pub fn f32(x: f32) -> Self {
        DConst::F32(Total::from_inner(x))
    }

    pub fn f64(x: f64) -> Self {
        DConst::F64(Total::from_inner(x))
    }

    pub fn dtype(self) -> DType {
        match self {
            DConst::F32(_) => DType::F32,
            DConst::F64(_) => DType::F64,
            DConst::I(size, _) => DType::I(size),
            DConst::U(size, _) => DType::U(size),
            DConst::Bool(_) => DType::Bool,
        }
    }

    pub fn to_bytes(self) -> Vec<u8> {
        match self {
            DConst::F32(x) => x.into_inner().to_le_bytes().to_vec(),
            DConst::F64(x) => x.into_inner().to_le_bytes().to_vec(),
            DConst::I(size, x) => x.to_le_bytes()[..size.bytes()].to_vec(),
            DConst::U(size, x) => x.to_le_bytes()[..size.bytes()].to_vec(),
            DConst::Bool(x) => vec![x as u8],
        }
    }

    /// The value as an integer, only for integer constants.
    pub fn as_i64(self) -> Option<i64> {
        match self {
            DConst::I(_, x) => Some(x),
            DConst::U(_, x) => x.to_i64(),
            DConst::F32(_) | DConst::F64(_) | DConst::Bool(_) => None,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            DConst::F32(x) => x.into_inner() as f64,
            DConst::F64(x) => x.into_inner(),
            DConst::I(_, x) => x as f64,
            DConst::U(_, x) => x as f64,
            DConst::Bool(x) => x as u8 as f64,
        }
    }

    pub fn unwrap_f32(self) -> Option<f32> {
        match self {
            DConst::F32(x) => Some(x.into_inner()),
            _ => None,
        }
    }
}

impl Display for DConst {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            DConst::F32(x) => write!(f, "{}", x.into_inner()),
            DConst::F64(x) => write!(f, "{}", x.into_inner()),
            DConst::I(_, x) => write!(f, "{}", x),
            DConst::U(_, x) => write!(f, "{}", x),
            DConst::Bool(x) => write!(f, "{}", x),
        }
    }
}

/// Element types that can be stored in a [DTensor].
pub trait DElement: Copy + Default + 'static {
    const DTYPE: DType;
    fn to_dconst(&self) -> DConst;
    fn wrap(tensor: Tensor<Self>) -> DTensor;
}

macro_rules! impl_delement {
    ($ty:ty, $dtype:expr, $variant:ident, |$x:ident| $conv:expr) => {
        impl DElement for $ty {
            const DTYPE: DType = $dtype;

            fn to_dconst(&self) -> DConst {
                let &$x = self;
                $conv
            }

            fn wrap(tensor: Tensor<Self>) -> DTensor {
                DTensor::$variant(tensor)
            }
        }
    };
}

impl_delement!(f32, DType::F32, F32, |x| DConst::f32(x));
impl_delement!(f64, DType::F64, F64, |x| DConst::f64(x));
impl_delement!(i8, DType::I(DSize::S8), I8, |x| DConst::I(DSize::S8, x as i64));
impl_delement!(i16, DType::I(DSize::S16), I16, |x| DConst::I(DSize::S16, x as i64));
impl_delement!(i32, DType::I(DSize::S32), I32, |x| DConst::I(DSize::S32, x as i64));
impl_delement!(i64, DType::I(DSize::S64), I64, |x| DConst::I(DSize::S64, x));
impl_delement!(u8, DType::U(DSize::S8), U8, |x| DConst::U(DSize::S8, x as u64));
impl_delement!(u16, DType::U(DSize::S16), U16, |x| DConst::U(DSize::S16, x as u64));
impl_delement!(u32, DType::U(DSize::S32), U32, |x| DConst::U(DSize::S32, x as u64));
impl_delement!(u64, DType::U(DSize::S64), U64, |x| DConst::U(DSize::S64, x));
impl_delement!(DBool, DType::Bool, Bool, |x| DConst::Bool(x.0));

impl DTensor {
    /// Build a tensor with the given shape, filled with default values (zero/false).
    pub fn zeros(dtype: DType, shape: &[usize]) -> DTensor {
        dispatch_dtype!(dtype, |T, ft| ft(Tensor::from_elem(IxDyn(shape), T::default())))
    }

    pub fn from_vec<T: DElement>(shape: &[usize], data: Vec<T>) -> DTensor {
        let expected: usize = shape.iter().product();
        assert_eq!(
            expected,
            data.len(),
            "Shape {:?} has size {}, but got data with size {}",
            shape,
            expected,
            data.len()
        );
        // the length was checked above
        let tensor = Tensor::from_shape_vec(IxDyn(shape), data).unwrap();
        T::wrap(tensor)
    }

    pub fn scalar<T: DElement>(value: T) -> DTensor {
        DTensor::from_vec(&[1], vec![value])
    }

    pub fn dtype(&self) -> DType {
        match self {
            DTensor::F32(_) => DType::F32,
            DTensor::F64(_) => DType::F64,
            DTensor::I8(_) => DType::I(DSize::S8),
            DTensor::I16(_) => DType::I(DSize::S16),
            DTensor::I32(_) => DType::I(DSize::S32),
            DTensor::I64(_) => DType::I(DSize::S64),
            DTensor::U8(_) => DType::U(DSize::S8),
            DTensor::U16(_) => DType::U(DSize::S16),
            DTensor::U32(_) => DType::U(DSize::S32),
            DTensor::U64(_) => DType::U(DSize::S64),
            DTensor::Bool(_) => DType::Bool,
        }
    }

    pub fn shape(&self) -> &[usize] {
        dispatch_dtensor!(self, |_T, _f, inner| inner.shape())
    }

    pub fn len(&self) -> usize {
        dispatch_dtensor!(self, |_T, _f, inner| inner.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> usize {
        self.len() * self.dtype().size().bytes()
    }

    /// All elements in logical order as scalar constants.
    pub fn to_dconsts(&self) -> Vec<DConst> {
        dispatch_dtensor!(self, |_T, _f, inner| inner.iter().map(|x| x.to_dconst()).collect_vec())
    }

    pub fn first_dconst(&self) -> Option<DConst> {
        dispatch_dtensor!(self, |_T, _f, inner| inner.iter().next().map(|x| x.to_dconst()))
    }

    /// The contents as little-endian bytes, in standard layout.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        fn branch<T: Pod>(tensor: &Tensor<T>) -> Vec<u8> {
            let standard = tensor.as_standard_layout();
            // standard layout tensors are always contiguous
            cast_slice::<T, u8>(standard.as_slice().unwrap()).to_vec()
        }

        match self {
            DTensor::F32(tensor) => branch(tensor),
            DTensor::F64(tensor) => branch(tensor),
            DTensor::I8(tensor) => branch(tensor),
            DTensor::I16(tensor) => branch(tensor),
            DTensor::I32(tensor) => branch(tensor),
            DTensor::I64(tensor) => branch(tensor),
            DTensor::U8(tensor) => branch(tensor),
            DTensor::U16(tensor) => branch(tensor),
            DTensor::U32(tensor) => branch(tensor),
            DTensor::U64(tensor) => branch(tensor),
            DTensor::Bool(tensor) => tensor.iter().map(|x| x.0 as u8).collect_vec(),
        }
    }

    /// Overwrite the contents of this tensor with the given little-endian bytes.
    pub fn copy_from_le_bytes(&mut self, bytes: &[u8]) {
        assert_eq!(
            self.size_bytes(),
            bytes.len(),
            "Wrong buffer size {} for tensor with dtype {} and shape {:?}",
            bytes.len(),
            self.dtype(),
            self.shape()
        );

        fn branch<T: Pod>(tensor: &mut Tensor<T>, bytes: &[u8]) {
            if !tensor.is_standard_layout() {
                *tensor = tensor.as_standard_layout().into_owned().into_shared();
            }
            let slice = tensor.as_slice_mut().unwrap();
            cast_slice_mut::<T, u8>(slice).copy_from_slice(bytes);
        }

        match self {
            DTensor::F32(tensor) => branch(tensor, bytes),
            DTensor::F64(tensor) => branch(tensor, bytes),
            DTensor::I8(tensor) => branch(tensor, bytes),
            DTensor::I16(tensor) => branch(tensor, bytes),
            DTensor::I32(tensor) => branch(tensor, bytes),
            DTensor::I64(tensor) => branch(tensor, bytes),
            DTensor::U8(tensor) => branch(tensor, bytes),
            DTensor::U16(tensor) => branch(tensor, bytes),
            DTensor::U32(tensor) => branch(tensor, bytes),
            DTensor::U64(tensor) => branch(tensor, bytes),

            // do a manual copy, with proper error checking
            // we can't use bytemuck here since it rightfully doesn't want to cast &mut DBool to &mut u8
            DTensor::Bool(tensor) => {
                let mut fail = false;
                for (x, &y) in tensor.iter_mut().zip(bytes) {
                    *x = DBool(y != 0);
                    fail |= y > 1;
                }
                assert!(!fail, "Invalid bool byte in buffer");
            }
        }
    }
}
