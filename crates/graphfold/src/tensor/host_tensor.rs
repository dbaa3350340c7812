//! Host-backed tensor used for parameters, literals and folded results.

use std::fmt;
use std::str::FromStr;

use ndarray::{ArrayD, Axis, IxDyn, Slice};
use num_traits::{AsPrimitive, NumCast};
use serde::{Deserialize, Serialize};

use super::{wrap_dim, DType, TensorError};

/// Dense n-dimensional tensor tagged with its element type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TensorRepr", into = "TensorRepr")]
pub enum Tensor {
    U8(ArrayD<u8>),
    I8(ArrayD<i8>),
    I16(ArrayD<i16>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

/// Scalar types that can back a [`Tensor`].
pub trait Element:
    Copy + Default + PartialEq + fmt::Debug + FromStr + NumCast + Send + Sync + 'static
{
    const DTYPE: DType;

    fn wrap(array: ArrayD<Self>) -> Tensor;

    fn view(tensor: &Tensor) -> Option<&ArrayD<Self>>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const DTYPE: DType = DType::$variant;

            fn wrap(array: ArrayD<Self>) -> Tensor {
                Tensor::$variant(array)
            }

            fn view(tensor: &Tensor) -> Option<&ArrayD<Self>> {
                match tensor {
                    Tensor::$variant(array) => Some(array),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(u8, U8);
impl_element!(i8, I8);
impl_element!(i16, I16);
impl_element!(i32, I32);
impl_element!(i64, I64);
impl_element!(f32, F32);
impl_element!(f64, F64);

/// Evaluates `$body` with `$array` bound to the inner array, whatever the dtype.
macro_rules! for_each_variant {
    ($tensor:expr, $array:ident => $body:expr) => {
        match $tensor {
            Tensor::U8($array) => $body,
            Tensor::I8($array) => $body,
            Tensor::I16($array) => $body,
            Tensor::I32($array) => $body,
            Tensor::I64($array) => $body,
            Tensor::F32($array) => $body,
            Tensor::F64($array) => $body,
        }
    };
}

/// Like `for_each_variant!`, re-wrapping the result in the same variant.
macro_rules! map_variant {
    ($tensor:expr, $array:ident => $body:expr) => {
        match $tensor {
            Tensor::U8($array) => Tensor::U8($body),
            Tensor::I8($array) => Tensor::I8($body),
            Tensor::I16($array) => Tensor::I16($body),
            Tensor::I32($array) => Tensor::I32($body),
            Tensor::I64($array) => Tensor::I64($body),
            Tensor::F32($array) => Tensor::F32($body),
            Tensor::F64($array) => Tensor::F64($body),
        }
    };
}

/// Evaluates `$body` with `$ty` aliased to the Rust scalar type of `$dtype`.
macro_rules! with_element_type {
    ($dtype:expr, $ty:ident => $body:expr) => {
        match $dtype {
            DType::U8 => {
                type $ty = u8;
                $body
            }
            DType::I8 => {
                type $ty = i8;
                $body
            }
            DType::I16 => {
                type $ty = i16;
                $body
            }
            DType::I32 => {
                type $ty = i32;
                $body
            }
            DType::I64 => {
                type $ty = i64;
                $body
            }
            DType::F32 => {
                type $ty = f32;
                $body
            }
            DType::F64 => {
                type $ty = f64;
                $body
            }
        }
    };
}

pub(crate) use with_element_type;

impl Tensor {
    /// Builds a tensor from row-major data, validating the length against the shape.
    pub fn from_vec<T: Element>(shape: &[usize], data: Vec<T>) -> Result<Self, TensorError> {
        let found = data.len();
        let array =
            ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|_| TensorError::DataLength {
                shape: shape.to_vec(),
                found,
            })?;
        Ok(T::wrap(array))
    }

    pub fn from_array<T: Element>(array: ArrayD<T>) -> Self {
        T::wrap(array)
    }

    /// Rank-0 tensor holding a single value.
    pub fn scalar<T: Element>(value: T) -> Self {
        T::wrap(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// Rank-1 tensor over `data`.
    pub fn vector<T: Element>(data: Vec<T>) -> Self {
        let len = data.len();
        T::wrap(ArrayD::from_shape_vec(IxDyn(&[len]), data).expect("1-D shape matches length"))
    }

    pub fn zeros(dtype: DType, shape: &[usize]) -> Self {
        with_element_type!(dtype, T => T::wrap(ArrayD::<T>::default(IxDyn(shape))))
    }

    pub fn dtype(&self) -> DType {
        match self {
            Tensor::U8(_) => DType::U8,
            Tensor::I8(_) => DType::I8,
            Tensor::I16(_) => DType::I16,
            Tensor::I32(_) => DType::I32,
            Tensor::I64(_) => DType::I64,
            Tensor::F32(_) => DType::F32,
            Tensor::F64(_) => DType::F64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        for_each_variant!(self, array => array.shape())
    }

    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        for_each_variant!(self, array => array.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_array<T: Element>(&self) -> Option<&ArrayD<T>> {
        T::view(self)
    }

    /// Copies the elements out in logical (row-major) order.
    pub fn to_vec<T: Element>(&self) -> Option<Vec<T>> {
        T::view(self).map(|array| array.iter().copied().collect())
    }

    /// Reads an integer tensor as `i64` values in logical order.
    pub fn to_i64_vec(&self) -> Result<Vec<i64>, TensorError> {
        if self.dtype().is_float() {
            return Err(TensorError::NotInteger(self.dtype()));
        }
        Ok(for_each_variant!(self, array => array
            .iter()
            .map(|&value| AsPrimitive::<i64>::as_(value))
            .collect()))
    }

    /// Selects `length` entries of dimension `dim` starting at `start`.
    ///
    /// A negative `start` counts from the end of the dimension.
    pub fn narrow(&self, dim: i64, start: i64, length: i64) -> Result<Tensor, TensorError> {
        let axis = wrap_dim(dim, self.rank())?;
        let size = self.shape()[axis];
        let start = if start < 0 { start + size as i64 } else { start };
        if start < 0 || length < 0 || start + length > size as i64 {
            return Err(TensorError::NarrowOutOfRange {
                start,
                length,
                size,
            });
        }
        let (start, end) = (start as usize, (start + length) as usize);
        Ok(map_variant!(self, array => array
            .slice_axis(Axis(axis), Slice::from(start..end))
            .to_owned()))
    }

    /// Concatenates tensors of one dtype along `dim`.
    pub fn cat(tensors: &[&Tensor], dim: i64) -> Result<Tensor, TensorError> {
        let first = tensors.first().ok_or(TensorError::EmptyConcat)?;
        let axis = wrap_dim(dim, first.rank())?;
        for tensor in &tensors[1..] {
            if tensor.dtype() != first.dtype() {
                return Err(TensorError::DTypeMismatch {
                    expected: first.dtype(),
                    found: tensor.dtype(),
                });
            }
            let compatible = tensor.rank() == first.rank()
                && tensor
                    .shape()
                    .iter()
                    .zip(first.shape())
                    .enumerate()
                    .all(|(idx, (lhs, rhs))| idx == axis || lhs == rhs);
            if !compatible {
                return Err(TensorError::ShapeMismatch(format!(
                    "cannot concatenate {:?} with {:?} along dimension {axis}",
                    first.shape(),
                    tensor.shape()
                )));
            }
        }
        with_element_type!(first.dtype(), T => concat_arrays::<T>(tensors, axis).map(T::wrap))
    }

    /// Inserts a dimension of size one at `dim` (negative values count from the new rank).
    pub fn unsqueeze(&self, dim: i64) -> Result<Tensor, TensorError> {
        let axis = wrap_dim(dim, self.rank() + 1)?;
        Ok(map_variant!(self, array => array.clone().insert_axis(Axis(axis))))
    }

    /// Reorders dimensions so that output dimension `i` is input dimension `dims[i]`.
    pub fn permute(&self, dims: &[i64]) -> Result<Tensor, TensorError> {
        let rank = self.rank();
        let invalid = || TensorError::InvalidPermutation {
            perm: dims.to_vec(),
            rank,
        };
        if dims.len() != rank {
            return Err(invalid());
        }
        let mut seen = vec![false; rank];
        let mut axes = Vec::with_capacity(rank);
        for &dim in dims {
            let axis = wrap_dim(dim, rank).map_err(|_| invalid())?;
            if std::mem::replace(&mut seen[axis], true) {
                return Err(invalid());
            }
            axes.push(axis);
        }
        Ok(map_variant!(self, array => array
            .clone()
            .permuted_axes(IxDyn(&axes))
            .as_standard_layout()
            .into_owned()))
    }

    /// Converts every element to `dtype` with `as`-cast semantics.
    pub fn to_dtype(&self, dtype: DType) -> Tensor {
        with_element_type!(dtype, T => T::wrap(for_each_variant!(self, array => cast_array::<_, T>(array))))
    }
}

fn concat_arrays<T: Element>(tensors: &[&Tensor], axis: usize) -> Result<ArrayD<T>, TensorError> {
    let views = tensors
        .iter()
        .map(|tensor| {
            T::view(tensor)
                .map(|array| array.view())
                .ok_or(TensorError::DTypeMismatch {
                    expected: T::DTYPE,
                    found: tensor.dtype(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    ndarray::concatenate(Axis(axis), &views)
        .map_err(|err| TensorError::ShapeMismatch(err.to_string()))
}

fn cast_array<S, T>(array: &ArrayD<S>) -> ArrayD<T>
where
    S: AsPrimitive<T>,
    T: Copy + 'static,
{
    array.mapv(|value| value.as_())
}

/// JSON form of a tensor: `{"dtype": "f32", "shape": [2], "data": [1.0, 2.0]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TensorRepr {
    dtype: DType,
    shape: Vec<usize>,
    data: TensorValues,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum TensorValues {
    Int(Vec<i64>),
    Float(Vec<f64>),
}

impl From<Tensor> for TensorRepr {
    fn from(tensor: Tensor) -> Self {
        let data = if tensor.dtype().is_float() {
            TensorValues::Float(for_each_variant!(&tensor, array => array
                .iter()
                .map(|&value| AsPrimitive::<f64>::as_(value))
                .collect()))
        } else {
            TensorValues::Int(for_each_variant!(&tensor, array => array
                .iter()
                .map(|&value| AsPrimitive::<i64>::as_(value))
                .collect()))
        };
        TensorRepr {
            dtype: tensor.dtype(),
            shape: tensor.shape().to_vec(),
            data,
        }
    }
}

impl TryFrom<TensorRepr> for Tensor {
    type Error = TensorError;

    fn try_from(repr: TensorRepr) -> Result<Self, Self::Error> {
        with_element_type!(repr.dtype, T => {
            let data = match &repr.data {
                TensorValues::Int(values) => convert_values::<i64, T>(values)?,
                TensorValues::Float(values) => convert_values::<f64, T>(values)?,
            };
            Tensor::from_vec::<T>(&repr.shape, data)
        })
    }
}

fn convert_values<S, T>(values: &[S]) -> Result<Vec<T>, TensorError>
where
    S: NumCast + Copy + fmt::Display,
    T: Element,
{
    values
        .iter()
        .map(|&value| {
            let converted: Option<T> = NumCast::from(value);
            converted.ok_or_else(|| TensorError::ValueOutOfRange {
                value: value.to_string(),
                dtype: T::DTYPE,
            })
        })
        .collect()
}
