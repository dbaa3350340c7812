//! Dense host tensors used for parameters, embedded literals and folded results.

mod dtype;
mod host_tensor;

pub use dtype::DType;
pub use host_tensor::{Element, Tensor};
pub(crate) use host_tensor::with_element_type;

use thiserror::Error;

/// Failures raised by the tensor operations the folding pass evaluates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensorError {
    #[error("dimension {dim} is out of range for a tensor of rank {rank}")]
    AxisOutOfRange { dim: i64, rank: usize },
    #[error("narrow of length {length} starting at {start} exceeds dimension size {size}")]
    NarrowOutOfRange { start: i64, length: i64, size: usize },
    #[error("invalid permutation {perm:?} for a tensor of rank {rank}")]
    InvalidPermutation { perm: Vec<i64>, rank: usize },
    #[error("expected dtype {expected}, found {found}")]
    DTypeMismatch { expected: DType, found: DType },
    #[error("expected an integer tensor, found {0}")]
    NotInteger(DType),
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("tensor data length ({found}) does not match shape {shape:?}")]
    DataLength { shape: Vec<usize>, found: usize },
    #[error("value {value} does not fit in {dtype}")]
    ValueOutOfRange { value: String, dtype: DType },
    #[error("cannot concatenate an empty tensor list")]
    EmptyConcat,
}

/// Resolves a possibly negative dimension index against `rank`.
pub fn wrap_dim(dim: i64, rank: usize) -> Result<usize, TensorError> {
    let rank_i = rank as i64;
    let wrapped = if dim < 0 { dim + rank_i } else { dim };
    if wrapped < 0 || wrapped >= rank_i {
        return Err(TensorError::AxisOutOfRange { dim, rank });
    }
    Ok(wrapped as usize)
}
