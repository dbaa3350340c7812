//! Numeric backend adapter: evaluates one foldable node on concrete tensors.

use thiserror::Error;

use super::slice;
use crate::ir::{Attribute, AttributeKind, Node, NodeKind};
use crate::tensor::{DType, Tensor, TensorError};

/// Why a node with constant inputs was left in the graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("{0} nodes are not evaluated by the folder")]
    UnhandledKind(NodeKind),
    #[error("nodes with {0} outputs are not folded")]
    OutputCount(usize),
    #[error("expected {kind:?} attribute `{name}`")]
    MissingAttribute {
        name: &'static str,
        kind: AttributeKind,
    },
    #[error("expected {expected} input(s), found {found}")]
    Arity { expected: &'static str, found: usize },
    #[error("unsupported cast target type code {0}")]
    UnknownCastTarget(i64),
    #[error("Slice is not folded for opset {0}")]
    UnsupportedOpset(i64),
    #[error("slice {0} must be a rank-1 integer tensor")]
    SliceOperand(&'static str),
    #[error("slice starts, ends, axes and steps must have equal lengths")]
    SliceLengthMismatch,
    #[error("slice step {0} is not folded; only unit steps are")]
    NonUnitStep(i64),
    #[error("slice [{start}, {end}) is out of range for a dimension of size {size}")]
    SliceOutOfRange { start: i64, end: i64, size: usize },
    #[error(transparent)]
    Numeric(#[from] TensorError),
}

/// Result of asking the backend to evaluate a node.
#[derive(Debug, Clone, PartialEq)]
pub enum FoldOutcome {
    Folded(Tensor),
    Unsupported(Rejection),
}

/// Evaluates `node` on `inputs` (one tensor per node input, in order).
pub fn evaluate(node: &Node, inputs: &[&Tensor], opset_version: i64) -> FoldOutcome {
    match try_evaluate(node, inputs, opset_version) {
        Ok(tensor) => FoldOutcome::Folded(tensor),
        Err(rejection) => FoldOutcome::Unsupported(rejection),
    }
}

fn try_evaluate(node: &Node, inputs: &[&Tensor], opset_version: i64) -> Result<Tensor, Rejection> {
    if node.outputs().len() != 1 {
        return Err(Rejection::OutputCount(node.outputs().len()));
    }
    match node.kind() {
        NodeKind::Slice => match opset_version {
            9 => slice::slice_opset9(node, inputs),
            10 => slice::slice_opset10(inputs),
            other => Err(Rejection::UnsupportedOpset(other)),
        },
        NodeKind::Concat => {
            let axis = required_int(node, "axis")?;
            Ok(Tensor::cat(inputs, axis)?)
        }
        NodeKind::Unsqueeze => {
            let input = single_input(inputs)?;
            let axes = required_ints(node, "axes")?;
            let mut output = input.clone();
            for &axis in axes {
                output = output.unsqueeze(axis)?;
            }
            Ok(output)
        }
        NodeKind::Transpose => {
            let input = single_input(inputs)?;
            let perm = required_ints(node, "perm")?;
            Ok(input.permute(perm)?)
        }
        NodeKind::Cast => {
            let input = single_input(inputs)?;
            let code = required_int(node, "to")?;
            let dtype = DType::from_onnx_code(code).ok_or(Rejection::UnknownCastTarget(code))?;
            Ok(input.to_dtype(dtype))
        }
        other => Err(Rejection::UnhandledKind(other.clone())),
    }
}

pub(super) fn single_input<'a>(inputs: &[&'a Tensor]) -> Result<&'a Tensor, Rejection> {
    match inputs {
        [input] => Ok(*input),
        _ => Err(Rejection::Arity {
            expected: "1",
            found: inputs.len(),
        }),
    }
}

pub(super) fn required_int(node: &Node, name: &'static str) -> Result<i64, Rejection> {
    node.i(name).ok_or(Rejection::MissingAttribute {
        name,
        kind: AttributeKind::Int,
    })
}

pub(super) fn required_ints<'a>(node: &'a Node, name: &'static str) -> Result<&'a [i64], Rejection> {
    node.is(name).ok_or(Rejection::MissingAttribute {
        name,
        kind: AttributeKind::Ints,
    })
}

/// Int-list attribute that may be absent; present with another kind is an error.
pub(super) fn optional_ints<'a>(
    node: &'a Node,
    name: &'static str,
) -> Result<Option<&'a [i64]>, Rejection> {
    match node.attr(name) {
        None => Ok(None),
        Some(Attribute::Ints(values)) => Ok(Some(values)),
        Some(_) => Err(Rejection::MissingAttribute {
            name,
            kind: AttributeKind::Ints,
        }),
    }
}
