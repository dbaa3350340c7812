//! Slice evaluation for opset 9 (attribute form) and opset 10 (operand form).

use super::evaluate::{optional_ints, required_ints, single_input, Rejection};
use crate::ir::Node;
use crate::tensor::{wrap_dim, Tensor};

/// Normalises one `[start, end)` window against a dimension of `size` entries.
///
/// Negative bounds count from the end and `end` is clamped to `size`. Returns `(start, length)`
/// ready for a narrow, or a rejection when the window is empty-inverted or out of range.
pub fn resolve_slice_bounds(start: i64, end: i64, size: usize) -> Result<(i64, i64), Rejection> {
    let size_i = size as i64;
    let start = if start < 0 { start + size_i } else { start };
    let end = if end < 0 { end + size_i } else { end }.min(size_i);
    if !(0..=size_i).contains(&start) || end < start {
        return Err(Rejection::SliceOutOfRange { start, end, size });
    }
    Ok((start, end - start))
}

pub(super) fn slice_opset9(node: &Node, inputs: &[&Tensor]) -> Result<Tensor, Rejection> {
    let input = single_input(inputs)?;
    let starts = required_ints(node, "starts")?;
    let ends = required_ints(node, "ends")?;
    if starts.len() != ends.len() {
        return Err(Rejection::SliceLengthMismatch);
    }
    let axes = match optional_ints(node, "axes")? {
        Some(axes) if axes.len() != starts.len() => return Err(Rejection::SliceLengthMismatch),
        Some(axes) => axes.to_vec(),
        None => default_axes(starts.len()),
    };
    apply_slices(input, starts, ends, &axes)
}

pub(super) fn slice_opset10(inputs: &[&Tensor]) -> Result<Tensor, Rejection> {
    if !(3..=5).contains(&inputs.len()) {
        return Err(Rejection::Arity {
            expected: "3 to 5",
            found: inputs.len(),
        });
    }
    let starts = index_operand(inputs[1], "starts")?;
    let ends = index_operand(inputs[2], "ends")?;
    if starts.len() != ends.len() {
        return Err(Rejection::SliceLengthMismatch);
    }
    let axes = match inputs.get(3) {
        Some(axes) => index_operand(axes, "axes")?,
        None => default_axes(starts.len()),
    };
    if axes.len() != starts.len() {
        return Err(Rejection::SliceLengthMismatch);
    }
    if let Some(steps) = inputs.get(4) {
        let steps = index_operand(steps, "steps")?;
        if steps.len() != starts.len() {
            return Err(Rejection::SliceLengthMismatch);
        }
        if let Some(&step) = steps.iter().find(|&&step| step != 1) {
            return Err(Rejection::NonUnitStep(step));
        }
    }
    apply_slices(inputs[0], &starts, &ends, &axes)
}

fn default_axes(count: usize) -> Vec<i64> {
    (0..count as i64).collect()
}

fn index_operand(tensor: &Tensor, name: &'static str) -> Result<Vec<i64>, Rejection> {
    if tensor.rank() != 1 {
        return Err(Rejection::SliceOperand(name));
    }
    tensor
        .to_i64_vec()
        .map_err(|_| Rejection::SliceOperand(name))
}

/// Narrows one axis at a time, in list order.
fn apply_slices(
    input: &Tensor,
    starts: &[i64],
    ends: &[i64],
    axes: &[i64],
) -> Result<Tensor, Rejection> {
    let mut current = input.clone();
    for ((&start, &end), &axis) in starts.iter().zip(ends).zip(axes) {
        let dim = wrap_dim(axis, current.rank())?;
        let (start, length) = resolve_slice_bounds(start, end, current.shape()[dim])?;
        current = current.narrow(dim as i64, start, length)?;
    }
    Ok(current)
}
