use super::Tensor;
use super::constant::{BATCH_DIM, SEQ_DIM};
use crate::error::TensorError;

/// Whether a slot carries a sequence dimension that may need alignment.
///
/// Slots of rank `1` hold one value per row and are concatenated as-is.
pub(crate) fn has_sequence_dim(tensor: &Tensor) -> bool {
    tensor.rank() > SEQ_DIM
}

/// Length of the sequence dimension, `0` for rank-1 tensors.
pub(crate) fn sequence_length(tensor: &Tensor) -> usize {
    if has_sequence_dim(tensor) {
        tensor.shape()[SEQ_DIM]
    } else {
        0
    }
}

/// Cut `len` rows starting at `start` out of the batch dimension.
pub(crate) fn slice_rows(tensor: &Tensor, start: usize, len: usize) -> Result<Tensor, TensorError> {
    tensor.narrow(BATCH_DIM, start, len)
}

/// Stack row blocks along the batch dimension.
pub(crate) fn concat_rows(tensors: &[Tensor]) -> Result<Tensor, TensorError> {
    Tensor::cat(tensors, BATCH_DIM)
}

/// Left-pad a sequence to `target_len` positions.
///
/// Returns the padded tensor and the number of positions prepended.
pub(crate) fn pad_sequence_left(
    sequence: &Tensor,
    target_len: usize,
    value: f64,
) -> Result<(Tensor, usize), TensorError> {
    if !has_sequence_dim(sequence) {
        return Ok((sequence.clone(), 0));
    }
    let amount = target_len.saturating_sub(sequence_length(sequence));
    Ok((sequence.pad(SEQ_DIM, amount, 0, value)?, amount))
}

/// Right-pad a sequence to `target_len` positions.
pub(crate) fn pad_sequence_right(
    sequence: &Tensor,
    target_len: usize,
    value: f64,
) -> Result<Tensor, TensorError> {
    if !has_sequence_dim(sequence) {
        return Ok(sequence.clone());
    }
    let amount = target_len.saturating_sub(sequence_length(sequence));
    sequence.pad(SEQ_DIM, 0, amount, value)
}

/// Drop `amount` leading positions of the sequence dimension.
pub(crate) fn strip_left(sequence: &Tensor, amount: usize) -> Result<Tensor, TensorError> {
    if amount == 0 || !has_sequence_dim(sequence) {
        return Ok(sequence.clone());
    }
    let len = sequence_length(sequence);
    if amount > len {
        return Err(TensorError::OutOfBounds {
            dim: SEQ_DIM,
            start: amount,
            end: len,
            size: len,
        });
    }
    sequence.narrow(SEQ_DIM, amount, len - amount)
}

/// Concatenate row blocks whose sequence lengths may differ, right-padding
/// the shorter blocks so the result is rectangular.
pub(crate) fn concat_ragged_rows(blocks: &[Tensor], value: f64) -> Result<Tensor, TensorError> {
    let longest = blocks.iter().map(sequence_length).max().unwrap_or(0);
    if blocks.iter().all(|b| sequence_length(b) == longest) {
        return concat_rows(blocks);
    }
    let aligned = blocks
        .iter()
        .map(|b| pad_sequence_right(b, longest, value))
        .collect::<Result<Vec<_>, _>>()?;
    concat_rows(&aligned)
}
