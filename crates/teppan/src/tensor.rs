//! # Dense host tensors
//!
//! The scheduler only ever moves rows around: it slices requests along the
//! batch dimension, left-pads sequence slots and concatenates them, then
//! splits the backend's output again. A small row-major host tensor is
//! enough for that, and it serializes directly onto the wire.
//!
//! Compute backends built on candle or burn convert at the edge, see the
//! `candle` and `burn` features.

pub mod constant;
pub(crate) mod operations;

use serde::{Deserialize, Serialize};

use crate::error::TensorError;

/// Element storage of a [`Tensor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TensorData {
    F32(Vec<f32>),
    I64(Vec<i64>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::I64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> &'static str {
        match self {
            TensorData::F32(_) => "f32",
            TensorData::I64(_) => "i64",
        }
    }
}

/// A row-major tensor whose `0th` dimension is the batch dimension.
///
/// Every tensor, including one decoded off the wire, holds exactly as many
/// elements as its shape describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor")]
pub struct Tensor {
    shape: Vec<usize>,
    data: TensorData,
}

/// Wire form of a [`Tensor`] before its shape has been checked.
#[derive(Deserialize)]
struct RawTensor {
    shape: Vec<usize>,
    data: TensorData,
}

impl TryFrom<RawTensor> for Tensor {
    type Error = TensorError;

    fn try_from(raw: RawTensor) -> Result<Self, Self::Error> {
        Tensor::new(raw.shape, raw.data)
    }
}

/// Number of elements `shape` describes.
///
/// Zero-sized dimensions are counted as `1` for the overflow check, so every
/// partial product of a valid shape fits in a `usize`.
fn element_count(shape: &[usize]) -> Result<usize, TensorError> {
    let nonzero = shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d.max(1)))
        .ok_or_else(|| TensorError::ShapeOverflow(shape.to_vec()))?;
    Ok(if shape.contains(&0) { 0 } else { nonzero })
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: TensorData) -> Result<Self, TensorError> {
        let expected = element_count(&shape)?;
        if expected != data.len() {
            return Err(TensorError::ElementCount {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn from_f32(shape: Vec<usize>, values: Vec<f32>) -> Result<Self, TensorError> {
        Self::new(shape, TensorData::F32(values))
    }

    pub fn from_i64(shape: Vec<usize>, values: Vec<i64>) -> Result<Self, TensorError> {
        Self::new(shape, TensorData::I64(values))
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn into_data(self) -> TensorData {
        self.data
    }

    /// Size of the batch dimension, `0` for scalars.
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    fn check_dim(&self, dim: usize) -> Result<(), TensorError> {
        if dim >= self.rank() {
            return Err(TensorError::DimOutOfRange {
                dim,
                rank: self.rank(),
            });
        }
        Ok(())
    }

    /// (product of dims before `dim`, product of dims after `dim`)
    fn strides_around(&self, dim: usize) -> (usize, usize) {
        let outer = self.shape[..dim].iter().product();
        let inner = self.shape[dim + 1..].iter().product();
        (outer, inner)
    }

    /// Slice `len` entries of dimension `dim` starting at `start`.
    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Self, TensorError> {
        self.check_dim(dim)?;
        let size = self.shape[dim];
        if start + len > size {
            return Err(TensorError::OutOfBounds {
                dim,
                start,
                end: start + len,
                size,
            });
        }
        let (outer, inner) = self.strides_around(dim);
        let mut shape = self.shape.clone();
        shape[dim] = len;

        fn take<T: Copy>(v: &[T], outer: usize, size: usize, inner: usize, start: usize, len: usize) -> Vec<T> {
            let mut out = Vec::with_capacity(outer * len * inner);
            for o in 0..outer {
                let base = (o * size + start) * inner;
                out.extend_from_slice(&v[base..base + len * inner]);
            }
            out
        }

        let data = match &self.data {
            TensorData::F32(v) => TensorData::F32(take(v, outer, size, inner, start, len)),
            TensorData::I64(v) => TensorData::I64(take(v, outer, size, inner, start, len)),
        };
        Ok(Self { shape, data })
    }

    /// Concatenate tensors along `dim`, in the order supplied.
    ///
    /// All tensors must share dtype, rank and every dimension except `dim`.
    pub fn cat(tensors: &[Self], dim: usize) -> Result<Self, TensorError> {
        let first = tensors.first().ok_or(TensorError::Empty)?;
        first.check_dim(dim)?;
        for t in &tensors[1..] {
            let compatible = t.rank() == first.rank()
                && t.shape
                    .iter()
                    .zip(first.shape.iter())
                    .enumerate()
                    .all(|(i, (a, b))| i == dim || a == b);
            if !compatible {
                return Err(TensorError::ShapeMismatch {
                    dim,
                    left: first.shape.clone(),
                    right: t.shape.clone(),
                });
            }
            if t.data.dtype() != first.data.dtype() {
                return Err(TensorError::DTypeMismatch(first.data.dtype(), t.data.dtype()));
            }
        }

        let (outer, inner) = first.strides_around(dim);
        let mut shape = first.shape.clone();
        shape[dim] = tensors.iter().map(|t| t.shape[dim]).sum();

        macro_rules! cat_variant {
            ($variant:ident) => {{
                let parts: Vec<(&[_], usize)> = tensors
                    .iter()
                    .map(|t| match &t.data {
                        TensorData::$variant(v) => (v.as_slice(), t.shape[dim] * inner),
                        _ => unreachable!("dtypes checked above"),
                    })
                    .collect();
                let mut out = Vec::with_capacity(shape.iter().product());
                for o in 0..outer {
                    for (values, chunk) in &parts {
                        out.extend_from_slice(&values[o * chunk..(o + 1) * chunk]);
                    }
                }
                TensorData::$variant(out)
            }};
        }

        let data = match &first.data {
            TensorData::F32(_) => cat_variant!(F32),
            TensorData::I64(_) => cat_variant!(I64),
        };
        Ok(Self { shape, data })
    }

    /// Pad dimension `dim` with `before` leading and `after` trailing entries of `value`.
    pub fn pad(&self, dim: usize, before: usize, after: usize, value: f64) -> Result<Self, TensorError> {
        self.check_dim(dim)?;
        if before == 0 && after == 0 {
            return Ok(self.clone());
        }
        let (outer, inner) = self.strides_around(dim);
        let size = self.shape[dim];
        let mut shape = self.shape.clone();
        shape[dim] = size + before + after;

        fn fill<T: Copy>(v: &[T], outer: usize, chunk: usize, before: usize, after: usize, value: T) -> Vec<T> {
            let mut out = Vec::with_capacity(outer * (chunk + before + after));
            for o in 0..outer {
                out.extend(std::iter::repeat_n(value, before));
                out.extend_from_slice(&v[o * chunk..(o + 1) * chunk]);
                out.extend(std::iter::repeat_n(value, after));
            }
            out
        }

        let data = match &self.data {
            TensorData::F32(v) => TensorData::F32(fill(
                v,
                outer,
                size * inner,
                before * inner,
                after * inner,
                value as f32,
            )),
            TensorData::I64(v) => TensorData::I64(fill(
                v,
                outer,
                size * inner,
                before * inner,
                after * inner,
                value as i64,
            )),
        };
        Ok(Self { shape, data })
    }
}

impl std::fmt::Display for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tensor({:?}, {})", self.shape, self.data.dtype())
    }
}
