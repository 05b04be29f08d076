use candle_core::{DType, Device};

use crate::error::{ComputeFailure, TensorError};
use crate::tensor::{Tensor, TensorData};

impl From<candle_core::Error> for TensorError {
    fn from(e: candle_core::Error) -> Self {
        TensorError::Library(e.to_string())
    }
}

impl From<candle_core::Error> for ComputeFailure {
    fn from(e: candle_core::Error) -> Self {
        ComputeFailure::Backend(e.to_string())
    }
}

impl Tensor {
    /// Copy onto a candle device.
    pub fn to_candle(&self, device: &Device) -> Result<candle_core::Tensor, TensorError> {
        let shape = self.shape().to_vec();
        let tensor = match self.data() {
            TensorData::F32(v) => candle_core::Tensor::from_vec(v.clone(), shape, device)?,
            TensorData::I64(v) => candle_core::Tensor::from_vec(v.clone(), shape, device)?,
        };
        Ok(tensor)
    }
}

impl TryFrom<&candle_core::Tensor> for Tensor {
    type Error = TensorError;

    fn try_from(tensor: &candle_core::Tensor) -> Result<Self, Self::Error> {
        let shape = tensor.dims().to_vec();
        let flat = tensor.flatten_all()?;
        match tensor.dtype() {
            DType::F32 => Tensor::from_f32(shape, flat.to_vec1::<f32>()?),
            DType::I64 => Tensor::from_i64(shape, flat.to_vec1::<i64>()?),
            DType::U32 => Tensor::from_i64(shape, flat.to_dtype(DType::I64)?.to_vec1::<i64>()?),
            DType::F16 | DType::BF16 | DType::F64 => {
                Tensor::from_f32(shape, flat.to_dtype(DType::F32)?.to_vec1::<f32>()?)
            }
            other => Err(TensorError::UnsupportedDType(format!("{other:?}"))),
        }
    }
}
