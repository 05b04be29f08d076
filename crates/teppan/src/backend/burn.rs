use burn::tensor::{DType, TensorData as BurnData};

use crate::error::TensorError;
use crate::tensor::{Tensor, TensorData};

impl From<&Tensor> for BurnData {
    fn from(tensor: &Tensor) -> Self {
        let shape = tensor.shape().to_vec();
        match tensor.data() {
            TensorData::F32(v) => BurnData::new(v.clone(), shape),
            TensorData::I64(v) => BurnData::new(v.clone(), shape),
        }
    }
}

impl TryFrom<BurnData> for Tensor {
    type Error = TensorError;

    fn try_from(data: BurnData) -> Result<Self, Self::Error> {
        let shape = data.shape.clone();
        let library = |e: burn::tensor::DataError| TensorError::Library(format!("{e:?}"));
        match data.dtype {
            DType::F32 => Tensor::from_f32(shape, data.to_vec::<f32>().map_err(library)?),
            DType::I64 => Tensor::from_i64(shape, data.to_vec::<i64>().map_err(library)?),
            DType::F64 | DType::F16 | DType::BF16 => {
                Tensor::from_f32(shape, data.convert::<f32>().to_vec::<f32>().map_err(library)?)
            }
            DType::I32 | DType::I16 | DType::I8 | DType::U64 | DType::U32 | DType::U16 | DType::U8 => {
                Tensor::from_i64(shape, data.convert::<i64>().to_vec::<i64>().map_err(library)?)
            }
            other => Err(TensorError::UnsupportedDType(format!("{other:?}"))),
        }
    }
}
