//! Tensor bridge: conversions between [`Batch`] / `Vec<f64>` and burn tensors.
//!
//! The rest of the crate works on plain `f64` buffers; burn tensors only
//! exist inside the critic's forward and backward passes.

use burn::prelude::*;
use burn::tensor::TensorData;

use crate::batch::Batch;
use crate::error::{AvoError, Result};

/// Convert a batch to a 2D tensor of shape `(n_rows, n_features)`.
pub fn batch_to_tensor<B: Backend>(batch: &Batch, device: &B::Device) -> Tensor<B, 2> {
    Tensor::from_data(
        TensorData::new(batch.as_slice().to_vec(), batch.shape()),
        device,
    )
}

/// Build a 2D tensor from a flat row-major buffer.
pub fn matrix_to_tensor<B: Backend>(
    values: &[f64],
    shape: [usize; 2],
    device: &B::Device,
) -> Tensor<B, 2> {
    Tensor::from_data(TensorData::new(values.to_vec(), shape), device)
}

/// Build a 1D tensor from a slice.
pub fn vector_to_tensor<B: Backend>(values: &[f64], device: &B::Device) -> Tensor<B, 1> {
    Tensor::from_data(TensorData::new(values.to_vec(), [values.len()]), device)
}

/// Extract all values of a tensor as `f64`, row-major.
pub fn tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f64>> {
    tensor
        .into_data()
        .convert::<f64>()
        .to_vec::<f64>()
        .map_err(|e| AvoError::Tensor(format!("{e:?}")))
}

/// Extract a single scalar.
pub fn tensor_to_f64<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.into_scalar().elem::<f64>()
}

/// Convert a 2D tensor back into a batch.
pub fn tensor_to_batch<B: Backend>(tensor: Tensor<B, 2>) -> Result<Batch> {
    let [n_rows, n_features] = tensor.dims();
    Batch::new(n_rows, n_features, tensor_to_vec(tensor)?)
}
