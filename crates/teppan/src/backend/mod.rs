//! # Compute Backend
//!
//! The scheduler hands every batch round to a [`ComputeBackend`]. The crate
//! never looks inside it: the backend gets collated host tensors plus the
//! group's generation parameters and returns one output row per input row.
//!
//! ## Feature Flags
//!
//! - `candle`: conversions between [`Tensor`](crate::tensor::Tensor) and `candle_core::Tensor`
//! - `burn`: conversions between [`Tensor`](crate::tensor::Tensor) and `burn::tensor::TensorData`
//!
//! With a feature enabled, a backend built on that library converts its
//! inputs on the way in and its output on the way out.

mod core_trait;

#[cfg_attr(docsrs, doc(cfg(feature = "candle")))]
#[cfg(feature = "candle")]
/// Candle tensor conversions.
///
/// This module is only available when the `candle` feature flag is enabled.
pub mod candle;

#[cfg_attr(docsrs, doc(cfg(feature = "burn")))]
#[cfg(feature = "burn")]
/// Burn tensor conversions.
///
/// This module is only available when the `burn` feature flag is enabled.
/// Burn tensors carry their rank as a const generic, so conversions go
/// through the rank-erased `TensorData`.
pub mod burn;

pub use core_trait::*;

#[cfg(test)]
/// Mock compute backends.
///
/// Echo the sequence slot back, optionally failing on request
pub(crate) mod mock;
