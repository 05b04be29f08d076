use async_trait::async_trait;

use crate::error::ComputeFailure;
use crate::params::Parameters;
use crate::tensor::Tensor;
use crate::Inputs;

/// The expensive model the server multiplexes requests onto.
///
/// # Implementation Notes
///
/// Implementations should:
/// * Accept inputs whose `0th` dimension is the sum of the planned rows, with
///   every sequence slot left-padded to one shared length
/// * Return one output row per input row, in order
/// * Report transient failures (out of memory, device resets) as
///   [`ComputeFailure`] instead of panicking; the affected requests are resent
///
/// # Example
///
/// ```ignore
/// use teppan::backend::ComputeBackend;
/// use async_trait::async_trait;
///
/// struct MyModel {
///     weights: Tensor,
/// }
///
/// #[async_trait]
/// impl ComputeBackend for MyModel {
///     async fn execute(&self, inputs: &Inputs, parameters: &Parameters) -> Result<Tensor, ComputeFailure> {
///         let tokens = &inputs["decoder_input_ids"];
///         self.generate(tokens, parameters)
///     }
/// }
/// ```
#[async_trait]
pub trait ComputeBackend: Send + Sync + 'static {
    /// Run one batched pass over the collated inputs.
    async fn execute(&self, inputs: &Inputs, parameters: &Parameters) -> Result<Tensor, ComputeFailure>;

    /// Free transient allocations (caches, scratch buffers) held after a pass.
    ///
    /// Called after every attempt, whether it succeeded or failed.
    async fn release(&self) {}
}
