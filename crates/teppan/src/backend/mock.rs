use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::ComputeBackend;
use crate::error::ComputeFailure;
use crate::params::Parameters;
use crate::tensor::Tensor;
use crate::Inputs;

/// Returns the collated `slot` unchanged, so stripped output rows equal the
/// request's own input rows.
pub(crate) struct EchoBackend {
    slot: String,
    failures_left: AtomicUsize,
    pub(crate) releases: AtomicUsize,
    pub(crate) batches: Mutex<Vec<Inputs>>,
}

impl EchoBackend {
    pub(crate) fn new(slot: &str) -> Self {
        Self {
            slot: slot.to_string(),
            failures_left: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            batches: Mutex::new(vec![]),
        }
    }

    /// Fail the next `count` calls to `execute`.
    pub(crate) fn failing(slot: &str, count: usize) -> Self {
        let backend = Self::new(slot);
        backend.failures_left.store(count, Ordering::SeqCst);
        backend
    }

    pub(crate) fn batch_sizes(&self) -> Vec<usize> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .map(|b| b.values().next().map_or(0, Tensor::rows))
            .collect()
    }
}

#[async_trait]
impl ComputeBackend for EchoBackend {
    async fn execute(&self, inputs: &Inputs, _parameters: &Parameters) -> Result<Tensor, ComputeFailure> {
        self.batches.lock().unwrap().push(inputs.clone());
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(ComputeFailure::backend("injected failure"));
        }
        inputs
            .get(&self.slot)
            .cloned()
            .ok_or_else(|| ComputeFailure::backend(format!("missing slot {}", self.slot)))
    }

    async fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
