use std::sync::Arc;

use tokio::sync::{Mutex, oneshot};
use uuid::Uuid;

use super::{Completion, RetryReason};
use crate::error::{RequestError, TensorError};
use crate::tensor::Tensor;
use crate::tensor::operations::{concat_ragged_rows, slice_rows};
use crate::Inputs;

/// How a request ended, as seen by its connection handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Every row was served; rows are in input order.
    Completed(Tensor),

    /// The request must be sent again in full.
    Retry(RetryReason),
}

/// Mutable half of a record, touched by the scheduler after each round.
struct Progress {
    work_done: usize,
    blocks: Vec<Tensor>,
    completion: Option<oneshot::Sender<Outcome>>,
}

/// # RequestRecord
///
/// Bookkeeping for one client request across however many batch rounds it
/// takes to serve all of its rows.
///
/// The inputs are immutable; the group table tracks which rows have been
/// handed out, and the record tracks which rows have come back. The
/// completion signal fires exactly once.
pub struct RequestRecord {
    id: Uuid,
    inputs: Inputs,
    total_work: usize,
    progress: Mutex<Progress>,
}

impl RequestRecord {
    /// Validate `inputs` and create a record plus the future its handler waits on.
    pub fn new(inputs: Inputs) -> Result<(Arc<Self>, Completion), RequestError> {
        let total_work = Self::validate(&inputs)?;
        let (tx, rx) = oneshot::channel();
        let record = Arc::new(Self {
            id: Uuid::new_v4(),
            inputs,
            total_work,
            progress: Mutex::new(Progress {
                work_done: 0,
                blocks: vec![],
                completion: Some(tx),
            }),
        });
        Ok((record, Completion::new(rx)))
    }

    /// Every slot needs the same, non-zero, batch dimension.
    fn validate(inputs: &Inputs) -> Result<usize, RequestError> {
        let mut expected = None;
        for (slot, tensor) in inputs {
            if tensor.rank() == 0 {
                return Err(RequestError::Scalar(slot.clone()));
            }
            let rows = tensor.rows();
            let first = *expected.get_or_insert(rows);
            if first != rows {
                return Err(RequestError::RaggedBatch {
                    slot: slot.clone(),
                    rows,
                    expected: first,
                });
            }
        }
        match expected {
            None => Err(RequestError::NoInputs),
            Some(0) => Err(RequestError::Empty),
            Some(rows) => Ok(rows),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    pub fn total_work(&self) -> usize {
        self.total_work
    }

    pub async fn work_done(&self) -> usize {
        self.progress.lock().await.work_done
    }

    /// Rows `start..start + len` of every slot.
    pub(crate) fn slice(&self, start: usize, len: usize) -> Result<Inputs, TensorError> {
        self.inputs
            .iter()
            .map(|(slot, tensor)| Ok((slot.clone(), slice_rows(tensor, start, len)?)))
            .collect()
    }

    /// Append the next block of output rows.
    ///
    /// Returns `true` if this block completed the record, in which case the
    /// accumulated rows have been sent to the waiting handler.
    pub(crate) async fn deliver(&self, rows: Tensor, pad_value: f64) -> Result<bool, TensorError> {
        let mut progress = self.progress.lock().await;
        if progress.completion.is_none() {
            return Ok(false);
        }
        progress.work_done += rows.rows();
        progress.blocks.push(rows);
        if progress.work_done < self.total_work {
            return Ok(false);
        }

        let blocks = std::mem::take(&mut progress.blocks);
        let outcome = match concat_ragged_rows(&blocks, pad_value) {
            Ok(result) => Outcome::Completed(result),
            Err(e) => {
                Self::signal(&mut progress, self.id, Outcome::Retry(RetryReason::BatchFailed));
                return Err(e);
            }
        };
        Self::signal(&mut progress, self.id, outcome);
        Ok(true)
    }

    /// Discard partial results and ask the client to resend.
    pub(crate) async fn fail(&self, reason: RetryReason) {
        let mut progress = self.progress.lock().await;
        progress.blocks.clear();
        Self::signal(&mut progress, self.id, Outcome::Retry(reason));
    }

    fn signal(progress: &mut Progress, id: Uuid, outcome: Outcome) {
        if let Some(sender) = progress.completion.take() {
            if sender.send(outcome).is_err() {
                tracing::debug!(record = %id, "handler gone; dropping outcome");
            }
        }
    }
}

impl std::fmt::Debug for RequestRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRecord")
            .field("id", &self.id)
            .field("total_work", &self.total_work)
            .finish_non_exhaustive()
    }
}
