use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use indexmap::IndexSet;
use tokio::time::{self, MissedTickBehavior};
use uuid::Uuid;

use super::SharedState;
use super::group_table::WorkSlice;
use super::worker::Shutdown;
use crate::backend::ComputeBackend;
use crate::communication::RetryReason;
use crate::config::ServerConfig;
use crate::error::ComputeFailure;
use crate::params::{GroupKey, Parameters, batch_multiplier};
use crate::tensor::Tensor;
use crate::tensor::operations::{
    concat_rows, pad_sequence_left, sequence_length, slice_rows, strip_left,
};
use crate::Inputs;

/// The rows one batch round will run, all from a single group.
struct Plan {
    key: GroupKey,
    parameters: Parameters,
    entries: Vec<WorkSlice>,
}

impl Plan {
    fn rows(&self) -> usize {
        self.entries.iter().map(|e| e.rows).sum()
    }
}

/// Backend inputs for a plan, plus how far each entry's sequence was left-padded.
pub(crate) struct Collated {
    pub(crate) inputs: Inputs,
    pub(crate) paddings: Vec<usize>,
}

/// Stack every entry's rows slot by slot.
///
/// Slots appear in the order they are first seen across the plan. Sequence
/// slots are left-padded to the longest entry; the per-entry pad recorded is
/// the one applied to `config.sequence_slot`.
pub(crate) fn collate(entries: &[WorkSlice], config: &ServerConfig) -> Result<Collated, ComputeFailure> {
    let slices = entries
        .iter()
        .map(|e| e.record.slice(e.start, e.rows))
        .collect::<Result<Vec<_>, _>>()?;

    let slots: IndexSet<&String> = slices.iter().flat_map(|s| s.keys()).collect();
    let mut paddings = vec![0; entries.len()];
    let mut inputs = Inputs::with_capacity(slots.len());

    for slot in slots {
        let parts = slices
            .iter()
            .map(|s| s.get(slot).ok_or_else(|| ComputeFailure::MissingSlot(slot.clone())))
            .collect::<Result<Vec<&Tensor>, _>>()?;
        let longest = parts.iter().map(|t| sequence_length(t)).max().unwrap_or(0);

        let mut aligned = Vec::with_capacity(parts.len());
        for (i, part) in parts.into_iter().enumerate() {
            let (tensor, amount) = pad_sequence_left(part, longest, config.pad_value)?;
            if *slot == config.sequence_slot {
                paddings[i] = amount;
            }
            aligned.push(tensor);
        }
        inputs.insert(slot.clone(), concat_rows(&aligned)?);
    }

    Ok(Collated { inputs, paddings })
}

/// # BatchScheduler
///
/// Every tick, takes one group's worth of rows out of the shared table, runs
/// them through the backend as one batch and hands each record its rows.
///
/// A failed batch is not retried here. Every record it touched is told to
/// resend and any of its rows still queued are dropped.
pub(crate) struct BatchScheduler<C> {
    backend: Arc<C>,
    state: SharedState,
    config: ServerConfig,
}

impl<C: ComputeBackend> BatchScheduler<C> {
    pub(crate) fn new(backend: Arc<C>, state: SharedState, config: ServerConfig) -> Self {
        Self { backend, state, config }
    }

    /// Tick every `batch_timeout` until shutdown.
    pub(crate) async fn run(&self, shutdown: Arc<Shutdown>) {
        let mut ticker = time::interval(self.config.batch_timeout);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while shutdown.is_running() {
            tokio::select! {
                _ = shutdown.stopped() => break,
                _ = ticker.tick() => {
                    self.run_round().await;
                }
            }
        }
        tracing::debug!("batch scheduler stopped");
    }

    /// Run a single batch round. Returns `false` if there was nothing to do.
    pub(crate) async fn run_round(&self) -> bool {
        let Some(plan) = self.plan_round().await else {
            return false;
        };

        match self.attempt(&plan).await {
            Ok(completed) => {
                tracing::debug!(
                    group = %plan.key,
                    rows = plan.rows(),
                    entries = plan.entries.len(),
                    completed,
                    "batch round finished"
                );
            }
            Err(failure) => {
                tracing::warn!(
                    group = %plan.key,
                    rows = plan.rows(),
                    error = %failure,
                    "batch failed; asking clients to resend"
                );
                self.fail(plan).await;
            }
        }
        true
    }

    /// Select a group and extract this round's rows under one lock.
    async fn plan_round(&self) -> Option<Plan> {
        let mut state = self.state.lock().await;
        let (key, parameters) = state
            .groups
            .select_group()
            .map(|(key, parameters)| (key.clone(), parameters.clone()))?;
        let capacity = (self.config.max_batch_size / batch_multiplier(&parameters)).max(1);
        let entries = state.groups.pop_work(&key, capacity);
        Some(Plan { key, parameters, entries })
    }

    /// Returns the number of records this round completed.
    async fn attempt(&self, plan: &Plan) -> Result<usize, ComputeFailure> {
        let Collated { inputs, paddings } = collate(&plan.entries, &self.config)?;

        let result = self.backend.execute(&inputs, &plan.parameters).await;
        self.backend.release().await;
        let output = result?;

        let expected = plan.rows();
        if output.rows() != expected {
            return Err(ComputeFailure::RowCount {
                expected,
                actual: output.rows(),
            });
        }

        // Split everything before delivering anything, so a bad output
        // cannot leave some records with rows from a failed batch.
        let mut offset = 0;
        let mut pieces = Vec::with_capacity(plan.entries.len());
        for (entry, pad) in plan.entries.iter().zip(paddings) {
            let rows = slice_rows(&output, offset, entry.rows)?;
            offset += entry.rows;
            pieces.push(strip_left(&rows, pad)?);
        }

        let mut completed = 0;
        for (entry, piece) in plan.entries.iter().zip(pieces) {
            if entry.record.deliver(piece, self.config.pad_value).await? {
                completed += 1;
            }
        }
        Ok(completed)
    }

    async fn fail(&self, plan: Plan) {
        let ids: HashSet<Uuid> = plan.entries.iter().map(|e| e.record.id()).collect();
        self.state.lock().await.groups.discard(&plan.key, &ids);
        join_all(
            plan.entries
                .iter()
                .map(|e| e.record.fail(RetryReason::BatchFailed)),
        )
        .await;
    }
}
