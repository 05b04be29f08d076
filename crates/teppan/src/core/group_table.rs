use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use indexmap::IndexMap;
use uuid::Uuid;

use crate::communication::RequestRecord;
use crate::params::{GroupKey, Parameters};

/// A queued record plus the first row not yet handed to the scheduler.
#[derive(Debug)]
struct QueuedWork {
    record: Arc<RequestRecord>,
    next_row: usize,
}

impl QueuedWork {
    fn remaining(&self) -> usize {
        self.record.total_work() - self.next_row
    }
}

#[derive(Debug)]
struct Group {
    parameters: Parameters,
    queue: VecDeque<QueuedWork>,
}

/// One entry of a batch plan: `rows` rows of `record` starting at `start`.
#[derive(Debug, Clone)]
pub(crate) struct WorkSlice {
    pub(crate) record: Arc<RequestRecord>,
    pub(crate) start: usize,
    pub(crate) rows: usize,
}

/// # GroupTable
///
/// Pending requests keyed by their [`GroupKey`], in the order each group
/// was first created. A group whose queue empties is removed.
///
/// Not synchronised itself; it lives inside the server's shared state.
#[derive(Debug, Default)]
pub(crate) struct GroupTable {
    groups: IndexMap<GroupKey, Group>,
}

impl GroupTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of non-empty groups.
    pub(crate) fn len(&self) -> usize {
        self.groups.len()
    }

    /// Append `record` to the tail of its group, creating the group if absent.
    pub(crate) fn enqueue(&mut self, key: GroupKey, parameters: Parameters, record: Arc<RequestRecord>) {
        let group = self.groups.entry(key).or_insert_with(|| Group {
            parameters,
            queue: VecDeque::new(),
        });
        group.queue.push_back(QueuedWork { record, next_row: 0 });
    }

    /// The earliest-created group, without removing it.
    pub(crate) fn select_group(&self) -> Option<(&GroupKey, &Parameters)> {
        self.groups
            .first()
            .map(|(key, group)| (key, &group.parameters))
    }

    /// Take up to `max_rows` rows from the head of the group's queue.
    ///
    /// A partially served head goes back to the front of the queue so it is
    /// served first next round.
    pub(crate) fn pop_work(&mut self, key: &GroupKey, max_rows: usize) -> Vec<WorkSlice> {
        let mut plan = vec![];
        let Some(group) = self.groups.get_mut(key) else {
            return plan;
        };

        let mut budget = max_rows;
        while budget > 0 {
            let Some(mut head) = group.queue.pop_front() else {
                break;
            };
            let rows = head.remaining().min(budget);
            plan.push(WorkSlice {
                record: head.record.clone(),
                start: head.next_row,
                rows,
            });
            head.next_row += rows;
            budget -= rows;
            if head.remaining() > 0 {
                group.queue.push_front(head);
            }
        }

        if group.queue.is_empty() {
            self.groups.shift_remove(key);
        }
        plan
    }

    /// Drop every queued record of `key` whose id is in `ids`.
    pub(crate) fn discard(&mut self, key: &GroupKey, ids: &HashSet<Uuid>) {
        if let Some(group) = self.groups.get_mut(key) {
            group.queue.retain(|work| !ids.contains(&work.record.id()));
            if group.queue.is_empty() {
                self.groups.shift_remove(key);
            }
        }
    }

    /// Drop everything, releasing the records' completion senders.
    pub(crate) fn clear(&mut self) {
        self.groups.clear();
    }
}
