//! Batch tracker: job ids issued together.

use std::collections::HashMap;

use crate::protocol::{BatchId, JobId};

/// Ordered membership of each live batch.
///
/// A batch is dropped as soon as its last member leaves.
#[derive(Debug, Default)]
pub(crate) struct BatchTracker {
    batches: HashMap<BatchId, Vec<JobId>>,
}

impl BatchTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record `members` as the batch's membership, replacing any previous one.
    pub(crate) fn register(&mut self, batch_id: BatchId, members: Vec<JobId>) {
        if members.is_empty() {
            self.batches.remove(&batch_id);
        } else {
            self.batches.insert(batch_id, members);
        }
    }

    pub(crate) fn members_of(&self, batch_id: &BatchId) -> &[JobId] {
        self.batches.get(batch_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn remove_member(&mut self, batch_id: &BatchId, job_id: &JobId) {
        if let Some(members) = self.batches.get_mut(batch_id) {
            members.retain(|member| member != job_id);
            if members.is_empty() {
                self.batches.remove(batch_id);
            }
        }
    }

    /// Replace all memberships at once.
    pub(crate) fn reset(&mut self, batches: impl IntoIterator<Item = (BatchId, Vec<JobId>)>) {
        self.batches.clear();
        for (batch_id, members) in batches {
            self.register(batch_id, members);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.batches.len()
    }
}
