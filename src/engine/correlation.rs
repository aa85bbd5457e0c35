//! Correlation table: job id to pending operation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::protocol::{BatchId, Envelope, JobId};
use crate::sink::{CallHooks, CallSink, StreamControl, StreamSink};

/// How a resolver is notified.
pub(crate) enum ResolverKind {
    /// Settled once, then removed.
    Call {
        hooks: CallHooks,
        sink: Box<dyn CallSink>,
    },
    /// Notified per response until the terminal code.
    Stream {
        sink: Arc<dyn StreamSink>,
        control: StreamControl,
    },
}

/// Engine-internal record of one outstanding operation.
pub(crate) struct Resolver {
    pub(crate) batch_id: BatchId,
    /// Kept verbatim so it can be re-sent on redelivery.
    pub(crate) envelope: Envelope,
    pub(crate) kind: ResolverKind,
    order: u64,
}

impl Resolver {
    pub(crate) fn is_stream(&self) -> bool {
        matches!(self.kind, ResolverKind::Stream { .. })
    }
}

/// Pending operations keyed by job id.
///
/// Registration order is remembered so redelivery is deterministic.
#[derive(Default)]
pub(crate) struct CorrelationTable {
    resolvers: HashMap<JobId, Resolver>,
    next_order: u64,
}

impl CorrelationTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register the resolver for `envelope` and return its job id.
    pub(crate) fn register(&mut self, batch_id: BatchId, envelope: Envelope, kind: ResolverKind) -> JobId {
        let job_id = envelope.job_id();
        let order = self.next_order;
        self.next_order += 1;
        self.resolvers.insert(
            job_id,
            Resolver {
                batch_id,
                envelope,
                kind,
                order,
            },
        );
        job_id
    }

    pub(crate) fn lookup(&self, job_id: &JobId) -> Option<&Resolver> {
        self.resolvers.get(job_id)
    }

    pub(crate) fn get_mut(&mut self, job_id: &JobId) -> Option<&mut Resolver> {
        self.resolvers.get_mut(job_id)
    }

    pub(crate) fn remove(&mut self, job_id: &JobId) -> Option<Resolver> {
        self.resolvers.remove(job_id)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, job_id: &JobId) -> bool {
        self.resolvers.contains_key(job_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.resolvers.len()
    }

    /// Every registered envelope, grouped by batch.
    ///
    /// Batches are ordered by their oldest member and members by registration
    /// order.
    pub(crate) fn live_by_batch(&self) -> Vec<(BatchId, Vec<Envelope>)> {
        let mut live: Vec<&Resolver> = self.resolvers.values().collect();
        live.sort_by_key(|r| r.order);

        let mut groups: Vec<(BatchId, Vec<Envelope>)> = Vec::new();
        let mut index: HashMap<BatchId, usize> = HashMap::new();
        for resolver in live {
            match index.get(&resolver.batch_id) {
                Some(&i) => groups[i].1.push(resolver.envelope.clone()),
                None => {
                    index.insert(resolver.batch_id, groups.len());
                    groups.push((resolver.batch_id, vec![resolver.envelope.clone()]));
                }
            }
        }
        groups
    }
}
