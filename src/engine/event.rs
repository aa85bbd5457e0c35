//! Events processed by the engine task.

use serde_json::Value;

use super::correlation::ResolverKind;
use crate::protocol::{BatchId, Envelope};
use crate::transport::{DuplexLink, LinkEvent, TransportError};

/// Everything that can wake the engine.
///
/// Events from timers and links carry the ticket, generation or epoch they
/// were issued under; the engine ignores any that a newer one superseded.
pub(crate) enum EngineEvent {
    /// A caller issued a call or stream batch
    Submit(Submission),
    /// Caller asked for an immediate reconnect
    Reconnect,
    /// A connect attempt opened
    LinkOpened { epoch: u64, link: DuplexLink },
    /// A connect attempt failed before opening
    LinkFailed { epoch: u64, error: TransportError },
    /// Traffic or lifecycle event from an open link
    Link { epoch: u64, event: LinkEvent },
    /// Decoded body of a discrete round trip
    DiscreteReply(Value),
    /// Backoff timer fired
    ReconnectDue { ticket: u64 },
    /// Health window elapsed
    HealthTick { generation: u64 },
}

/// The envelopes of one caller invocation and how each is to be notified.
pub(crate) struct Submission {
    pub(crate) batch_id: BatchId,
    pub(crate) jobs: Vec<(Envelope, ResolverKind)>,
}

impl Submission {
    pub(crate) fn new(jobs: Vec<(Envelope, ResolverKind)>) -> Self {
        Self {
            batch_id: BatchId::new(),
            jobs,
        }
    }
}
