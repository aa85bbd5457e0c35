//! Reconnect backoff.

use std::time::Duration;

use crate::config::ReconnectPolicy;

/// Unconditional exponential backoff with a cap.
///
/// Every scheduled reconnect doubles the delay (saturating at the ceiling), so
/// after N consecutive failures the next delay is `min(floor * 2^N, ceiling)`.
/// A successful open resets it to the floor. Reset sets the stored value, and
/// scheduling doubles before sleeping, so the first delay after a reset is
/// twice the floor. No jitter, no attempt limit.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(policy: ReconnectPolicy) -> Self {
        Self {
            floor: policy.floor,
            ceiling: policy.ceiling,
            current: policy.floor,
        }
    }

    /// Double the delay and return it.
    pub(crate) fn advance(&mut self) -> Duration {
        let next = self.current.checked_mul(2).unwrap_or(self.ceiling);
        self.current = next.min(self.ceiling);
        self.current
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.floor;
    }

    #[cfg(test)]
    pub(crate) fn current(&self) -> Duration {
        self.current
    }
}
