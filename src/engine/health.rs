//! Health monitor for the bidirectional transport.

use crate::config::HealthPolicy;

/// Result of closing one monitoring window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HealthVerdict {
    Healthy,
    /// The window saw at least the threshold of errors
    Unstable { errors: u32 },
}

/// Counts transport errors per fixed window.
///
/// The counter resets at every window boundary whatever the verdict.
#[derive(Debug, Clone)]
pub(crate) struct HealthMonitor {
    policy: HealthPolicy,
    errors: u32,
}

impl HealthMonitor {
    pub(crate) fn new(policy: HealthPolicy) -> Self {
        Self { policy, errors: 0 }
    }

    pub(crate) fn record_error(&mut self) {
        self.errors = self.errors.saturating_add(1);
    }

    /// Close the current window.
    pub(crate) fn tick(&mut self) -> HealthVerdict {
        let errors = std::mem::take(&mut self.errors);
        if errors >= self.policy.error_threshold {
            HealthVerdict::Unstable { errors }
        } else {
            HealthVerdict::Healthy
        }
    }

    /// Start a fresh window (on every successful open).
    pub(crate) fn restart(&mut self) {
        self.errors = 0;
    }

    pub(crate) fn interval(&self) -> std::time::Duration {
        self.policy.interval
    }
}
