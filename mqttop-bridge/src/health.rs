//! Consecutive-failure tracking for loaded metrics.
//!
//! By default a failing update is only logged. With a threshold configured,
//! a metric that fails that many times in a row is reported offline until its
//! next successful update.

use dashmap::DashMap;

/// Counts consecutive failed updates per metric topic.
#[derive(Debug, Default)]
pub struct FailureTracker {
    /// Failures in a row before a metric is marked offline. `None` disables it.
    threshold: Option<u32>,
    failures: DashMap<String, u32>,
}

impl FailureTracker {
    /// Create a tracker. A threshold of zero is treated as disabled.
    pub fn new(threshold: Option<u32>) -> Self {
        Self {
            threshold: threshold.filter(|n| *n > 0),
            failures: DashMap::new(),
        }
    }

    pub fn threshold(&self) -> Option<u32> {
        self.threshold
    }

    /// Record a failed update.
    ///
    /// Returns `true` exactly once per failure streak: when the streak
    /// reaches the threshold.
    pub fn record_failure(&self, topic: &str) -> bool {
        let Some(threshold) = self.threshold else {
            return false;
        };

        let mut count = self.failures.entry(topic.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count == threshold
    }

    /// Record a successful update, ending any failure streak.
    pub fn record_success(&self, topic: &str) {
        if self.threshold.is_some() {
            self.failures.remove(topic);
        }
    }

    /// Forget a metric entirely (it was unloaded).
    pub fn forget(&self, topic: &str) {
        self.failures.remove(topic);
    }

    pub fn consecutive_failures(&self, topic: &str) -> u32 {
        self.failures.get(topic).map(|count| *count).unwrap_or(0)
    }
}
