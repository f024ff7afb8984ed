//! Inactivity policies
//!
//! Each policy warns once at `notify_after` and removes at `remove_after`.
//! The warning is not repeated until activity resets the record.

use crate::config::TimeoutConfig;
use djrelay_common::ListenerId;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub notify_after: Option<Duration>,
    pub remove_after: Duration,
}

impl From<TimeoutConfig> for TimeoutPolicy {
    fn from(config: TimeoutConfig) -> Self {
        Self {
            notify_after: config.notify_secs.map(Duration::from_secs),
            remove_after: Duration::from_secs(config.remove_secs),
        }
    }
}

/// What a policy says about one idle period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Warn,
    Remove,
}

impl TimeoutPolicy {
    /// Judge an idle period given whether a warning was already sent
    pub fn judge(&self, idle: Duration, warned: bool) -> Verdict {
        if idle > self.remove_after {
            Verdict::Remove
        } else if !warned && self.notify_after.is_some_and(|notify| idle > notify) {
            Verdict::Warn
        } else {
            Verdict::Keep
        }
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_tokens: usize,
    pub warned: Vec<ListenerId>,
    /// Dropped from the contributor queue but still listening
    pub removed_contributors: Vec<ListenerId>,
    /// Direct listeners disconnected
    pub removed_listeners: Vec<ListenerId>,
}

impl SweepReport {
    pub fn changed_listeners(&self) -> bool {
        !self.removed_contributors.is_empty() || !self.removed_listeners.is_empty()
    }
}
