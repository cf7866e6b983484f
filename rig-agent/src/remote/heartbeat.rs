//! Heartbeat scheduler.
//!
//! Decides, on every pump tick, whether a status notification is due:
//! either the fixed interval since the last actual send has elapsed, or an
//! external state change armed the notify deadline and it has passed. Both
//! timers live in locked cells because the notifier runs on arbitrary
//! threads while the pump loop polls.

use std::time::Duration;

use tokio::time::Instant;

use crate::types::LockedCell;

/// Interval between unsolicited status sends.
pub const STATUS_INTERVAL: Duration = Duration::from_secs(45);

#[derive(Debug, Default)]
pub struct HeartbeatSchedule {
    /// Updated only when a status frame actually went out.
    last_sent: LockedCell<Option<Instant>>,
    /// Deadline armed by the state-change notifier; cleared once consumed.
    notify_after: LockedCell<Option<Instant>>,
}

impl HeartbeatSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when a status send is due. Consumes a pending notify deadline
    /// either way, so the two triggers collapse into one send per tick.
    pub fn poll(&self, now: Instant) -> bool {
        let interval_due = self
            .last_sent
            .get()
            .is_none_or(|sent| now.duration_since(sent) > STATUS_INTERVAL);
        let notify_due = self.notify_after.get().is_some_and(|after| now >= after);
        if interval_due || notify_due {
            self.notify_after.set(None);
            true
        } else {
            false
        }
    }

    /// Record an actual status send.
    pub fn mark_sent(&self, now: Instant) {
        self.last_sent.set(Some(now));
    }

    /// Arm (or move) the notify deadline. A second signal before the
    /// deadline fires only moves it; sends never stack.
    pub fn request_notify(&self, after: Instant) {
        self.notify_after.set(Some(after));
    }

    /// Drop any pending notify deadline. Called at session start so a
    /// stale signal from a dead connection cannot leak into the next one.
    pub fn clear_pending(&self) {
        self.notify_after.set(None);
    }
}
