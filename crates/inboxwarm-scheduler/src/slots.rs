//! Due-window rules for schedule slots.
//!
//! ```text
//!   scheduled_at - lookahead        scheduled_at           scheduled_at + grace
//!          |──────── due ──────────────|───────── due ────────────|── sweep owns it ──▶
//! ```

use chrono::{DateTime, Duration, Utc};
use inboxwarm_core::config::DispatchConfig;
use inboxwarm_core::types::{ScheduleSlot, SlotStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueWindow {
    pub lookahead: Duration,
    pub grace: Duration,
}

impl DueWindow {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            lookahead: Duration::seconds(config.lookahead_secs.max(0)),
            grace: Duration::seconds(config.grace_secs.max(0)),
        }
    }

    /// Range of scheduled instants that are due at `now`.
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - self.grace, now + self.lookahead)
    }

    /// Re-checks a row from the store against the window; rows can be claimed
    /// or resolved between the query and dispatch.
    pub fn is_due(&self, slot: &ScheduleSlot, now: DateTime<Utc>) -> bool {
        let (from, to) = self.bounds(now);
        slot.status == SlotStatus::Pending
            && slot.claimed_at.is_none()
            && slot.scheduled_at >= from
            && slot.scheduled_at <= to
    }
}
