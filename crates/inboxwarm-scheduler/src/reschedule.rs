//! Catch-up planning for accounts that fell behind their daily schedule.
//!
//! expected = ⌊slots × elapsed share of the business day⌋. When
//! `expected - sent` exceeds the slack, or a failed slot can still be
//! retried, failed and stale slots get fresh instants spread over what is
//! left of the business day.

use chrono::{DateTime, Duration, Utc};
use inboxwarm_core::config::RescheduleConfig;
use inboxwarm_core::types::{ScheduleSlot, SlotStatus};
use rand::Rng;

use crate::timing::space_out;

/// One slot to re-arm at a new instant.
#[derive(Debug, Clone, PartialEq)]
pub struct RescheduleMove {
    pub slot_id: String,
    /// Status the slot must still be in for the move to apply.
    pub from: SlotStatus,
    pub new_at: DateTime<Utc>,
}

/// Progress of one account through today's slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub total: usize,
    pub sent: usize,
    pub expected: usize,
    pub behind: usize,
    pub retryable_failed: usize,
    pub stale: usize,
}

/// Today's slots plus the business window, in UTC.
#[derive(Debug, Clone, Copy)]
pub struct RescheduleInput<'a> {
    pub slots: &'a [ScheduleSlot],
    pub now: DateTime<Utc>,
    pub business_start: DateTime<Utc>,
    pub business_end: DateTime<Utc>,
    pub min_gap_secs: i64,
}

/// `retry_count` counts failed sends, so the first failure is not yet a retry.
fn retryable(slot: &ScheduleSlot, config: &RescheduleConfig) -> bool {
    slot.status == SlotStatus::Failed && slot.retry_count <= config.max_retries
}

fn stale(slot: &ScheduleSlot, now: DateTime<Utc>, config: &RescheduleConfig) -> bool {
    slot.status == SlotStatus::Pending
        && slot.claimed_at.is_none()
        && slot.scheduled_at < now - Duration::minutes(config.stale_after_mins)
}

pub fn progress(input: &RescheduleInput<'_>, config: &RescheduleConfig) -> Progress {
    let day_secs = (input.business_end - input.business_start).num_seconds().max(1) as f64;
    let elapsed = (input.now - input.business_start).num_seconds() as f64;
    let fraction = (elapsed / day_secs).clamp(0.0, 1.0);

    let total = input.slots.len();
    let sent = input.slots.iter().filter(|s| s.status == SlotStatus::Sent).count();
    let expected = (total as f64 * fraction).floor() as usize;
    Progress {
        total,
        sent,
        expected,
        behind: expected.saturating_sub(sent),
        retryable_failed: input.slots.iter().filter(|s| retryable(s, config)).count(),
        stale: input.slots.iter().filter(|s| stale(s, input.now, config)).count(),
    }
}

/// Plan new instants for failed and stale slots. Empty when on track or out of time.
pub fn plan<R: Rng + ?Sized>(
    input: &RescheduleInput<'_>,
    config: &RescheduleConfig,
    rng: &mut R,
) -> Vec<RescheduleMove> {
    let p = progress(input, config);
    if p.behind <= config.slack as usize && p.retryable_failed == 0 {
        return Vec::new();
    }
    if input.business_end - input.now < Duration::minutes(config.min_remaining_mins) {
        return Vec::new();
    }

    let mut candidates: Vec<&ScheduleSlot> = input
        .slots
        .iter()
        .filter(|s| retryable(s, config) || stale(s, input.now, config))
        .collect();
    if candidates.is_empty() {
        return Vec::new();
    }
    candidates.sort_by_key(|s| s.scheduled_at);

    let window_start = input.now + Duration::minutes(config.start_offset_mins);
    let window_end = input.business_end - Duration::minutes(config.end_buffer_mins);
    if window_end <= window_start {
        return Vec::new();
    }

    let base = window_start.timestamp();
    let span = window_end.timestamp() - base;
    let count = candidates.len() as i64;
    let mut offsets: Vec<i64> = if span / 60 < count * 2 {
        // too tight for random placement, spread evenly
        let step = (span / count).max(1);
        (0..count)
            .map(|i| i * step + rng.gen_range(0..=step / 2))
            .collect()
    } else {
        (0..count).map(|_| rng.gen_range(0..=span)).collect()
    };
    offsets.sort_unstable();

    // instants already taken by pending slots that stay where they are
    let occupied: Vec<i64> = input
        .slots
        .iter()
        .filter(|s| s.status == SlotStatus::Pending && !candidates.iter().any(|c| c.id == s.id))
        .map(|s| s.scheduled_at.timestamp() - base)
        .collect();

    let gap = input.min_gap_secs.max(0);
    let mut placed: Vec<(i64, ())> = Vec::with_capacity(offsets.len());
    for mut off in offsets {
        loop {
            let clash = occupied
                .iter()
                .chain(placed.iter().map(|(o, _)| o))
                .any(|o| (off - o).abs() < gap);
            if !clash {
                break;
            }
            off += gap;
        }
        if off > span {
            break;
        }
        placed.push((off, ()));
    }
    placed.sort_by_key(|(o, _)| *o);
    space_out(&mut placed, gap, 0, span);

    candidates
        .into_iter()
        .zip(placed)
        .map(|(slot, (off, _))| RescheduleMove {
            slot_id: slot.id.clone(),
            from: slot.status,
            new_at: window_start + Duration::seconds(off),
        })
        .collect()
}
