//! Reschedule pass: repair interrupted dispatches, then re-arm failed and
//! stale slots for accounts that fell behind.

use chrono::{DateTime, Duration, Utc};
use inboxwarm_core::error::Result;
use inboxwarm_core::types::{Account, Role};

use crate::engine::Scheduler;
use crate::reschedule::{self, RescheduleInput};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescheduleReport {
    /// Claims that expired without a result, now skipped.
    pub interrupted: usize,
    pub accounts: usize,
    pub rearmed: usize,
    pub errors: usize,
}

impl std::fmt::Display for RescheduleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} interrupted, {} slots re-armed across {} accounts, {} errors",
            self.interrupted, self.rearmed, self.accounts, self.errors
        )
    }
}

impl Scheduler {
    pub fn reschedule_pass(&self) -> Result<RescheduleReport> {
        let now = self.clock.now();
        let mut report = RescheduleReport::default();

        let lease = Duration::seconds(self.config.dispatch.claim_lease_secs);
        for slot in self.db.expired_claims(now - lease)? {
            if self.db.mark_slot_skipped(&slot.id, "dispatch interrupted", now)? {
                tracing::warn!("🧹 Slot {} claim expired without a result; skipped", slot.id);
                report.interrupted += 1;
            }
        }

        for account in self.db.list_accounts(Some(Role::Warmup), true)? {
            match self.reschedule_account(&account, now) {
                Ok(0) => {}
                Ok(n) => {
                    report.accounts += 1;
                    report.rearmed += n;
                }
                Err(e) if e.is_fatal_for_pass() => return Err(e),
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!("⚠️ Reschedule failed for {}: {}", account.email, e);
                }
            }
        }

        Ok(report)
    }

    fn reschedule_account(&self, account: &Account, now: DateTime<Utc>) -> Result<usize> {
        let timing = self.timing_for(account);
        if !timing.is_business_hours(now) {
            return Ok(0);
        }
        let today = timing.local_date(now);
        let Some((business_start, business_end)) = timing.business_window(today) else {
            return Ok(0);
        };

        let slots = self.db.slots_for_date(&account.id, today)?;
        let input = RescheduleInput {
            slots: &slots,
            now,
            business_start,
            business_end,
            min_gap_secs: self.config.timing.min_gap_secs,
        };
        let progress = reschedule::progress(&input, &self.config.reschedule);
        let moves = self.with_rng(|rng| reschedule::plan(&input, &self.config.reschedule, rng));
        if moves.is_empty() {
            return Ok(0);
        }

        let mut rearmed = 0;
        for mv in &moves {
            let note = format!("rescheduled from {}", mv.from);
            if self.db.rearm_slot(&mv.slot_id, mv.from, mv.new_at, &note, now)? {
                rearmed += 1;
            }
        }
        tracing::info!(
            "🔁 {}: {}/{} sent, expected {}, re-armed {} slots",
            account.email,
            progress.sent,
            progress.total,
            progress.expected,
            rearmed
        );
        Ok(rearmed)
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::*;
    use inboxwarm_core::types::{ActivityPeriod, ScheduleSlot, SlotStatus};
    use std::sync::atomic::Ordering;

    #[test]
    fn test_expired_claim_becomes_skipped() {
        let h = harness(monday(10, 0));
        let acct = h.warmup("w@warm.test", 10, 50);
        let date = monday(10, 0).date_naive();
        let slot = ScheduleSlot::pending(&acct.id, monday(10, 0), date, ActivityPeriod::Peak);
        h.db.insert_schedule_if_absent(&acct.id, date, &[slot.clone()]).unwrap();
        assert!(h.db.claim_slot(&slot.id, monday(10, 0)).unwrap());

        // lease still valid
        h.clock.set(monday(10, 5));
        assert_eq!(h.scheduler.reschedule_pass().unwrap().interrupted, 0);

        h.clock.set(monday(10, 11));
        let report = h.scheduler.reschedule_pass().unwrap();
        assert_eq!(report.interrupted, 1);
        let stored = h.db.get_slot(&slot.id).unwrap();
        assert_eq!(stored.status, SlotStatus::Skipped);
        assert_eq!(stored.last_error.as_deref(), Some("dispatch interrupted"));
    }

    #[test]
    fn test_failed_slot_rearmed_with_retry() {
        let h = harness(monday(11, 0));
        let acct = h.warmup("w@warm.test", 10, 50);
        let date = monday(11, 0).date_naive();
        let slots = vec![
            ScheduleSlot::pending(&acct.id, monday(9, 30), date, ActivityPeriod::Peak),
            ScheduleSlot::pending(&acct.id, monday(15, 0), date, ActivityPeriod::Peak),
        ];
        h.db.insert_schedule_if_absent(&acct.id, date, &slots).unwrap();
        h.db.mark_slot_failed(&slots[0].id, "smtp timeout", monday(9, 30)).unwrap();

        let report = h.scheduler.reschedule_pass().unwrap();
        assert_eq!(report.rearmed, 1);
        let stored = h.db.get_slot(&slots[0].id).unwrap();
        assert_eq!(stored.status, SlotStatus::Pending);
        assert_eq!(stored.retry_count, 1);
        assert!(stored.scheduled_at >= monday(11, 5));
        assert!(stored.scheduled_at <= monday(17, 30));
    }

    #[tokio::test]
    async fn test_always_failing_slot_is_resent_max_retries_times() {
        let h = harness(monday(11, 0));
        let acct = h.warmup("w@warm.test", 10, 50);
        h.pool("p@pool.test");
        let date = monday(11, 0).date_naive();
        let slot = ScheduleSlot::pending(&acct.id, monday(11, 1), date, ActivityPeriod::Peak);
        h.db.insert_schedule_if_absent(&acct.id, date, &[slot.clone()]).unwrap();
        h.mailbox.fail_sends.store(true, Ordering::SeqCst);
        let max_retries = h.scheduler.config().reschedule.max_retries;

        for _ in 0..10 {
            assert_eq!(h.scheduler.dispatch_pass().await.unwrap().failed, 1);
            h.clock.set(monday(11, 0));
            h.scheduler.reschedule_pass().unwrap();
            let stored = h.db.get_slot(&slot.id).unwrap();
            if stored.status != SlotStatus::Pending {
                break;
            }
            h.clock.set(stored.scheduled_at);
        }

        let stored = h.db.get_slot(&slot.id).unwrap();
        assert_eq!(stored.status, SlotStatus::Failed);
        assert_eq!(stored.retry_count, max_retries + 1);
        assert_eq!(h.mailbox.attempts.load(Ordering::SeqCst), 1 + max_retries as usize);
        assert_eq!(h.mailbox.sent_count(), 0);
    }

    #[test]
    fn test_nothing_rearmed_outside_business_hours() {
        let h = harness(monday(19, 0));
        let acct = h.warmup("w@warm.test", 10, 50);
        let date = monday(19, 0).date_naive();
        let slot = ScheduleSlot::pending(&acct.id, monday(9, 30), date, ActivityPeriod::Peak);
        h.db.insert_schedule_if_absent(&acct.id, date, &[slot.clone()]).unwrap();
        h.db.mark_slot_failed(&slot.id, "smtp timeout", monday(9, 30)).unwrap();

        assert_eq!(h.scheduler.reschedule_pass().unwrap().rearmed, 0);
        assert_eq!(h.db.get_slot(&slot.id).unwrap().status, SlotStatus::Failed);
    }
}
