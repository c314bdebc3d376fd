//! Daily generation pass: advance each ramp for its local date, then fill the
//! local date's schedule. Accounts are bucketed by timezone so each bucket
//! sees its own calendar.

use inboxwarm_core::error::Result;
use inboxwarm_core::types::Role;

use crate::engine::{GenerateOutcome, Scheduler};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateReport {
    pub timezones: usize,
    pub accounts: usize,
    pub advanced: usize,
    pub schedules: usize,
    pub slots: usize,
    pub errors: usize,
}

impl std::fmt::Display for GenerateReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} accounts in {} timezones, {} advanced, {} schedules ({} slots), {} errors",
            self.accounts, self.timezones, self.advanced, self.schedules, self.slots, self.errors
        )
    }
}

impl Scheduler {
    pub fn generate_pass(&self) -> Result<GenerateReport> {
        let now = self.clock.now();
        let accounts = self.db.list_accounts(Some(Role::Warmup), true)?;
        let mut report = GenerateReport::default();

        for tz_name in self.db.warmup_timezones()? {
            let bucket: Vec<_> = accounts.iter().filter(|a| a.timezone == tz_name).collect();
            let Some(first) = bucket.first() else {
                continue;
            };
            report.timezones += 1;
            let today = first.local_date(now);
            tracing::debug!("🌍 {}: local date {} ({} accounts)", tz_name, today, bucket.len());

            for account in bucket {
                report.accounts += 1;
                let mut account = account.clone();
                let outcome = match self.advance_on(&mut account, today) {
                    Ok(advance) => {
                        if advance.is_some() {
                            report.advanced += 1;
                        }
                        self.generate_for(&account, today)
                    }
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok(GenerateOutcome::Generated(n)) => {
                        report.schedules += 1;
                        report.slots += n;
                    }
                    Ok(other) => tracing::debug!("⏭️ {} {}: {}", account.email, today, other),
                    Err(e) if e.is_fatal_for_pass() => return Err(e),
                    Err(e) => {
                        report.errors += 1;
                        tracing::warn!("⚠️ Schedule generation failed for {}: {}", account.email, e);
                    }
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::*;
    use chrono::Duration;
    use inboxwarm_core::types::{Account, Role};

    #[test]
    fn test_generate_pass_advances_then_generates() {
        let h = harness(monday(0, 30));
        let a = h.warmup("a@warm.test", 9, 50);
        let b = h.warmup("b@warm.test", 0, 50);
        h.pool("p@pool.test");

        let report = h.scheduler.generate_pass().unwrap();
        assert_eq!(report.accounts, 2);
        assert_eq!(report.advanced, 2);
        assert_eq!(report.schedules, 2);

        let date = monday(0, 30).date_naive();
        let a_now = h.db.get_account(&a.id).unwrap();
        assert_eq!(a_now.ramp_day, 10);
        assert_eq!(h.db.slots_for_date(&a.id, date).unwrap().len(), 12);
        // day 1 sends the phase floor
        assert_eq!(h.db.slots_for_date(&b.id, date).unwrap().len(), 5);

        // the hourly re-run changes nothing
        h.clock.advance(Duration::hours(1));
        let again = h.scheduler.generate_pass().unwrap();
        assert_eq!((again.advanced, again.schedules), (0, 0));
        assert_eq!(h.db.slots_for_date(&a.id, date).unwrap().len(), 12);
    }

    #[test]
    fn test_timezones_use_their_own_date() {
        // 20:00 UTC Monday is already Tuesday in Tokyo
        let h = harness(monday(20, 0));
        let mut tokyo = Account::new("t@warm.test", Role::Warmup, "Asia/Tokyo");
        tokyo.ramp_day = 10;
        tokyo.daily_quota = 12;
        h.db.insert_account(&tokyo).unwrap();
        let utc = h.warmup("u@warm.test", 10, 50);

        let report = h.scheduler.generate_pass().unwrap();
        assert_eq!(report.timezones, 2);

        let tuesday = monday(20, 0).date_naive().succ_opt().unwrap();
        let monday_date = monday(20, 0).date_naive();
        assert_eq!(h.db.get_account(&tokyo.id).unwrap().last_advanced_on, Some(tuesday));
        assert!(h.db.has_schedule_for(&tokyo.id, tuesday).unwrap());
        assert!(h.db.has_schedule_for(&utc.id, monday_date).unwrap());
    }
}
