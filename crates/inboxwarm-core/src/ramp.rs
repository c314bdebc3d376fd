//! Ramp curve: maps a warmup day and target volume to today's send quota.
//!
//! ```text
//! day  1..=7   max(5,  10% of target)
//! day  8..=14  max(10, 25% of target)
//! day 15..=21  max(15, 50% of target)
//! day 22..=28  max(20, 75% of target)
//! day 29..     target
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::Account;

/// Warmup phase an account is in, derived from its ramp day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RampPhase {
    NotStarted,
    Initial,
    BuildingTrust,
    IncreasingVolume,
    NearTarget,
    FullWarmup,
}

impl RampPhase {
    pub fn for_day(day: i32) -> Self {
        match day {
            d if d <= 0 => Self::NotStarted,
            1..=7 => Self::Initial,
            8..=14 => Self::BuildingTrust,
            15..=21 => Self::IncreasingVolume,
            22..=28 => Self::NearTarget,
            _ => Self::FullWarmup,
        }
    }

    /// Phase number 1–5, 0 before the ramp starts.
    pub fn number(&self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Initial => 1,
            Self::BuildingTrust => 2,
            Self::IncreasingVolume => 3,
            Self::NearTarget => 4,
            Self::FullWarmup => 5,
        }
    }

    /// Share of the target volume expected during this phase.
    pub fn volume_fraction(&self) -> f64 {
        match self {
            Self::NotStarted => 0.0,
            Self::Initial => 0.10,
            Self::BuildingTrust => 0.25,
            Self::IncreasingVolume => 0.50,
            Self::NearTarget => 0.75,
            Self::FullWarmup => 1.0,
        }
    }

    fn floor(&self) -> u32 {
        match self {
            Self::NotStarted => 0,
            Self::Initial => 5,
            Self::BuildingTrust => 10,
            Self::IncreasingVolume => 15,
            Self::NearTarget => 20,
            Self::FullWarmup => 0,
        }
    }

    /// Base reputation score used by the phase component of the health score.
    pub fn base_score(&self) -> f64 {
        match self {
            Self::NotStarted => 0.0,
            Self::Initial => 50.0,
            Self::BuildingTrust => 65.0,
            Self::IncreasingVolume => 80.0,
            Self::NearTarget => 90.0,
            Self::FullWarmup => 100.0,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Self::NotStarted => "Not in warmup",
            Self::Initial => "Initial warmup",
            Self::BuildingTrust => "Building trust",
            Self::IncreasingVolume => "Increasing volume",
            Self::NearTarget => "Near target",
            Self::FullWarmup => "Full warmup",
        }
    }

    /// Last day of the phase, None for open-ended phases.
    fn last_day(&self) -> Option<i32> {
        match self {
            Self::Initial => Some(7),
            Self::BuildingTrust => Some(14),
            Self::IncreasingVolume => Some(21),
            Self::NearTarget => Some(28),
            Self::NotStarted | Self::FullWarmup => None,
        }
    }

    /// Human label, e.g. "Phase 2: Building trust (Day 10/14)".
    pub fn label(&self, day: i32) -> String {
        match (self, self.last_day()) {
            (Self::NotStarted, _) => self.title().to_string(),
            (_, Some(end)) => format!("Phase {}: {} (Day {day}/{end})", self.number(), self.title()),
            (_, None) => format!("Phase {}: {} (Day {day})", self.number(), self.title()),
        }
    }
}

/// Daily send quota for `day` of the ramp towards `target`.
pub fn daily_quota(day: i32, target: u32) -> u32 {
    let phase = RampPhase::for_day(day);
    match phase {
        RampPhase::NotStarted => 0,
        RampPhase::FullWarmup => target,
        _ => {
            let share = (target as f64 * phase.volume_fraction()).floor() as u32;
            share.max(phase.floor())
        }
    }
}

/// Outcome of a successful day advance.
#[derive(Debug, Clone, PartialEq)]
pub struct RampAdvance {
    pub old_day: i32,
    pub new_day: i32,
    pub old_quota: u32,
    pub new_quota: u32,
    pub phase: RampPhase,
    /// Set when the new day is the first day of a new phase.
    pub phase_changed: bool,
}

/// Advance the ramp by one day, at most once per account-local calendar day.
///
/// Returns None when the account already advanced on `local_today` or is not
/// a warmup account.
pub fn advance_day(account: &mut Account, local_today: NaiveDate) -> Option<RampAdvance> {
    if !account.is_warmup() {
        return None;
    }
    if account.last_advanced_on.is_some_and(|d| d >= local_today) {
        return None;
    }

    let old_day = account.ramp_day;
    let old_quota = account.daily_quota;
    let new_day = old_day.max(0) + 1;
    let new_quota = daily_quota(new_day, account.target_volume);

    account.ramp_day = new_day;
    account.daily_quota = new_quota;
    account.last_advanced_on = Some(local_today);
    account.updated_at = chrono::Utc::now();

    let phase = RampPhase::for_day(new_day);
    Some(RampAdvance {
        old_day,
        new_day,
        old_quota,
        new_quota,
        phase,
        phase_changed: phase != RampPhase::for_day(old_day),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn test_quota_breakpoints() {
        assert_eq!(daily_quota(0, 50), 0);
        assert_eq!(daily_quota(-3, 50), 0);
        assert_eq!(daily_quota(1, 50), 5);
        assert_eq!(daily_quota(7, 100), 10);
        assert_eq!(daily_quota(8, 50), 12);
        assert_eq!(daily_quota(10, 50), 12);
        assert_eq!(daily_quota(15, 50), 25);
        assert_eq!(daily_quota(22, 50), 37);
        assert_eq!(daily_quota(29, 50), 50);
        assert_eq!(daily_quota(400, 50), 50);
    }

    #[test]
    fn test_floors_apply_for_small_targets() {
        assert_eq!(daily_quota(3, 20), 5);
        assert_eq!(daily_quota(9, 20), 10);
        assert_eq!(daily_quota(16, 20), 15);
        assert_eq!(daily_quota(23, 20), 20);
    }

    #[test]
    fn test_quota_monotonic_across_boundaries() {
        for target in [20, 37, 50, 80, 200] {
            let mut prev = 0;
            for day in 0..=60 {
                let q = daily_quota(day, target);
                assert!(q >= prev, "target={target} day={day} q={q} prev={prev}");
                prev = q;
            }
            assert_eq!(daily_quota(29, target), target);
        }
    }

    #[test]
    fn test_phase_labels() {
        assert_eq!(RampPhase::for_day(0).label(0), "Not in warmup");
        assert_eq!(
            RampPhase::for_day(10).label(10),
            "Phase 2: Building trust (Day 10/14)"
        );
        assert_eq!(RampPhase::for_day(35).label(35), "Phase 5: Full warmup (Day 35)");
    }

    #[test]
    fn test_advance_once_per_day() {
        let mut acct = Account::new("w@example.com", Role::Warmup, "UTC");
        let d1 = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let d2 = d1.succ_opt().unwrap();

        let adv = advance_day(&mut acct, d1).unwrap();
        assert_eq!((adv.old_day, adv.new_day), (0, 1));
        assert_eq!(acct.daily_quota, 5);
        assert!(advance_day(&mut acct, d1).is_none());
        assert_eq!(acct.ramp_day, 1);

        advance_day(&mut acct, d2).unwrap();
        assert_eq!(acct.ramp_day, 2);
    }

    #[test]
    fn test_advance_reports_phase_change() {
        let mut acct = Account::new("w@example.com", Role::Warmup, "UTC");
        acct.ramp_day = 7;
        let adv = advance_day(&mut acct, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()).unwrap();
        assert!(adv.phase_changed);
        assert_eq!(adv.phase, RampPhase::BuildingTrust);
        assert_eq!(adv.new_quota, 12);
    }

    #[test]
    fn test_pool_accounts_never_advance() {
        let mut acct = Account::new("p@example.com", Role::Pool, "UTC");
        assert!(advance_day(&mut acct, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()).is_none());
        assert_eq!(acct.ramp_day, 0);
    }
}
