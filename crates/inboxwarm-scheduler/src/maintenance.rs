//! Score, status report, spam report and retention cleanup.

use chrono::{DateTime, Duration, Utc};
use inboxwarm_core::error::{Result, WarmupError};
use inboxwarm_core::ramp::RampPhase;
use inboxwarm_core::types::{Account, Role, SlotStatus, SpamStatus};
use inboxwarm_score::{ScoreInputs, ScoreSnapshot};
use serde::Serialize;

use crate::engine::Scheduler;

/// Today's progress for one warmup account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountStatus {
    pub email: String,
    pub ramp_day: i32,
    pub phase: String,
    pub quota: u32,
    pub target_volume: u32,
    pub sent_today: usize,
    pub pending_today: usize,
    pub failed_today: usize,
    /// Today's quota as a share of the target volume, in percent.
    pub ramp_progress: f64,
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} | sent {}/{} today, {} pending, {} failed | {:.0}% of target {}",
            self.email,
            self.phase,
            self.sent_today,
            self.quota,
            self.pending_today,
            self.failed_today,
            self.ramp_progress,
            self.target_volume
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreReport {
    pub scored: usize,
    pub fallbacks: usize,
    pub errors: usize,
    pub average: Option<f64>,
}

impl std::fmt::Display for ScoreReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} accounts scored", self.scored)?;
        if let Some(avg) = self.average {
            write!(f, " (avg {avg:.1})")?;
        }
        write!(f, ", {} from cache, {} errors", self.fallbacks, self.errors)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired: usize,
    pub deleted: usize,
}

impl std::fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} stale slots expired, {} old slots deleted", self.expired, self.deleted)
    }
}

impl Scheduler {
    /// Compute, persist and return the account's score. Falls back to the last
    /// persisted snapshot when the aggregates cannot be scored.
    pub fn score_for_account(&self, account_id: &str) -> Result<ScoreSnapshot> {
        self.score_with_source(account_id).map(|(snapshot, _)| snapshot)
    }

    /// Score plus whether it came from the cache.
    fn score_with_source(&self, account_id: &str) -> Result<(ScoreSnapshot, bool)> {
        let account = self.db.get_account(account_id)?;
        let now = self.clock.now();
        let messages = self.db.message_stats(&account.id)?;
        let spam = self.db.spam_stats(&account.id)?;
        let inputs = ScoreInputs {
            account_id: account.id.clone(),
            ramp_day: account.ramp_day,
            target_volume: account.target_volume,
            daily_quota: account.daily_quota,
            total_messages: messages.total,
            opened: messages.opened,
            replied: messages.replied,
            sent_last_week: self.db.count_sent_since(&account.id, now - Duration::days(7))?,
            spam_count: spam.total,
            spam_recovered: spam.recovered,
        };

        match self.scores.calculate(&inputs, now) {
            Ok(snapshot) => {
                self.db
                    .save_score_snapshot(&account.id, snapshot.total, &snapshot, snapshot.computed_at)?;
                Ok((snapshot, false))
            }
            Err(WarmupError::Calculation(reason)) => {
                match self.db.latest_score_snapshot::<ScoreSnapshot>(&account.id)? {
                    Some(cached) => {
                        tracing::warn!(
                            "⚠️ Score for {} fell back to {} snapshot: {}",
                            account.email,
                            cached.computed_at.format("%Y-%m-%d %H:%M"),
                            reason
                        );
                        Ok((cached, true))
                    }
                    None => Err(WarmupError::Calculation(reason)),
                }
            }
            Err(e) => Err(e),
        }
    }

    pub fn score_pass(&self) -> Result<ScoreReport> {
        let mut report = ScoreReport::default();
        let mut totals = Vec::new();

        for account in self.db.list_accounts(Some(Role::Warmup), true)? {
            match self.score_with_source(&account.id) {
                Ok((snapshot, cached)) => {
                    report.scored += 1;
                    report.fallbacks += usize::from(cached);
                    totals.push(snapshot.total);
                    tracing::info!(
                        "📊 {}: {:.1} ({}) {}",
                        account.email,
                        snapshot.total,
                        snapshot.grade,
                        snapshot.status
                    );
                }
                Err(e) if e.is_fatal_for_pass() => return Err(e),
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!("⚠️ Could not score {}: {}", account.email, e);
                }
            }
        }
        if !totals.is_empty() {
            report.average = Some(totals.iter().sum::<f64>() / totals.len() as f64);
        }

        for line in self.status_report()? {
            tracing::info!("📋 {}", line);
        }
        self.spam_report()?;
        Ok(report)
    }

    /// Per-account progress for the account's current local day.
    pub fn status_report(&self) -> Result<Vec<AccountStatus>> {
        let now = self.clock.now();
        let accounts = self.db.list_accounts(Some(Role::Warmup), true)?;
        accounts.iter().map(|a| self.account_status(a, now)).collect()
    }

    fn account_status(&self, account: &Account, now: DateTime<Utc>) -> Result<AccountStatus> {
        let today = account.local_date(now);
        let slots = self.db.slots_for_date(&account.id, today)?;
        let count = |status: SlotStatus| slots.iter().filter(|s| s.status == status).count();
        let ramp_progress = if account.target_volume > 0 {
            account.daily_quota as f64 / account.target_volume as f64 * 100.0
        } else {
            0.0
        };
        Ok(AccountStatus {
            email: account.email.clone(),
            ramp_day: account.ramp_day,
            phase: RampPhase::for_day(account.ramp_day).label(account.ramp_day),
            quota: account.daily_quota,
            target_volume: account.target_volume,
            sent_today: count(SlotStatus::Sent),
            pending_today: count(SlotStatus::Pending),
            failed_today: count(SlotStatus::Failed),
            ramp_progress,
        })
    }

    /// Spam detections over the last 24 hours, by status.
    pub fn spam_report(&self) -> Result<Vec<(SpamStatus, u64)>> {
        let counts = self.db.spam_status_counts(self.clock.now() - Duration::hours(24))?;
        if counts.is_empty() {
            tracing::info!("🛡️ No spam placements in the last 24h");
        } else {
            let summary: Vec<String> = counts.iter().map(|(s, n)| format!("{s} {n}")).collect();
            tracing::info!("🛡️ Spam last 24h: {}", summary.join(", "));
        }
        Ok(counts)
    }

    pub fn cleanup_pass(&self) -> Result<CleanupReport> {
        let now = self.clock.now();
        let expired = self
            .db
            .skip_pending_before(now - Duration::days(1), "expired unsent", now)?;
        let cutoff = now.date_naive() - Duration::days(self.config.retention.slot_days.max(0));
        let deleted = self.db.delete_terminal_slots_before(cutoff)?;
        if expired + deleted > 0 {
            tracing::info!("🧹 Cleanup: {} expired, {} deleted before {}", expired, deleted, cutoff);
        }
        Ok(CleanupReport { expired, deleted })
    }
}
