//! Scheduler service: holds the injected dependencies and runs the periodic
//! passes on independent tokio intervals.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use inboxwarm_core::config::TriggerConfig;
use inboxwarm_core::error::{Result, WarmupError};
use inboxwarm_core::ramp::{self, RampAdvance};
use inboxwarm_core::types::{Account, Role, ScheduleSlot};
use inboxwarm_core::{Clock, ContentSource, Mailbox, SystemClock, WarmupConfig};
use inboxwarm_db::WarmupDb;
use inboxwarm_engagement::EngagementController;
use inboxwarm_score::ScoreCalculator;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::slots::DueWindow;
use crate::timing::{HumanTiming, schedule_stats};

/// Result of generating one (account, date) schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateOutcome {
    Generated(usize),
    AlreadyExists,
    NotBusinessDay,
    /// Ramp day 0: the account has not started warming up.
    NotRamping,
    ZeroQuota,
    Inactive,
    NotWarmup,
}

impl std::fmt::Display for GenerateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generated(n) => write!(f, "generated {n} slots"),
            Self::AlreadyExists => f.write_str("schedule already exists"),
            Self::NotBusinessDay => f.write_str("not a business day"),
            Self::NotRamping => f.write_str("ramp not started"),
            Self::ZeroQuota => f.write_str("zero quota"),
            Self::Inactive => f.write_str("account inactive"),
            Self::NotWarmup => f.write_str("not a warmup account"),
        }
    }
}

/// The periodic passes, one trigger each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Generate,
    Dispatch,
    Reschedule,
    Engagement,
    Replies,
    Spam,
    Score,
    Cleanup,
}

impl Pass {
    pub const ALL: [Pass; 8] = [
        Pass::Generate,
        Pass::Dispatch,
        Pass::Reschedule,
        Pass::Engagement,
        Pass::Replies,
        Pass::Spam,
        Pass::Score,
        Pass::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Dispatch => "dispatch",
            Self::Reschedule => "reschedule",
            Self::Engagement => "engagement",
            Self::Replies => "replies",
            Self::Spam => "spam",
            Self::Score => "score",
            Self::Cleanup => "cleanup",
        }
    }

    pub fn period_secs(&self, triggers: &TriggerConfig) -> u64 {
        match self {
            Self::Generate => triggers.generate_secs,
            Self::Dispatch => triggers.dispatch_secs,
            Self::Reschedule => triggers.reschedule_secs,
            Self::Engagement => triggers.engagement_secs,
            Self::Replies => triggers.replies_secs,
            Self::Spam => triggers.spam_secs,
            Self::Score => triggers.score_secs,
            Self::Cleanup => triggers.cleanup_secs,
        }
    }
}

impl std::fmt::Display for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Scheduler {
    pub(crate) db: Arc<WarmupDb>,
    pub(crate) mailbox: Arc<dyn Mailbox>,
    pub(crate) content: Arc<dyn ContentSource>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: Arc<WarmupConfig>,
    pub(crate) engagement: EngagementController,
    pub(crate) scores: ScoreCalculator,
    rng: Mutex<StdRng>,
}

impl Scheduler {
    pub fn new(
        db: Arc<WarmupDb>,
        mailbox: Arc<dyn Mailbox>,
        content: Arc<dyn ContentSource>,
        config: WarmupConfig,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            db,
            mailbox,
            content,
            clock: Arc::new(SystemClock),
            engagement: EngagementController::new(config.engagement.clone()),
            scores: ScoreCalculator::new(),
            config: Arc::new(config),
            rng: Mutex::new(rng),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &WarmupConfig {
        &self.config
    }

    pub fn db(&self) -> &WarmupDb {
        &self.db
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run `f` with the shared RNG. Never call across an `.await`.
    pub(crate) fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut rng)
    }

    pub(crate) fn timing_for(&self, account: &Account) -> HumanTiming {
        HumanTiming::new(account.tz_or_utc(), self.config.timing.clone())
    }

    /// Authenticate, persisting any refreshed credential. Returns the account as it should be used.
    pub(crate) async fn authenticated(&self, account: &Account) -> Result<Account> {
        let mut account = account.clone();
        if let Some(credential) = self.mailbox.authenticate(&account).await? {
            self.db.save_credential(&account.id, &credential, self.clock.now())?;
            tracing::debug!("🔑 Refreshed credential for {}", account.email);
            account.credential = Some(credential);
        }
        Ok(account)
    }

    // ── Entry points ──────────────────────────────────────

    /// Slots ready to send at `now`: inside the due window and the owner's business hours.
    pub fn due_slots(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleSlot>> {
        let window = DueWindow::from_config(&self.config.dispatch);
        let (from, to) = window.bounds(now);
        let slots = self.db.due_slots(from, to)?;
        if slots.is_empty() {
            return Ok(slots);
        }

        let accounts = self.db.list_accounts(Some(Role::Warmup), true)?;
        Ok(slots
            .into_iter()
            .filter(|slot| window.is_due(slot, now))
            .filter(|slot| {
                accounts
                    .iter()
                    .find(|a| a.id == slot.account_id)
                    .is_some_and(|a| self.timing_for(a).is_business_hours(now))
            })
            .collect())
    }

    pub fn pending_slots(&self, account_id: &str) -> Result<Vec<ScheduleSlot>> {
        self.db.pending_slots(account_id)
    }

    /// Generate the account's slots for a local date, once.
    pub fn generate_schedule_for_date(&self, account_id: &str, date: NaiveDate) -> Result<GenerateOutcome> {
        let account = self.db.get_account(account_id)?;
        self.generate_for(&account, date)
    }

    pub(crate) fn generate_for(&self, account: &Account, date: NaiveDate) -> Result<GenerateOutcome> {
        if !account.is_warmup() {
            return Ok(GenerateOutcome::NotWarmup);
        }
        if !account.active {
            return Ok(GenerateOutcome::Inactive);
        }
        if self.db.has_schedule_for(&account.id, date)? {
            return Ok(GenerateOutcome::AlreadyExists);
        }
        let timing = self.timing_for(account);
        if !timing.is_business_day(date) {
            return Ok(GenerateOutcome::NotBusinessDay);
        }
        if account.ramp_day <= 0 {
            return Ok(GenerateOutcome::NotRamping);
        }
        if account.daily_quota == 0 {
            return Ok(GenerateOutcome::ZeroQuota);
        }

        let planned = self.with_rng(|rng| timing.generate_daily_schedule(account.daily_quota, date, rng));
        let slots: Vec<ScheduleSlot> = planned
            .iter()
            .map(|p| ScheduleSlot::pending(&account.id, p.at, date, p.period))
            .collect();

        match self.db.insert_schedule_if_absent(&account.id, date, &slots)? {
            Some(n) => {
                let stats = schedule_stats(&planned);
                tracing::info!(
                    "📅 {} {}: {} slots (peak {}, normal {}, low {}), gaps min {}s avg {:.0}s",
                    account.email,
                    date,
                    stats.total,
                    stats.peak,
                    stats.normal,
                    stats.low,
                    stats.min_gap_secs.unwrap_or(0),
                    stats.avg_gap_secs.unwrap_or(0.0),
                );
                Ok(GenerateOutcome::Generated(n))
            }
            None => Ok(GenerateOutcome::AlreadyExists),
        }
    }

    /// Advance the ramp for the account's current local date. None when already advanced today.
    pub fn advance_ramp_day(&self, account_id: &str) -> Result<Option<RampAdvance>> {
        let mut account = self.db.get_account(account_id)?;
        let today = account.local_date(self.clock.now());
        self.advance_on(&mut account, today)
    }

    pub(crate) fn advance_on(&self, account: &mut Account, today: NaiveDate) -> Result<Option<RampAdvance>> {
        let Some(advance) = ramp::advance_day(account, today) else {
            return Ok(None);
        };
        account.updated_at = self.clock.now();
        self.db.update_account(account)?;

        if advance.phase_changed {
            tracing::info!(
                "🚀 {} entered {} (quota {} → {})",
                account.email,
                advance.phase.label(advance.new_day),
                advance.old_quota,
                advance.new_quota
            );
        } else {
            tracing::debug!(
                "📈 {} day {} → {}, quota {}",
                account.email,
                advance.old_day,
                advance.new_day,
                advance.new_quota
            );
        }
        Ok(Some(advance))
    }

    /// Persist an open/reply decision. Only the first decision for a message counts.
    pub fn record_engagement_decision(&self, message_id: &str, opened: bool, replied: bool) -> Result<bool> {
        let recorded = self
            .db
            .record_engagement_decision(message_id, opened, replied, self.clock.now())?;
        if !recorded {
            tracing::debug!("⏭️ Message {} already processed", message_id);
        }
        Ok(recorded)
    }

    /// Deactivate an account and skip its pending slots. Returns how many were skipped.
    pub fn deactivate_account(&self, account_id: &str) -> Result<usize> {
        let now = self.clock.now();
        if !self.db.set_account_active(account_id, false, now)? {
            return Err(WarmupError::NotFound(format!("account {account_id}")));
        }
        let skipped = self
            .db
            .skip_pending_for_account(account_id, "account deactivated", now)?;
        tracing::info!("⏸️ Deactivated {} ({} pending slots skipped)", account_id, skipped);
        Ok(skipped)
    }

    // ── Triggers ──────────────────────────────────────────

    /// Run one pass and summarize it.
    pub async fn run_pass(&self, pass: Pass) -> Result<String> {
        Ok(match pass {
            Pass::Generate => self.generate_pass()?.to_string(),
            Pass::Dispatch => self.dispatch_pass().await?.to_string(),
            Pass::Reschedule => self.reschedule_pass()?.to_string(),
            Pass::Engagement => self.engagement_pass().await?.to_string(),
            Pass::Replies => self.reply_pass().await?.to_string(),
            Pass::Spam => self.spam_pass().await?.to_string(),
            Pass::Score => self.score_pass()?.to_string(),
            Pass::Cleanup => self.cleanup_pass()?.to_string(),
        })
    }

    /// Spawn every trigger loop. Each ticks on its own interval; a failed pass is logged and retried next tick.
    pub fn spawn_triggers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        tracing::info!("📮 Mailbox backend: {}", self.mailbox.name());
        Pass::ALL
            .iter()
            .map(|&pass| spawn_trigger(Arc::clone(self), pass))
            .collect()
    }
}

fn spawn_trigger(scheduler: Arc<Scheduler>, pass: Pass) -> JoinHandle<()> {
    let every = pass.period_secs(&scheduler.config.triggers).max(1);
    tracing::info!("⏰ {} trigger started (every {}s)", pass, every);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(every));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match scheduler.run_pass(pass).await {
                Ok(summary) => tracing::info!("✅ [{}] {}", pass, summary),
                Err(e) => tracing::error!("❌ [{}] pass aborted: {}", pass, e),
            }
        }
    })
}
