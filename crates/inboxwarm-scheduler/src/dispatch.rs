//! Dispatch pass: claim each due slot, send one warmup message to a random
//! pool address, resolve the slot.
//!
//! The claim lease is what makes a send at-most-once: a slot is only sent by
//! the worker whose claim won, and a claim that never resolves is turned into
//! `skipped` by the reschedule pass, never re-sent.

use std::time::Duration;

use inboxwarm_core::error::{Result, WarmupError};
use inboxwarm_core::traits::ContentKind;
use inboxwarm_core::types::{Account, Message, Role, ScheduleSlot};
use rand::Rng;

use crate::engine::Scheduler;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Claimed by another worker first.
    pub lost: usize,
}

impl std::fmt::Display for DispatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} due: {} sent, {} failed, {} skipped, {} claimed elsewhere",
            self.due, self.sent, self.failed, self.skipped, self.lost
        )
    }
}

#[derive(Debug)]
enum SlotOutcome {
    Sent,
    Failed,
    Skipped,
    Lost,
}

impl Scheduler {
    pub async fn dispatch_pass(&self) -> Result<DispatchReport> {
        let cfg = &self.config.dispatch;
        let jitter = self.with_rng(|rng| rng.gen_range(0..=cfg.initial_jitter_max_secs));
        if jitter > 0 {
            tokio::time::sleep(Duration::from_secs(jitter)).await;
        }

        let due = self.due_slots(self.clock.now())?;
        let mut report = DispatchReport {
            due: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return Ok(report);
        }
        let pool = self.db.list_accounts(Some(Role::Pool), true)?;

        for (i, slot) in due.iter().enumerate() {
            if i > 0 {
                let lo = cfg.stagger_min_secs;
                let hi = cfg.stagger_max_secs.max(lo);
                let pause = self.with_rng(|rng| rng.gen_range(lo..=hi));
                if pause > 0 {
                    tokio::time::sleep(Duration::from_secs(pause)).await;
                }
            }

            match self.dispatch_slot(slot, &pool).await {
                Ok(SlotOutcome::Sent) => report.sent += 1,
                Ok(SlotOutcome::Failed) => report.failed += 1,
                Ok(SlotOutcome::Skipped) => report.skipped += 1,
                Ok(SlotOutcome::Lost) => report.lost += 1,
                Err(e) if e.is_fatal_for_pass() => return Err(e),
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!("⚠️ Slot {} left for the sweep: {}", slot.id, e);
                }
            }
        }

        Ok(report)
    }

    async fn dispatch_slot(&self, slot: &ScheduleSlot, pool: &[Account]) -> Result<SlotOutcome> {
        let now = self.clock.now();
        if !self.db.claim_slot(&slot.id, now)? {
            return Ok(SlotOutcome::Lost);
        }

        let account = match self.db.get_account(&slot.account_id) {
            Ok(account) => account,
            Err(WarmupError::NotFound(_)) => {
                self.db.mark_slot_skipped(&slot.id, "account missing", now)?;
                return Ok(SlotOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };
        if !account.is_sending() {
            self.db.mark_slot_skipped(&slot.id, "account inactive", now)?;
            return Ok(SlotOutcome::Skipped);
        }

        match self.send_for_slot(&account, pool).await {
            Ok(message) => {
                // recorded even if the slot was skipped meanwhile: the send happened
                self.db.insert_message(&message)?;
                if self.db.mark_slot_sent(&slot.id, &message.id, self.clock.now())? {
                    tracing::info!("📤 {} → {} \"{}\"", account.email, message.recipient, message.subject);
                } else {
                    tracing::warn!(
                        "⚠️ Slot {} resolved during send; message {} kept",
                        slot.id,
                        message.id
                    );
                }
                Ok(SlotOutcome::Sent)
            }
            Err(e) if e.is_fatal_for_pass() => Err(e),
            Err(e) => {
                tracing::warn!("⚠️ Send failed for {} (slot {}): {}", account.email, slot.id, e);
                self.db.mark_slot_failed(&slot.id, &e.to_string(), self.clock.now())?;
                Ok(SlotOutcome::Failed)
            }
        }
    }

    async fn send_for_slot(&self, account: &Account, pool: &[Account]) -> Result<Message> {
        let account = self.authenticated(account).await?;

        let candidates: Vec<&Account> = pool
            .iter()
            .filter(|p| !p.email.eq_ignore_ascii_case(&account.email))
            .collect();
        if candidates.is_empty() {
            return Err(WarmupError::Data("no active pool recipients".into()));
        }
        let recipient = self.with_rng(|rng| candidates[rng.gen_range(0..candidates.len())].email.clone());

        let composed = self.content.compose(ContentKind::Outbound).await?;
        let provider_id = self
            .mailbox
            .send(&account, &recipient, &composed.subject, &composed.body)
            .await?;

        Ok(Message::sent(
            &account,
            &recipient,
            &composed.subject,
            &composed.body,
            Some(provider_id),
            self.clock.now(),
        ))
    }
}
