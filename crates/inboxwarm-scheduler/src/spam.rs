//! Spam recovery pass: pool accounts move warmup mail out of their spam
//! folder. Each detection is recorded once per (pool account, provider id);
//! every attempt bumps its counter.

use std::time::Duration;

use inboxwarm_core::error::{Result, WarmupError};
use inboxwarm_core::types::{Account, InboundMessage, Role, SpamRecord, SpamStatus, address_of};
use rand::Rng;

use crate::engine::Scheduler;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpamReport {
    pub inboxes: usize,
    pub found: usize,
    pub detected: usize,
    pub recovered: usize,
    pub failed: usize,
    pub orphaned: usize,
}

impl std::fmt::Display for SpamReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} inboxes, {} in spam ({} new, {} unmatched): {} recovered, {} failed",
            self.inboxes, self.found, self.detected, self.orphaned, self.recovered, self.failed
        )
    }
}

impl Scheduler {
    pub async fn spam_pass(&self) -> Result<SpamReport> {
        let mut report = SpamReport::default();
        let senders = self.db.active_emails(Role::Warmup)?;
        if senders.is_empty() {
            return Ok(report);
        }

        for pool in self.db.list_accounts(Some(Role::Pool), true)? {
            report.inboxes += 1;
            match self.recover_inbox(&pool, &senders, &mut report).await {
                Ok(()) => {}
                Err(e) if e.is_fatal_for_pass() => return Err(e),
                Err(e) => tracing::warn!("⚠️ Spam check skipped for {}: {}", pool.email, e),
            }
        }

        if report.found > 0 {
            tracing::info!("🛡️ Spam pass: {}", report);
        }
        Ok(report)
    }

    async fn recover_inbox(&self, pool: &Account, senders: &[String], report: &mut SpamReport) -> Result<()> {
        let pool = self.authenticated(pool).await?;
        let found = self
            .mailbox
            .list_spam(&pool, senders, self.config.spam.max_messages)
            .await?;

        for (i, mail) in found.iter().enumerate() {
            report.found += 1;
            let record = match self.db.find_spam_record(&pool.id, &mail.id)? {
                Some(r) if r.status == SpamStatus::Recovered => continue,
                Some(r) => r,
                None => {
                    let record = self.detect(&pool, mail)?;
                    report.detected += 1;
                    report.orphaned += usize::from(record.message_id.is_none());
                    record
                }
            };

            if i > 0 {
                let lo = self.config.spam.delay_min_secs;
                let hi = self.config.spam.delay_max_secs.max(lo);
                let pause = self.with_rng(|rng| rng.gen_range(lo..=hi));
                if pause > 0 {
                    tokio::time::sleep(Duration::from_secs(pause)).await;
                }
            }

            match self.mailbox.unmark_spam(&pool, &mail.id).await {
                Ok(()) => {
                    self.db
                        .record_spam_attempt(&record.id, SpamStatus::Recovered, None, self.clock.now())?;
                    report.recovered += 1;
                    tracing::debug!("📥 {} recovered \"{}\" from spam", pool.email, mail.subject);
                }
                Err(e) if e.is_fatal_for_pass() => return Err(e),
                Err(e) => {
                    let err = e.to_string();
                    self.db
                        .record_spam_attempt(&record.id, SpamStatus::Failed, Some(&err), self.clock.now())?;
                    report.failed += 1;
                    tracing::warn!("⚠️ {} could not recover {}: {}", pool.email, mail.id, err);
                }
            }
        }
        Ok(())
    }

    /// Store a new detection, linked to its warmup message when one can be found.
    fn detect(&self, pool: &Account, mail: &InboundMessage) -> Result<SpamRecord> {
        let from = address_of(&mail.from);
        let sender = match self.db.get_account_by_email(from) {
            Ok(account) => Some(account),
            Err(WarmupError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let by_provider = match mail.internal_id.as_deref() {
            Some(id) => self.db.find_message_by_provider_id(id)?,
            None => None,
        };
        let message = match (by_provider, &sender) {
            (Some(m), _) => Some(m),
            (None, Some(s)) => self.db.find_sent_message(&s.id, &pool.email, &mail.subject)?,
            (None, None) => None,
        };

        let now = self.clock.now();
        let record = SpamRecord {
            id: uuid::Uuid::new_v4().to_string(),
            message_id: message.as_ref().map(|m| m.id.clone()),
            pool_account_id: pool.id.clone(),
            sender_account_id: sender
                .as_ref()
                .map(|s| s.id.clone())
                .or_else(|| message.as_ref().map(|m| m.sender_id.clone())),
            provider_id: mail.id.clone(),
            subject: mail.subject.clone(),
            from: mail.from.clone(),
            to: mail.to.clone(),
            snippet: mail.snippet.clone(),
            status: SpamStatus::Detected,
            recovery_attempts: 0,
            detected_at: now,
            recovered_at: None,
            last_attempt_at: None,
            error: None,
        };
        self.db.insert_spam_record(&record)?;
        if record.message_id.is_none() {
            tracing::warn!("❓ Spam message \"{}\" in {} has no warmup record", mail.subject, pool.email);
        }
        Ok(record)
    }
}
