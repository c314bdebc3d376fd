//! Engagement pass: pool inboxes open, reply to and occasionally flag warmup
//! mail so the sender's observed open rate tracks its target.

use std::time::Duration;

use inboxwarm_core::error::{Result, WarmupError};
use inboxwarm_core::traits::ContentKind;
use inboxwarm_core::types::{Account, InboundMessage, Message, Role};
use inboxwarm_engagement::{EngagementHistory, OpenReason};

use crate::engine::Scheduler;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngagementReport {
    pub inboxes: usize,
    pub seen: usize,
    pub opened: usize,
    pub skipped: usize,
    pub replied: usize,
    pub important: usize,
    pub not_ready: usize,
    pub unmatched: usize,
    pub errors: usize,
}

impl std::fmt::Display for EngagementReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} inboxes, {} messages: {} opened, {} left unopened, {} replied, {} flagged, {} waiting, {} unmatched, {} errors",
            self.inboxes,
            self.seen,
            self.opened,
            self.skipped,
            self.replied,
            self.important,
            self.not_ready,
            self.unmatched,
            self.errors
        )
    }
}

#[derive(Debug)]
enum Engaged {
    Opened { replied: bool, important: bool },
    Skipped,
    NotReady,
    Unmatched,
    AlreadyProcessed,
}

impl Scheduler {
    pub async fn engagement_pass(&self) -> Result<EngagementReport> {
        let mut report = EngagementReport::default();
        let senders = self.db.active_emails(Role::Warmup)?;
        if senders.is_empty() {
            return Ok(report);
        }

        for pool in self.db.list_accounts(Some(Role::Pool), true)? {
            report.inboxes += 1;
            match self.engage_inbox(&pool, &senders, &mut report).await {
                Ok(()) => {}
                Err(e) if e.is_fatal_for_pass() => return Err(e),
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!("⚠️ Engagement skipped for {}: {}", pool.email, e);
                }
            }
        }

        Ok(report)
    }

    async fn engage_inbox(&self, pool: &Account, senders: &[String], report: &mut EngagementReport) -> Result<()> {
        let pool = self.authenticated(pool).await?;
        let unread = self
            .mailbox
            .list_unread(&pool, senders, self.config.engagement.max_unread)
            .await?;

        for mail in &unread {
            report.seen += 1;
            match self.engage_message(&pool, mail).await {
                Ok(Engaged::Opened { replied, important }) => {
                    report.opened += 1;
                    report.replied += usize::from(replied);
                    report.important += usize::from(important);
                }
                Ok(Engaged::Skipped) => report.skipped += 1,
                Ok(Engaged::NotReady) => report.not_ready += 1,
                Ok(Engaged::Unmatched) | Ok(Engaged::AlreadyProcessed) => report.unmatched += 1,
                Err(e) if e.is_fatal_for_pass() => return Err(e),
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!("⚠️ {} message {}: {}", pool.email, mail.id, e);
                }
            }
        }
        Ok(())
    }

    /// Find the warmup message behind an inbound mail: provider id first, then recipient + subject.
    pub(crate) fn match_inbound(&self, pool: &Account, mail: &InboundMessage) -> Result<Option<Message>> {
        if let Some(internal_id) = mail.internal_id.as_deref() {
            if let Some(message) = self.db.find_message_by_provider_id(internal_id)? {
                return Ok(Some(message));
            }
        }
        self.db.find_unprocessed_message(&pool.email, &mail.subject)
    }

    async fn engage_message(&self, pool: &Account, mail: &InboundMessage) -> Result<Engaged> {
        let message = match self.match_inbound(pool, mail)? {
            Some(m) if !m.processed => m,
            Some(_) => {
                self.mailbox.mark_read(pool, &mail.id).await?;
                return Ok(Engaged::AlreadyProcessed);
            }
            None => {
                tracing::debug!("❓ No warmup record for \"{}\" in {}", mail.subject, pool.email);
                self.mailbox.mark_read(pool, &mail.id).await?;
                return Ok(Engaged::Unmatched);
            }
        };

        let now = self.clock.now();
        if !self.engagement.is_ready(message.sent_at, now) {
            return Ok(Engaged::NotReady);
        }

        let sender = match self.db.get_account(&message.sender_id) {
            Ok(sender) => sender,
            Err(WarmupError::NotFound(_)) => {
                tracing::debug!("❓ Sender of \"{}\" is gone, dropping it from {}", message.subject, pool.email);
                self.mailbox.mark_read(pool, &mail.id).await?;
                return Ok(Engaged::Unmatched);
            }
            Err(e) => return Err(e),
        };
        let stats = self.db.sender_stats(&sender.id)?;
        let history = EngagementHistory {
            processed: stats.processed,
            opened: stats.opened,
        };
        let margin = self.engagement.margin_for(sender.open_margin);
        let (decision, wants_reply, important) = self.with_rng(|rng| {
            let target = self.engagement.target_open_rate(message.open_rate, rng);
            let decision = self.engagement.decide_open(target, history, margin, rng);
            let reply = self.engagement.decide_reply(decision.open, message.reply_rate, rng);
            let important = self.engagement.decide_important(decision.open, rng);
            (decision, reply, important)
        });

        if !self.record_engagement_decision(&message.id, decision.open, false)? {
            return Ok(Engaged::AlreadyProcessed);
        }
        self.mailbox.mark_read(pool, &mail.id).await?;

        if matches!(decision.reason, OpenReason::ForcedOpen | OpenReason::ForcedSkip) {
            tracing::debug!(
                "🎯 {} observed {:.2} vs target {:.2}: {:?}",
                sender.email,
                decision.observed.unwrap_or(0.0),
                decision.target,
                decision.reason
            );
        }
        if !decision.open {
            return Ok(Engaged::Skipped);
        }

        let mut replied = false;
        if wants_reply {
            match self.send_reply(pool, &sender, &message).await {
                Ok(()) => {
                    self.db.mark_message_replied(&message.id, self.clock.now())?;
                    replied = true;
                }
                Err(e) if e.is_fatal_for_pass() => return Err(e),
                Err(e) => tracing::warn!("⚠️ Reply from {} failed: {}", pool.email, e),
            }
        }

        if let Some(flag) = important {
            self.spawn_important(pool.clone(), mail.id.clone(), message.id.clone(), flag.delay);
        }

        Ok(Engaged::Opened {
            replied,
            important: important.is_some(),
        })
    }

    async fn send_reply(&self, pool: &Account, sender: &Account, message: &Message) -> Result<()> {
        let composed = self
            .content
            .compose(ContentKind::Reply {
                subject: message.subject.clone(),
            })
            .await?;
        self.mailbox
            .reply(
                pool,
                &sender.email,
                &composed.subject,
                &composed.body,
                message.provider_id.as_deref(),
            )
            .await?;
        tracing::debug!("💬 {} replied to \"{}\"", pool.email, message.subject);
        Ok(())
    }

    /// Flag the mail after `delay`, if it is still opened by then.
    fn spawn_important(&self, pool: Account, mail_id: String, message_id: String, delay: Duration) {
        let db = self.db.clone();
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match db.get_message(&message_id) {
                Ok(m) if m.opened => {}
                Ok(_) => return,
                Err(e) => {
                    tracing::warn!("⚠️ Important check failed for {}: {}", message_id, e);
                    return;
                }
            }
            match mailbox.is_opened(&pool, &mail_id).await {
                Ok(true) => match mailbox.mark_important(&pool, &mail_id).await {
                    Ok(()) => tracing::debug!("⭐ {} flagged {}", pool.email, mail_id),
                    Err(e) => tracing::warn!("⚠️ Flag failed for {}: {}", mail_id, e),
                },
                Ok(false) => tracing::debug!("⏭️ {} no longer opened, not flagged", mail_id),
                Err(e) => tracing::warn!("⚠️ Open check failed for {}: {}", mail_id, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::*;
    use chrono::Duration;
    use inboxwarm_core::types::InboundMessage;
    use inboxwarm_db::WarmupDb;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_young_mail_waits() {
        let h = harness(monday(10, 0));
        let sender = h.warmup("w@warm.test", 10, 50);
        h.pool("p@pool.test");
        let msg = h.sent_message(&sender, "p@pool.test", "hello", monday(10, 0) - Duration::seconds(10));

        let report = h.scheduler.engagement_pass().await.unwrap();
        assert_eq!(report.not_ready, 1);
        assert!(!h.db.get_message(&msg.id).unwrap().processed);
    }

    #[tokio::test]
    async fn test_every_message_processed_exactly_once() {
        let h = harness(monday(12, 0));
        let sender = h.warmup("w@warm.test", 10, 50);
        h.pool("p@pool.test");
        let msgs: Vec<_> = (0..10)
            .map(|i| h.sent_message(&sender, "p@pool.test", &format!("topic {i}"), monday(10, i)))
            .collect();

        let report = h.scheduler.engagement_pass().await.unwrap();
        assert_eq!(report.opened + report.skipped, 10);
        for m in &msgs {
            assert!(h.db.get_message(&m.id).unwrap().processed);
        }

        // mail was marked read, so a second pass sees nothing
        let again = h.scheduler.engagement_pass().await.unwrap();
        assert_eq!(again.seen, 0);
    }

    #[tokio::test]
    async fn test_below_target_forces_opens() {
        let h = harness(monday(12, 0));
        let sender = h.warmup("w@warm.test", 10, 50);
        h.pool("p@pool.test");
        // 20 processed, 4 opened: far below 0.80
        for i in 0..20 {
            let m = h.sent_message(&sender, "elsewhere@pool.test", &format!("old {i}"), monday(9, i));
            h.db
                .record_engagement_decision(&m.id, i < 4, false, monday(9, 30))
                .unwrap();
        }
        let fresh = h.sent_message(&sender, "p@pool.test", "new", monday(11, 0));

        h.scheduler.engagement_pass().await.unwrap();
        let stored = h.db.get_message(&fresh.id).unwrap();
        assert!(stored.processed && stored.opened);
    }

    #[tokio::test]
    async fn test_unknown_mail_is_marked_read() {
        let h = harness(monday(12, 0));
        let sender = h.warmup("w@warm.test", 10, 50);
        h.pool("p@pool.test");
        h.mailbox.deliver(
            "p@pool.test",
            InboundMessage {
                id: "stray-1".into(),
                from: sender.email.clone(),
                to: "p@pool.test".into(),
                subject: "not ours".into(),
                ..Default::default()
            },
        );

        let report = h.scheduler.engagement_pass().await.unwrap();
        assert_eq!(report.unmatched, 1);
        assert!(h.mailbox.is_read("stray-1"));
    }

    #[tokio::test]
    async fn test_replies_thread_under_original() {
        let mut config = test_config();
        config.engagement.fallback_reply_range = (1.0, 1.0);
        config.engagement.reply_jitter = 0.0;
        let h = harness_with(monday(12, 0), config);
        let mut sender = h.warmup("w@warm.test", 10, 50);
        sender.target_open_rate = 1.0;
        sender.target_reply_rate = 1.0;
        h.db.update_account(&sender).unwrap();
        h.pool("p@pool.test");
        let msg = h.sent_message(&sender, "p@pool.test", "lunch?", monday(11, 0));

        let report = h.scheduler.engagement_pass().await.unwrap();
        assert_eq!((report.opened, report.replied), (1, 1));
        let stored = h.db.get_message(&msg.id).unwrap();
        assert!(stored.replied);

        let sent = h.mailbox.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, "p@pool.test");
        assert_eq!(sent[0].to, "w@warm.test");
        assert_eq!(sent[0].subject, "Re: lunch?");
        assert_eq!(sent[0].in_reply_to, msg.provider_id);
    }

    #[tokio::test]
    async fn test_important_flag_after_delay() {
        let mut config = test_config();
        config.engagement.important_min = 1.0;
        config.engagement.important_max = 1.0;
        let h = harness_with(monday(12, 0), config);
        let mut sender = h.warmup("w@warm.test", 10, 50);
        sender.target_open_rate = 1.0;
        sender.target_reply_rate = 0.0;
        h.db.update_account(&sender).unwrap();
        h.pool("p@pool.test");
        h.sent_message(&sender, "p@pool.test", "flag me", monday(11, 0));

        let report = h.scheduler.engagement_pass().await.unwrap();
        assert_eq!(report.important, 1);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(h.mailbox.important.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mail_from_deleted_sender_is_marked_read() {
        let path = std::env::temp_dir().join(format!("inboxwarm-engage-{}.db", uuid::Uuid::new_v4()));
        let db = Arc::new(WarmupDb::open(&path).unwrap());
        let h = harness_on(db, monday(12, 0), test_config());
        let gone = h.warmup("gone@warm.test", 10, 50);
        h.warmup("w@warm.test", 10, 50);
        h.pool("p@pool.test");
        let msg = h.sent_message(&gone, "p@pool.test", "orphan", monday(11, 0));

        // drop the sender row but keep its message; foreign keys are per connection
        let raw = rusqlite::Connection::open(&path).unwrap();
        raw.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
        raw.execute("DELETE FROM accounts WHERE id = ?1", [&gone.id]).unwrap();
        drop(raw);

        h.mailbox.deliver(
            "p@pool.test",
            InboundMessage {
                id: "orphan-1".into(),
                from: "w@warm.test".into(),
                to: "p@pool.test".into(),
                subject: "orphan".into(),
                internal_id: msg.provider_id.clone(),
                ..Default::default()
            },
        );

        let report = h.scheduler.engagement_pass().await.unwrap();
        assert_eq!((report.unmatched, report.errors), (1, 0));
        assert!(h.mailbox.is_read("orphan-1"));
        assert!(!h.db.get_message(&msg.id).unwrap().processed);

        // already read, not retried on the next pass
        assert_eq!(h.scheduler.engagement_pass().await.unwrap().seen, 0);

        drop(h);
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }
}
