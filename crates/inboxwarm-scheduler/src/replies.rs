//! Reply pass: warmup inboxes pick up pool replies and tie each one back to
//! the newest unreplied message with the same conversation subject.

use inboxwarm_core::error::Result;
use inboxwarm_core::types::{Account, InboundMessage, Role, address_of};

use crate::engine::Scheduler;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyReport {
    pub inboxes: usize,
    pub seen: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub errors: usize,
}

impl std::fmt::Display for ReplyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} inboxes, {} replies seen, {} matched, {} unmatched, {} errors",
            self.inboxes, self.seen, self.matched, self.unmatched, self.errors
        )
    }
}

/// Subject without any leading `Re:` / `RE:` prefixes.
pub fn normalize_subject(subject: &str) -> &str {
    let mut rest = subject.trim();
    loop {
        match rest.get(..3) {
            Some(prefix) if prefix.eq_ignore_ascii_case("re:") => rest = rest[3..].trim_start(),
            _ => return rest,
        }
    }
}

impl Scheduler {
    pub async fn reply_pass(&self) -> Result<ReplyReport> {
        let mut report = ReplyReport::default();
        let pool = self.db.active_emails(Role::Pool)?;
        if pool.is_empty() {
            return Ok(report);
        }

        for account in self.db.list_accounts(Some(Role::Warmup), true)? {
            report.inboxes += 1;
            match self.scan_replies(&account, &pool, &mut report).await {
                Ok(()) => {}
                Err(e) if e.is_fatal_for_pass() => return Err(e),
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!("⚠️ Reply scan skipped for {}: {}", account.email, e);
                }
            }
        }
        Ok(report)
    }

    async fn scan_replies(&self, account: &Account, pool: &[String], report: &mut ReplyReport) -> Result<()> {
        let account = self.authenticated(account).await?;
        let unread = self
            .mailbox
            .list_unread(&account, pool, self.config.engagement.max_unread)
            .await?;

        for mail in &unread {
            report.seen += 1;
            match self.match_reply(&account, mail) {
                Ok(true) => report.matched += 1,
                Ok(false) => report.unmatched += 1,
                Err(e) if e.is_fatal_for_pass() => return Err(e),
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!("⚠️ {} reply {}: {}", account.email, mail.id, e);
                }
            }
            self.mailbox.mark_read(&account, &mail.id).await?;
        }
        Ok(())
    }

    fn match_reply(&self, account: &Account, mail: &InboundMessage) -> Result<bool> {
        let from = address_of(&mail.from);
        let subject = normalize_subject(&mail.subject);
        let candidates = self.db.unreplied_messages_to(&account.id, from)?;
        let Some(original) = candidates
            .iter()
            .find(|m| normalize_subject(&m.subject).eq_ignore_ascii_case(subject))
        else {
            tracing::debug!("❓ {} got \"{}\" from {} with no open thread", account.email, mail.subject, from);
            return Ok(false);
        };

        if self.db.mark_message_replied(&original.id, self.clock.now())? {
            tracing::info!("💬 {} got a reply from {} on \"{}\"", account.email, from, subject);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    #[test]
    fn test_normalize_subject() {
        assert_eq!(normalize_subject("Re: hello"), "hello");
        assert_eq!(normalize_subject("RE: re:Re: hello"), "hello");
        assert_eq!(normalize_subject("  hello  "), "hello");
        assert_eq!(normalize_subject("Rebuild plan"), "Rebuild plan");
        assert_eq!(normalize_subject("Re:"), "");
    }

    #[tokio::test]
    async fn test_reply_matched_to_newest_thread() {
        let h = harness(monday(12, 0));
        let sender = h.warmup("w@warm.test", 10, 50);
        h.pool("p@pool.test");
        let older = h.sent_message(&sender, "p@pool.test", "lunch?", monday(9, 0));
        let newer = h.sent_message(&sender, "p@pool.test", "lunch?", monday(10, 0));
        h.mailbox.deliver(
            "w@warm.test",
            InboundMessage {
                id: "r-1".into(),
                from: "Pat <p@pool.test>".into(),
                to: "w@warm.test".into(),
                subject: "Re: lunch?".into(),
                ..Default::default()
            },
        );
        // unmatched mail from the pool is still consumed
        h.mailbox.deliver(
            "w@warm.test",
            InboundMessage {
                id: "r-2".into(),
                from: "p@pool.test".into(),
                to: "w@warm.test".into(),
                subject: "Re: something else".into(),
                ..Default::default()
            },
        );

        let report = h.scheduler.reply_pass().await.unwrap();
        assert_eq!((report.matched, report.unmatched), (1, 1));
        assert!(h.db.get_message(&newer.id).unwrap().replied);
        assert!(!h.db.get_message(&older.id).unwrap().replied);
        assert!(h.mailbox.is_read("r-1") && h.mailbox.is_read("r-2"));
    }

    #[tokio::test]
    async fn test_early_reply_survives_engagement_decision() {
        let h = harness(monday(12, 0));
        let mut sender = h.warmup("w@warm.test", 10, 50);
        sender.target_open_rate = 0.0;
        sender.target_reply_rate = 0.0;
        h.db.update_account(&sender).unwrap();
        h.pool("p@pool.test");
        let msg = h.sent_message(&sender, "p@pool.test", "lunch?", monday(10, 0));
        h.mailbox.deliver(
            "w@warm.test",
            InboundMessage {
                id: "r-1".into(),
                from: "p@pool.test".into(),
                to: "w@warm.test".into(),
                subject: "Re: lunch?".into(),
                ..Default::default()
            },
        );

        // the pool replied before its inbox was engaged
        assert_eq!(h.scheduler.reply_pass().await.unwrap().matched, 1);
        h.clock.set(monday(12, 5));
        let engaged = h.scheduler.engagement_pass().await.unwrap();
        assert_eq!(engaged.opened + engaged.skipped, 1);

        let stored = h.db.get_message(&msg.id).unwrap();
        assert!(stored.processed);
        assert!(stored.replied);
        assert_eq!(stored.replied_at, Some(monday(12, 0)));
    }
}
