//! In-memory mailbox, canned content and a pinned clock for pass tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use inboxwarm_core::config::WarmupConfig;
use inboxwarm_core::error::{Result, WarmupError};
use inboxwarm_core::ramp;
use inboxwarm_core::traits::{Composed, ContentKind, ContentSource, Mailbox};
use inboxwarm_core::types::{Account, Credential, InboundMessage, Message, Role, address_of};
use inboxwarm_core::ManualClock;
use inboxwarm_db::WarmupDb;

use crate::engine::Scheduler;

/// Monday 2026-03-02 at `h:m` UTC.
pub(crate) fn monday(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
}

#[derive(Debug, Clone)]
pub(crate) struct SentMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub in_reply_to: Option<String>,
    pub provider_id: String,
}

#[derive(Debug, Clone)]
struct Stored {
    owner: String,
    mail: InboundMessage,
    read: bool,
    spam: bool,
}

/// Mailbox where every send lands in the recipient's inbox.
#[derive(Default)]
pub(crate) struct FakeMailbox {
    pub sent: Mutex<Vec<SentMail>>,
    pub important: Mutex<Vec<String>>,
    pub fail_sends: AtomicBool,
    pub fail_unmark: AtomicBool,
    pub refresh_credential: AtomicBool,
    /// Every send or reply call, failed ones included.
    pub attempts: AtomicUsize,
    store: Mutex<Vec<Stored>>,
    seq: AtomicUsize,
}

impl FakeMailbox {
    fn next_id(&self) -> usize {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn deliver(&self, owner: &str, mail: InboundMessage) {
        self.push(owner, mail, false);
    }

    pub fn deliver_spam(&self, owner: &str, mail: InboundMessage) {
        self.push(owner, mail, true);
    }

    fn push(&self, owner: &str, mail: InboundMessage, spam: bool) {
        self.store.lock().unwrap().push(Stored {
            owner: owner.to_lowercase(),
            mail,
            read: false,
            spam,
        });
    }

    pub fn is_read(&self, id: &str) -> bool {
        self.store
            .lock()
            .unwrap()
            .iter()
            .any(|s| s.mail.id == id && s.read)
    }

    pub fn in_spam(&self, id: &str) -> bool {
        self.store.lock().unwrap().iter().any(|s| s.mail.id == id && s.spam)
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn list(&self, account: &Account, senders: &[String], max: usize, spam: bool) -> Vec<InboundMessage> {
        let owner = account.email.to_lowercase();
        self.store
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|s| s.owner == owner && s.spam == spam && (spam || !s.read))
            .filter(|s| senders.iter().any(|f| f.eq_ignore_ascii_case(address_of(&s.mail.from))))
            .take(max)
            .map(|s| s.mail.clone())
            .collect()
    }

    fn deliver_sent(&self, from: &Account, to: &str, subject: &str, body: &str, in_reply_to: Option<&str>) -> Result<String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(WarmupError::Transient("smtp timeout".into()));
        }
        let n = self.next_id();
        let provider_id = format!("<{n}@fake.test>");
        self.sent.lock().unwrap().push(SentMail {
            from: from.email.clone(),
            to: to.to_string(),
            subject: subject.to_string(),
            in_reply_to: in_reply_to.map(str::to_string),
            provider_id: provider_id.clone(),
        });
        self.deliver(
            to,
            InboundMessage {
                id: format!("uid-{n}"),
                from: from.email.clone(),
                to: to.to_string(),
                subject: subject.to_string(),
                snippet: body.chars().take(40).collect(),
                internal_id: Some(provider_id.clone()),
            },
        );
        Ok(provider_id)
    }
}

#[async_trait]
impl Mailbox for FakeMailbox {
    fn name(&self) -> &str {
        "fake"
    }

    async fn authenticate(&self, account: &Account) -> Result<Option<Credential>> {
        if self.refresh_credential.load(Ordering::SeqCst) {
            return Ok(Some(Credential::new(format!("refreshed-{}", account.email))));
        }
        Ok(None)
    }

    async fn send(&self, account: &Account, to: &str, subject: &str, body: &str) -> Result<String> {
        self.deliver_sent(account, to, subject, body, None)
    }

    async fn reply(
        &self,
        account: &Account,
        to: &str,
        subject: &str,
        body: &str,
        in_reply_to: Option<&str>,
    ) -> Result<String> {
        self.deliver_sent(account, to, subject, body, in_reply_to)
    }

    async fn list_unread(&self, account: &Account, senders: &[String], max: usize) -> Result<Vec<InboundMessage>> {
        Ok(self.list(account, senders, max, false))
    }

    async fn mark_read(&self, _account: &Account, id: &str) -> Result<()> {
        for s in self.store.lock().unwrap().iter_mut().filter(|s| s.mail.id == id) {
            s.read = true;
        }
        Ok(())
    }

    async fn mark_important(&self, _account: &Account, id: &str) -> Result<()> {
        self.important.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn is_opened(&self, _account: &Account, id: &str) -> Result<bool> {
        Ok(self.is_read(id))
    }

    async fn list_spam(&self, account: &Account, senders: &[String], max: usize) -> Result<Vec<InboundMessage>> {
        Ok(self.list(account, senders, max, true))
    }

    async fn unmark_spam(&self, _account: &Account, id: &str) -> Result<()> {
        if self.fail_unmark.load(Ordering::SeqCst) {
            return Err(WarmupError::Mailbox("move failed".into()));
        }
        for s in self.store.lock().unwrap().iter_mut().filter(|s| s.mail.id == id) {
            s.spam = false;
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeContent {
    seq: AtomicUsize,
}

#[async_trait]
impl ContentSource for FakeContent {
    async fn compose(&self, kind: ContentKind) -> Result<Composed> {
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(match kind {
            ContentKind::Outbound => Composed {
                subject: format!("Checking in #{n}"),
                body: format!("Hi, just checking in ({n})."),
            },
            ContentKind::Reply { subject } => Composed {
                subject: format!("Re: {subject}"),
                body: "Thanks, sounds good.".into(),
            },
        })
    }
}

/// Deterministic config: fixed seed, no sleeps.
pub(crate) fn test_config() -> WarmupConfig {
    let mut config = WarmupConfig {
        seed: Some(7),
        ..WarmupConfig::default()
    };
    config.dispatch.initial_jitter_max_secs = 0;
    config.dispatch.stagger_min_secs = 0;
    config.dispatch.stagger_max_secs = 0;
    config.spam.delay_min_secs = 0;
    config.spam.delay_max_secs = 0;
    config.engagement.important_delay_min_secs = 0;
    config.engagement.important_delay_max_secs = 0;
    config
}

pub(crate) struct Harness {
    pub db: Arc<WarmupDb>,
    pub mailbox: Arc<FakeMailbox>,
    pub clock: Arc<ManualClock>,
    pub scheduler: Scheduler,
}

pub(crate) fn harness(now: DateTime<Utc>) -> Harness {
    harness_with(now, test_config())
}

pub(crate) fn harness_with(now: DateTime<Utc>, config: WarmupConfig) -> Harness {
    let db = Arc::new(WarmupDb::open(std::path::Path::new(":memory:")).unwrap());
    harness_on(db, now, config)
}

/// Harness over a caller-provided store, e.g. a file the test also opens directly.
pub(crate) fn harness_on(db: Arc<WarmupDb>, now: DateTime<Utc>, config: WarmupConfig) -> Harness {
    let mailbox = Arc::new(FakeMailbox::default());
    let clock = Arc::new(ManualClock::new(now));
    let scheduler = Scheduler::new(db.clone(), mailbox.clone(), Arc::new(FakeContent::default()), config)
        .with_clock(clock.clone());
    Harness {
        db,
        mailbox,
        clock,
        scheduler,
    }
}

impl Harness {
    pub fn warmup(&self, email: &str, ramp_day: i32, target: u32) -> Account {
        let mut acct = Account::new(email, Role::Warmup, "UTC");
        acct.ramp_day = ramp_day;
        acct.target_volume = target;
        acct.daily_quota = ramp::daily_quota(ramp_day, target);
        self.db.insert_account(&acct).unwrap();
        acct
    }

    pub fn pool(&self, email: &str) -> Account {
        let acct = Account::new(email, Role::Pool, "UTC");
        self.db.insert_account(&acct).unwrap();
        acct
    }

    /// Record a message as if dispatch had sent it, and deliver it to the recipient.
    pub fn sent_message(&self, sender: &Account, to: &str, subject: &str, at: DateTime<Utc>) -> Message {
        let n = self.mailbox.next_id();
        let provider_id = format!("<seed-{n}@fake.test>");
        let msg = Message::sent(sender, to, subject, "hello", Some(provider_id.clone()), at);
        self.db.insert_message(&msg).unwrap();
        self.mailbox.deliver(
            to,
            InboundMessage {
                id: format!("uid-{n}"),
                from: sender.email.clone(),
                to: to.to_string(),
                subject: subject.to_string(),
                snippet: "hello".into(),
                internal_id: Some(provider_id),
            },
        );
        msg
    }
}
