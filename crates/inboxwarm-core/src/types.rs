//! Persisted data model: accounts, schedule slots, sent messages, spam records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WarmupError};

/// Account role: a warmup sender or an engagement pool recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Warmup,
    Pool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warmup => "warmup",
            Self::Pool => "pool",
        }
    }
}

impl FromStr for Role {
    type Err = WarmupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "warmup" => Ok(Self::Warmup),
            "pool" => Ok(Self::Pool),
            other => Err(WarmupError::Data(format!("unknown role '{other}'"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a schedule slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Pending,
    Sent,
    Failed,
    Skipped,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// `sent` and `skipped` never move again; `failed` can be re-armed by the sweep.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Skipped)
    }

    pub fn can_transition_to(&self, next: SlotStatus) -> bool {
        use SlotStatus::*;
        matches!(
            (self, next),
            (Pending, Sent) | (Pending, Failed) | (Pending, Skipped) | (Failed, Pending)
        )
    }

    /// Statuses the reschedule sweep may move to a new instant: failed slots,
    /// and pending ones that went stale without being claimed.
    pub fn can_rearm_from(&self) -> bool {
        !self.is_terminal()
    }
}

impl FromStr for SlotStatus {
    type Err = WarmupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(WarmupError::Data(format!("unknown slot status '{other}'"))),
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time-of-day bucket a slot was drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityPeriod {
    Peak,
    Normal,
    Low,
}

impl ActivityPeriod {
    pub const ALL: [ActivityPeriod; 3] = [Self::Peak, Self::Normal, Self::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Peak => "peak",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl FromStr for ActivityPeriod {
    type Err = WarmupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "peak" => Ok(Self::Peak),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            other => Err(WarmupError::Data(format!("unknown activity period '{other}'"))),
        }
    }
}

impl fmt::Display for ActivityPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpamStatus {
    Detected,
    Recovered,
    Failed,
}

impl SpamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Recovered => "recovered",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for SpamStatus {
    type Err = WarmupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "detected" => Ok(Self::Detected),
            "recovered" => Ok(Self::Recovered),
            "failed" => Ok(Self::Failed),
            other => Err(WarmupError::Data(format!("unknown spam status '{other}'"))),
        }
    }
}

impl fmt::Display for SpamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque provider credential. Only the mailbox adapter interprets it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(pub String);

impl Credential {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// A mailbox identity, either being warmed up or serving as an engagement recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub role: Role,
    /// IANA timezone name, e.g. "Asia/Kolkata".
    pub timezone: String,
    /// Target open rate as a fraction in [0, 1].
    pub target_open_rate: f64,
    /// Target reply rate as a fraction in [0, 1].
    pub target_reply_rate: f64,
    /// Daily volume the ramp converges to.
    pub target_volume: u32,
    /// Current ramp day; 0 means the ramp has not started.
    pub ramp_day: i32,
    pub daily_quota: u32,
    pub active: bool,
    /// Account-local date of the last ramp advance.
    pub last_advanced_on: Option<NaiveDate>,
    /// Per-account override of the open-rate margin band.
    pub open_margin: Option<f64>,
    pub credential: Option<Credential>,
    pub score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(email: impl Into<String>, role: Role, timezone: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.into(),
            display_name: None,
            role,
            timezone: timezone.into(),
            target_open_rate: 0.80,
            target_reply_rate: 0.55,
            target_volume: 50,
            ramp_day: 0,
            daily_quota: 0,
            active: true,
            last_advanced_on: None,
            open_margin: None,
            credential: None,
            score: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_warmup(&self) -> bool {
        self.role == Role::Warmup
    }

    /// Warmup accounts that are active and participate in the ramp.
    pub fn is_sending(&self) -> bool {
        self.active && self.is_warmup()
    }

    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| WarmupError::Config(format!("invalid timezone '{}': {e}", self.timezone)))
    }

    /// Timezone, falling back to UTC with a warning for unparsable names.
    pub fn tz_or_utc(&self) -> Tz {
        match self.tz() {
            Ok(tz) => tz,
            Err(e) => {
                tracing::warn!("⚠️ {} ({}), using UTC", e, self.email);
                Tz::UTC
            }
        }
    }

    /// Today's date in the account's own calendar.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz_or_utc()).date_naive()
    }
}

/// One planned send for a warmup account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub id: String,
    pub account_id: String,
    pub scheduled_at: DateTime<Utc>,
    /// Account-local date the slot was generated for.
    pub schedule_date: NaiveDate,
    pub period: ActivityPeriod,
    pub status: SlotStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub message_id: Option<String>,
    /// Dispatch lease; set while a worker is sending this slot.
    pub claimed_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleSlot {
    pub fn pending(
        account_id: &str,
        scheduled_at: DateTime<Utc>,
        schedule_date: NaiveDate,
        period: ActivityPeriod,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            scheduled_at,
            schedule_date,
            period,
            status: SlotStatus::Pending,
            retry_count: 0,
            last_error: None,
            message_id: None,
            claimed_at: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Record of a sent warmup message, with the sender's rates captured at send time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    /// Id returned by the mailbox provider on send.
    pub provider_id: Option<String>,
    pub open_rate: Option<f64>,
    pub reply_rate: Option<f64>,
    pub opened: bool,
    pub replied: bool,
    pub processed: bool,
    pub sent_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub replied_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn sent(
        sender: &Account,
        recipient: &str,
        subject: &str,
        body: &str,
        provider_id: Option<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: sender.id.clone(),
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            provider_id,
            open_rate: Some(sender.target_open_rate),
            reply_rate: Some(sender.target_reply_rate),
            opened: false,
            replied: false,
            processed: false,
            sent_at,
            opened_at: None,
            replied_at: None,
            processed_at: None,
        }
    }
}

/// A message found in a pool account's spam folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamRecord {
    pub id: String,
    /// None when the original send could not be matched.
    pub message_id: Option<String>,
    pub pool_account_id: String,
    pub sender_account_id: Option<String>,
    pub provider_id: String,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub snippet: String,
    pub status: SpamStatus,
    pub recovery_attempts: u32,
    pub detected_at: DateTime<Utc>,
    pub recovered_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Mail as seen by the `Mailbox` listing calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Provider-side handle used for mark/unmark calls.
    pub id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub snippet: String,
    /// Provider message id of the original send, when the transport exposes it.
    pub internal_id: Option<String>,
}

/// Bare address from a `From` value, either `addr` or `Name <addr>`.
pub fn address_of(from: &str) -> &str {
    match (from.rfind('<'), from.rfind('>')) {
        (Some(start), Some(end)) if start < end => from[start + 1..end].trim(),
        _ => from.trim(),
    }
}
