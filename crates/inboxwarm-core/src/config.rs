//! InboxWarm configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, WarmupError};

/// Root configuration, loaded from `~/.inboxwarm/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupConfig {
    /// Fixed RNG seed for reproducible runs; entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub defaults: AccountDefaults,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub reschedule: RescheduleConfig,
    #[serde(default)]
    pub engagement: EngagementConfig,
    #[serde(default)]
    pub spam: SpamConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub triggers: TriggerConfig,
    #[serde(default)]
    pub mailbox: MailboxConfig,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            seed: None,
            database: DatabaseConfig::default(),
            defaults: AccountDefaults::default(),
            timing: TimingConfig::default(),
            dispatch: DispatchConfig::default(),
            reschedule: RescheduleConfig::default(),
            engagement: EngagementConfig::default(),
            spam: SpamConfig::default(),
            retention: RetentionConfig::default(),
            triggers: TriggerConfig::default(),
            mailbox: MailboxConfig::default(),
        }
    }
}

impl WarmupConfig {
    /// Load config from the default path, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| WarmupError::Config(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| WarmupError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| WarmupError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.timing;
        if t.business_start_hour >= t.business_end_hour || t.business_end_hour > 24 {
            return Err(WarmupError::Config(format!(
                "business hours {}..{} are not a valid window",
                t.business_start_hour, t.business_end_hour
            )));
        }
        let e = &self.engagement;
        if !(0.0..=1.0).contains(&e.open_margin) {
            return Err(WarmupError::Config(format!(
                "engagement.open_margin must be in [0, 1], got {}",
                e.open_margin
            )));
        }
        if e.important_min > e.important_max || e.important_delay_min_secs > e.important_delay_max_secs
        {
            return Err(WarmupError::Config("engagement ranges must be ordered min <= max".into()));
        }
        if self.dispatch.stagger_min_secs > self.dispatch.stagger_max_secs {
            return Err(WarmupError::Config("dispatch stagger must be ordered min <= max".into()));
        }
        if self.defaults.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(WarmupError::Config(format!(
                "defaults.timezone '{}' is not an IANA timezone",
                self.defaults.timezone
            )));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the InboxWarm home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".inboxwarm")
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database.path).to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.inboxwarm/warmup.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Values applied to newly onboarded accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountDefaults {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_target_volume")]
    pub target_volume: u32,
    #[serde(default = "default_open_rate")]
    pub open_rate: f64,
    #[serde(default = "default_reply_rate")]
    pub reply_rate: f64,
}

fn default_timezone() -> String { "Asia/Kolkata".into() }
fn default_target_volume() -> u32 { 50 }
fn default_open_rate() -> f64 { 0.80 }
fn default_reply_rate() -> f64 { 0.55 }

impl Default for AccountDefaults {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            target_volume: default_target_volume(),
            open_rate: default_open_rate(),
            reply_rate: default_reply_rate(),
        }
    }
}

/// Business-day shape used by the schedule generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_business_start")]
    pub business_start_hour: u32,
    #[serde(default = "default_business_end")]
    pub business_end_hour: u32,
    #[serde(default = "default_jitter_minutes")]
    pub jitter_minutes: i64,
    #[serde(default = "default_jitter_seconds")]
    pub jitter_seconds: i64,
    #[serde(default = "default_min_gap")]
    pub min_gap_secs: i64,
    #[serde(default = "bool_true")]
    pub skip_weekends: bool,
}

fn default_business_start() -> u32 { 9 }
fn default_business_end() -> u32 { 18 }
fn default_jitter_minutes() -> i64 { 3 }
fn default_jitter_seconds() -> i64 { 30 }
fn default_min_gap() -> i64 { 60 }
fn bool_true() -> bool { true }

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            business_start_hour: default_business_start(),
            business_end_hour: default_business_end(),
            jitter_minutes: default_jitter_minutes(),
            jitter_seconds: default_jitter_seconds(),
            min_gap_secs: default_min_gap(),
            skip_weekends: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// How far ahead of its instant a slot becomes due.
    #[serde(default = "default_lookahead")]
    pub lookahead_secs: i64,
    /// How long after its instant a slot stays due before the sweep owns it.
    #[serde(default = "default_grace")]
    pub grace_secs: i64,
    /// A claim older than this is treated as an interrupted dispatch.
    #[serde(default = "default_claim_lease")]
    pub claim_lease_secs: i64,
    #[serde(default = "default_initial_jitter")]
    pub initial_jitter_max_secs: u64,
    #[serde(default = "default_stagger_min")]
    pub stagger_min_secs: u64,
    #[serde(default = "default_stagger_max")]
    pub stagger_max_secs: u64,
}

fn default_lookahead() -> i64 { 120 }
fn default_grace() -> i64 { 300 }
fn default_claim_lease() -> i64 { 600 }
fn default_initial_jitter() -> u64 { 60 }
fn default_stagger_min() -> u64 { 1 }
fn default_stagger_max() -> u64 { 5 }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            lookahead_secs: default_lookahead(),
            grace_secs: default_grace(),
            claim_lease_secs: default_claim_lease(),
            initial_jitter_max_secs: default_initial_jitter(),
            stagger_min_secs: default_stagger_min(),
            stagger_max_secs: default_stagger_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleConfig {
    /// Tolerated shortfall of sent vs expected before rescheduling.
    #[serde(default = "default_slack")]
    pub slack: u32,
    #[serde(default = "default_stale_after")]
    pub stale_after_mins: i64,
    #[serde(default = "default_min_remaining")]
    pub min_remaining_mins: i64,
    #[serde(default = "default_start_offset")]
    pub start_offset_mins: i64,
    #[serde(default = "default_end_buffer")]
    pub end_buffer_mins: i64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_slack() -> u32 { 2 }
fn default_stale_after() -> i64 { 10 }
fn default_min_remaining() -> i64 { 30 }
fn default_start_offset() -> i64 { 5 }
fn default_end_buffer() -> i64 { 30 }
fn default_max_retries() -> u32 { 3 }

impl Default for RescheduleConfig {
    fn default() -> Self {
        Self {
            slack: default_slack(),
            stale_after_mins: default_stale_after(),
            min_remaining_mins: default_min_remaining(),
            start_offset_mins: default_start_offset(),
            end_buffer_mins: default_end_buffer(),
            max_retries: default_max_retries(),
        }
    }
}

/// Engagement controller tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementConfig {
    /// Band around the target open rate inside which decisions stay probabilistic.
    #[serde(default = "default_open_margin")]
    pub open_margin: f64,
    /// How strongly the in-band probability leans against the current opens deficit.
    #[serde(default = "default_nudge_gain")]
    pub nudge_gain: f64,
    #[serde(default = "default_open_range")]
    pub fallback_open_range: (f64, f64),
    #[serde(default = "default_reply_range")]
    pub fallback_reply_range: (f64, f64),
    #[serde(default = "default_reply_jitter")]
    pub reply_jitter: f64,
    #[serde(default = "default_important_min")]
    pub important_min: f64,
    #[serde(default = "default_important_max")]
    pub important_max: f64,
    #[serde(default = "default_important_delay_min")]
    pub important_delay_min_secs: u64,
    #[serde(default = "default_important_delay_max")]
    pub important_delay_max_secs: u64,
    /// Inbound mail younger than this is left for a later pass.
    #[serde(default = "default_min_age")]
    pub min_message_age_secs: i64,
    #[serde(default = "default_max_unread")]
    pub max_unread: usize,
}

fn default_open_margin() -> f64 { 0.05 }
fn default_nudge_gain() -> f64 { 0.25 }
fn default_open_range() -> (f64, f64) { (0.75, 0.85) }
fn default_reply_range() -> (f64, f64) { (0.50, 0.60) }
fn default_reply_jitter() -> f64 { 0.05 }
fn default_important_min() -> f64 { 0.10 }
fn default_important_max() -> f64 { 0.20 }
fn default_important_delay_min() -> u64 { 45 }
fn default_important_delay_max() -> u64 { 100 }
fn default_min_age() -> i64 { 30 }
fn default_max_unread() -> usize { 20 }

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            open_margin: default_open_margin(),
            nudge_gain: default_nudge_gain(),
            fallback_open_range: default_open_range(),
            fallback_reply_range: default_reply_range(),
            reply_jitter: default_reply_jitter(),
            important_min: default_important_min(),
            important_max: default_important_max(),
            important_delay_min_secs: default_important_delay_min(),
            important_delay_max_secs: default_important_delay_max(),
            min_message_age_secs: default_min_age(),
            max_unread: default_max_unread(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamConfig {
    #[serde(default = "default_spam_max")]
    pub max_messages: usize,
    #[serde(default = "default_spam_delay_min")]
    pub delay_min_secs: u64,
    #[serde(default = "default_spam_delay_max")]
    pub delay_max_secs: u64,
}

fn default_spam_max() -> usize { 100 }
fn default_spam_delay_min() -> u64 { 1 }
fn default_spam_delay_max() -> u64 { 3 }

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            max_messages: default_spam_max(),
            delay_min_secs: default_spam_delay_min(),
            delay_max_secs: default_spam_delay_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Terminal slots older than this many days are deleted.
    #[serde(default = "default_slot_days")]
    pub slot_days: i64,
}

fn default_slot_days() -> i64 { 7 }

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { slot_days: default_slot_days() }
    }
}

/// Periods of the independent background triggers, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default = "default_generate_every")]
    pub generate_secs: u64,
    #[serde(default = "default_dispatch_every")]
    pub dispatch_secs: u64,
    #[serde(default = "default_reschedule_every")]
    pub reschedule_secs: u64,
    #[serde(default = "default_engagement_every")]
    pub engagement_secs: u64,
    #[serde(default = "default_replies_every")]
    pub replies_secs: u64,
    #[serde(default = "default_six_hours")]
    pub spam_secs: u64,
    #[serde(default = "default_six_hours")]
    pub score_secs: u64,
    #[serde(default = "default_cleanup_every")]
    pub cleanup_secs: u64,
}

fn default_generate_every() -> u64 { 3600 }
fn default_dispatch_every() -> u64 { 120 }
fn default_reschedule_every() -> u64 { 900 }
fn default_engagement_every() -> u64 { 180 }
fn default_replies_every() -> u64 { 300 }
fn default_six_hours() -> u64 { 6 * 3600 }
fn default_cleanup_every() -> u64 { 86_400 }

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            generate_secs: default_generate_every(),
            dispatch_secs: default_dispatch_every(),
            reschedule_secs: default_reschedule_every(),
            engagement_secs: default_engagement_every(),
            replies_secs: default_replies_every(),
            spam_secs: default_six_hours(),
            score_secs: default_six_hours(),
            cleanup_secs: default_cleanup_every(),
        }
    }
}

/// IMAP/SMTP endpoints for the bundled mailbox adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    #[serde(default = "default_imap_host")]
    pub imap_host: String,
    #[serde(default = "default_imap_port")]
    pub imap_port: u16,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default = "default_inbox")]
    pub inbox: String,
    #[serde(default = "default_spam_folder")]
    pub spam_folder: String,
}

fn default_imap_host() -> String { "imap.gmail.com".into() }
fn default_imap_port() -> u16 { 993 }
fn default_smtp_host() -> String { "smtp.gmail.com".into() }
fn default_smtp_port() -> u16 { 587 }
fn default_inbox() -> String { "INBOX".into() }
fn default_spam_folder() -> String { "[Gmail]/Spam".into() }

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            imap_host: default_imap_host(),
            imap_port: default_imap_port(),
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            inbox: default_inbox(),
            spam_folder: default_spam_folder(),
        }
    }
}
