//! Engagement rate controller.
//!
//! ```text
//! observed = opened / processed           (sender's processed messages)
//!
//! no history            → open with p = target            (Initial)
//! observed < target - m → open                            (ForcedOpen)
//! observed > target + m → skip                            (ForcedSkip)
//! otherwise             → open with p = target + k·deficit (Nudged)
//!                         deficit = target·processed - opened
//! ```
//!
//! The in-band term works on the opens deficit in message units, so each
//! decision pulls the expected deficit down by a factor of `k` and the rate
//! error shrinks like 1/processed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use inboxwarm_core::config::EngagementConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Feedback signal for one sender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngagementHistory {
    pub processed: u64,
    pub opened: u64,
}

impl EngagementHistory {
    pub fn rate(&self) -> Option<f64> {
        (self.processed > 0).then(|| self.opened as f64 / self.processed as f64)
    }

    pub fn record(&mut self, opened: bool) {
        self.processed += 1;
        if opened {
            self.opened += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenReason {
    /// No processed history yet; plain draw at the target rate.
    Initial,
    ForcedOpen,
    ForcedSkip,
    /// Inside the margin band; draw biased back towards the target.
    Nudged,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenDecision {
    pub open: bool,
    pub reason: OpenReason,
    pub target: f64,
    pub observed: Option<f64>,
    /// Probability used for the draw (1.0 / 0.0 for forced decisions).
    pub probability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImportantDecision {
    /// Wait this long, then re-check the message is still opened before labeling.
    pub delay: Duration,
}

/// Stateless decision engine; all history comes from the caller.
#[derive(Debug, Clone)]
pub struct EngagementController {
    config: EngagementConfig,
}

impl EngagementController {
    pub fn new(config: EngagementConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngagementConfig {
        &self.config
    }

    /// Margin band for an account, honoring its override.
    pub fn margin_for(&self, account_override: Option<f64>) -> f64 {
        account_override
            .filter(|m| (0.0..=1.0).contains(m))
            .unwrap_or(self.config.open_margin)
    }

    /// Messages younger than the minimum age are left for a later pass.
    pub fn is_ready(&self, sent_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        (now - sent_at).num_seconds() >= self.config.min_message_age_secs
    }

    /// Target open rate for a message, drawing from the fallback range when none was captured.
    pub fn target_open_rate<R: Rng + ?Sized>(&self, captured: Option<f64>, rng: &mut R) -> f64 {
        match captured {
            Some(rate) => rate.clamp(0.0, 1.0),
            None => draw(rng, self.config.fallback_open_range),
        }
    }

    pub fn decide_open<R: Rng + ?Sized>(
        &self,
        target: f64,
        history: EngagementHistory,
        margin: f64,
        rng: &mut R,
    ) -> OpenDecision {
        let target = target.clamp(0.0, 1.0);
        let observed = history.rate();

        let (reason, probability) = match observed {
            None => (OpenReason::Initial, target),
            Some(rate) if rate < target - margin => (OpenReason::ForcedOpen, 1.0),
            Some(rate) if rate > target + margin => (OpenReason::ForcedSkip, 0.0),
            Some(_) => {
                let deficit = target * history.processed as f64 - history.opened as f64;
                let p = (target + self.config.nudge_gain * deficit).clamp(0.0, 1.0);
                (OpenReason::Nudged, p)
            }
        };

        let open = match reason {
            OpenReason::ForcedOpen => true,
            OpenReason::ForcedSkip => false,
            OpenReason::Initial | OpenReason::Nudged => rng.gen_bool(probability),
        };

        OpenDecision {
            open,
            reason,
            target,
            observed,
            probability,
        }
    }

    /// Independent reply draw around the captured reply rate. Only opened mail gets replies.
    pub fn decide_reply<R: Rng + ?Sized>(
        &self,
        opened: bool,
        captured: Option<f64>,
        rng: &mut R,
    ) -> bool {
        if !opened {
            return false;
        }
        let base = match captured {
            Some(rate) => rate,
            None => draw(rng, self.config.fallback_reply_range),
        };
        let jitter = self.config.reply_jitter.abs();
        let p = (base + rng.gen_range(-jitter..=jitter)).clamp(0.0, 1.0);
        rng.gen_bool(p)
    }

    /// Low-probability "important" label with a randomized delay.
    pub fn decide_important<R: Rng + ?Sized>(
        &self,
        opened: bool,
        rng: &mut R,
    ) -> Option<ImportantDecision> {
        if !opened {
            return None;
        }
        let p = draw(rng, (self.config.important_min, self.config.important_max));
        if !rng.gen_bool(p) {
            return None;
        }
        let lo = self.config.important_delay_min_secs;
        let hi = self.config.important_delay_max_secs.max(lo);
        Some(ImportantDecision {
            delay: Duration::from_secs(rng.gen_range(lo..=hi)),
        })
    }
}

/// Uniform draw from an ordered `(min, max)` pair, clamped to a probability.
fn draw<R: Rng + ?Sized>(rng: &mut R, (lo, hi): (f64, f64)) -> f64 {
    let (lo, hi) = (lo.min(hi), lo.max(hi));
    rng.gen_range(lo..=hi).clamp(0.0, 1.0)
}
