//! Score components and the composite snapshot.

use chrono::{DateTime, Utc};
use inboxwarm_core::error::{Result, WarmupError};
use inboxwarm_core::ramp::RampPhase;
use serde::{Deserialize, Serialize};

use crate::grade::{Grade, recommendations, status_message};

pub const OPEN_WEIGHT: f64 = 0.30;
pub const REPLY_WEIGHT: f64 = 0.20;
pub const PHASE_WEIGHT: f64 = 0.40;
pub const SPAM_WEIGHT: f64 = 0.10;

/// Raw aggregates for one account.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreInputs {
    pub account_id: String,
    pub ramp_day: i32,
    pub target_volume: u32,
    pub daily_quota: u32,
    pub total_messages: u64,
    pub opened: u64,
    pub replied: u64,
    /// Messages sent over the trailing seven days.
    pub sent_last_week: u64,
    pub spam_count: u64,
    pub spam_recovered: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Underlying measurement (a percentage, or the ramp day for the phase component).
    pub value: f64,
    pub score: f64,
    pub weight: f64,
    pub contribution: f64,
}

impl Component {
    fn new(value: f64, score: f64, weight: f64) -> Self {
        Self {
            value: round2(value),
            score: round2(score),
            weight,
            contribution: round2(score * weight),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub open: Component,
    pub reply: Component,
    pub phase: Component,
    pub spam: Component,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreStatistics {
    pub total_messages: u64,
    pub opened: u64,
    pub replied: u64,
    pub open_rate: f64,
    pub reply_rate: f64,
    pub spam_count: u64,
    pub spam_rate: f64,
    pub recovery_rate: f64,
    pub ramp_day: i32,
    pub phase: String,
    pub expected_daily: f64,
    pub actual_daily: f64,
}

/// A computed score. Cached, but always rebuildable from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub account_id: String,
    pub total: f64,
    pub grade: Grade,
    pub status: String,
    pub components: ScoreComponents,
    pub statistics: ScoreStatistics,
    pub recommendations: Vec<String>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreCalculator;

impl ScoreCalculator {
    pub fn new() -> Self {
        Self
    }

    pub fn calculate(&self, inputs: &ScoreInputs, now: DateTime<Utc>) -> Result<ScoreSnapshot> {
        if inputs.opened > inputs.total_messages || inputs.replied > inputs.total_messages {
            return Err(WarmupError::Calculation(format!(
                "engagement counts exceed sent messages for {}",
                inputs.account_id
            )));
        }
        if inputs.spam_recovered > inputs.spam_count {
            return Err(WarmupError::Calculation(format!(
                "more spam recoveries than detections for {}",
                inputs.account_id
            )));
        }
        if inputs.ramp_day > 0 && inputs.target_volume == 0 {
            return Err(WarmupError::Calculation(format!(
                "account {} is ramping with no target volume",
                inputs.account_id
            )));
        }

        let open_rate = percent(inputs.opened, inputs.total_messages);
        let reply_rate = percent(inputs.replied, inputs.total_messages);
        let spam_rate = percent(inputs.spam_count, inputs.total_messages);
        let recovery_rate = percent(inputs.spam_recovered, inputs.spam_count);

        let phase = RampPhase::for_day(inputs.ramp_day);
        let expected_daily = inputs.target_volume as f64 * phase.volume_fraction();
        let actual_daily = if inputs.sent_last_week > 0 {
            inputs.sent_last_week as f64 / 7.0
        } else {
            inputs.daily_quota as f64
        };

        let open = open_score(open_rate);
        let reply = reply_score(reply_rate);
        let phase_points = phase_score(inputs.ramp_day, expected_daily, actual_daily);
        let spam = spam_score(inputs.total_messages, inputs.spam_count, spam_rate, recovery_rate);

        let components = ScoreComponents {
            open: Component::new(open_rate, open, OPEN_WEIGHT),
            reply: Component::new(reply_rate, reply, REPLY_WEIGHT),
            phase: Component::new(inputs.ramp_day as f64, phase_points, PHASE_WEIGHT),
            spam: Component::new(spam_rate, spam, SPAM_WEIGHT),
        };
        let total = composite(open, reply, phase_points, spam);
        let grade = Grade::from_score(total);

        let statistics = ScoreStatistics {
            total_messages: inputs.total_messages,
            opened: inputs.opened,
            replied: inputs.replied,
            open_rate: round2(open_rate),
            reply_rate: round2(reply_rate),
            spam_count: inputs.spam_count,
            spam_rate: round2(spam_rate),
            recovery_rate: round2(recovery_rate),
            ramp_day: inputs.ramp_day,
            phase: phase.label(inputs.ramp_day),
            expected_daily: round2(expected_daily),
            actual_daily: round2(actual_daily),
        };

        Ok(ScoreSnapshot {
            account_id: inputs.account_id.clone(),
            total,
            grade,
            status: status_message(grade, inputs.ramp_day, open_rate, inputs.spam_count).to_string(),
            components,
            recommendations: recommendations(open_rate, reply_rate, phase_points, spam_rate, inputs.ramp_day),
            statistics,
            computed_at: now,
        })
    }
}

/// Weighted total, rounded to one decimal.
pub fn composite(open: f64, reply: f64, phase: f64, spam: f64) -> f64 {
    round1(OPEN_WEIGHT * open + REPLY_WEIGHT * reply + PHASE_WEIGHT * phase + SPAM_WEIGHT * spam)
}

/// Open component from an open rate in percent.
pub fn open_score(rate: f64) -> f64 {
    if rate >= 60.0 {
        100.0
    } else if rate >= 40.0 {
        80.0
    } else if rate >= 20.0 {
        60.0
    } else {
        (rate / 20.0) * 60.0
    }
}

/// Reply component from a reply rate in percent.
pub fn reply_score(rate: f64) -> f64 {
    if rate >= 25.0 {
        100.0
    } else if rate >= 15.0 {
        85.0
    } else if rate >= 5.0 {
        70.0
    } else {
        (rate / 5.0) * 70.0
    }
}

/// Phase base score adjusted by sustained volume against the phase's expected volume.
pub fn phase_score(ramp_day: i32, expected_daily: f64, actual_daily: f64) -> f64 {
    let phase = RampPhase::for_day(ramp_day);
    if phase == RampPhase::NotStarted {
        return 0.0;
    }
    let mut score = phase.base_score();
    if expected_daily > 0.0 {
        let ratio = actual_daily / expected_daily;
        if ratio >= 0.9 {
            score += 10.0;
        } else if ratio < 0.5 {
            score -= 15.0;
        }
    }
    score.clamp(0.0, 100.0)
}

/// Spam component; the recovery adjustment only applies once something hit spam.
pub fn spam_score(total_messages: u64, spam_count: u64, spam_rate: f64, recovery_rate: f64) -> f64 {
    if total_messages == 0 {
        return 100.0;
    }
    let mut score = if spam_rate <= 2.0 {
        100.0
    } else if spam_rate <= 5.0 {
        85.0
    } else if spam_rate <= 10.0 {
        60.0
    } else {
        (100.0 - 8.0 * spam_rate).max(0.0)
    };
    if spam_count > 0 {
        if recovery_rate >= 80.0 {
            score += 10.0;
        } else if recovery_rate < 50.0 {
            score -= 10.0;
        }
    }
    score.clamp(0.0, 100.0)
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> ScoreInputs {
        ScoreInputs {
            account_id: "acct".into(),
            ramp_day: 10,
            target_volume: 50,
            daily_quota: 12,
            total_messages: 100,
            opened: 80,
            replied: 30,
            sent_last_week: 84,
            spam_count: 0,
            spam_recovered: 0,
        }
    }

    #[test]
    fn test_open_boundaries() {
        assert_eq!(open_score(60.0), 100.0);
        assert_eq!(open_score(59.99), 80.0);
        assert_eq!(open_score(40.0), 80.0);
        assert_eq!(open_score(20.0), 60.0);
        assert_eq!(open_score(10.0), 30.0);
        assert_eq!(open_score(0.0), 0.0);
    }

    #[test]
    fn test_reply_boundaries() {
        assert_eq!(reply_score(25.0), 100.0);
        assert_eq!(reply_score(15.0), 85.0);
        assert_eq!(reply_score(5.0), 70.0);
        assert_eq!(reply_score(2.5), 35.0);
    }

    #[test]
    fn test_phase_adjustments() {
        // phase 2 expects 12.5/day
        assert_eq!(phase_score(10, 12.5, 12.0), 75.0);
        assert_eq!(phase_score(10, 12.5, 10.0), 65.0);
        assert_eq!(phase_score(10, 12.5, 6.0), 50.0);
        assert_eq!(phase_score(30, 50.0, 50.0), 100.0);
        assert_eq!(phase_score(0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_spam_component() {
        assert_eq!(spam_score(0, 0, 0.0, 0.0), 100.0);
        assert_eq!(spam_score(100, 0, 0.0, 0.0), 100.0);
        assert_eq!(spam_score(100, 4, 4.0, 100.0), 95.0);
        assert_eq!(spam_score(100, 8, 8.0, 25.0), 50.0);
        assert_eq!(spam_score(100, 20, 20.0, 60.0), 0.0);
        assert_eq!(spam_score(100, 11, 11.0, 90.0), 22.0);
    }

    #[test]
    fn test_composite_rounding() {
        assert_eq!(composite(100.0, 100.0, 75.0, 100.0), 90.0);
        assert_eq!(composite(80.0, 85.0, 90.0, 100.0), 87.0);
        assert_eq!(composite(33.33, 0.0, 0.0, 0.0), 10.0);
    }

    #[test]
    fn test_full_snapshot() {
        let snap = ScoreCalculator::new().calculate(&inputs(), Utc::now()).unwrap();
        // open 100, reply 100, phase 65+10, spam 100
        assert_eq!(snap.total, 90.0);
        assert_eq!(snap.grade, Grade::APlus);
        assert_eq!(snap.components.phase.score, 75.0);
        assert_eq!(snap.components.open.contribution, 30.0);
        assert_eq!(snap.statistics.actual_daily, 12.0);
        assert_eq!(snap.statistics.phase, "Phase 2: Building trust (Day 10/14)");
        assert!(!snap.recommendations.is_empty());
    }

    #[test]
    fn test_no_recent_sends_uses_quota() {
        let mut i = inputs();
        i.sent_last_week = 0;
        i.daily_quota = 5;
        let snap = ScoreCalculator::new().calculate(&i, Utc::now()).unwrap();
        assert_eq!(snap.statistics.actual_daily, 5.0);
        assert_eq!(snap.components.phase.score, 50.0);
    }

    #[test]
    fn test_inconsistent_inputs_are_calculation_errors() {
        let mut i = inputs();
        i.opened = 500;
        assert!(matches!(
            ScoreCalculator::new().calculate(&i, Utc::now()),
            Err(WarmupError::Calculation(_))
        ));
    }

    #[test]
    fn test_snapshot_serializes() {
        let snap = ScoreCalculator::new().calculate(&inputs(), Utc::now()).unwrap();
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"grade\":\"A+\""));
        let back: ScoreSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.total, snap.total);
    }
}
