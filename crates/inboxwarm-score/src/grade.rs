//! Letter grades, status lines and recommendations.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::APlus
        } else if score >= 80.0 {
            Self::A
        } else if score >= 70.0 {
            Self::B
        } else if score >= 60.0 {
            Self::C
        } else if score >= 50.0 {
            Self::D
        } else {
            Self::F
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::APlus => "A+",
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        }
    }

    fn messages(&self) -> [&'static str; 4] {
        match self {
            Self::APlus => [
                "Outstanding reputation. Keep the current pace steady.",
                "Warmup complete with an excellent sender reputation.",
                "Engagement is excellent across the board.",
                "Inbox placement looks ideal.",
            ],
            Self::A => [
                "Reputation is strong and close to fully warmed.",
                "Warmup is progressing well ahead of plan.",
                "Engagement is healthy; small gains remain.",
                "Sending pattern looks trustworthy.",
            ],
            Self::B => [
                "Reputation is developing steadily.",
                "Volume is on track but opens are lagging.",
                "Engagement is fair; keep the ramp consistent.",
                "Progress is steady with room to improve.",
            ],
            Self::C => [
                "Spam placements are holding the reputation back.",
                "Reputation is average; engagement needs work.",
                "Ramp progress is uneven.",
                "Signals are mixed; watch the next few days closely.",
            ],
            Self::D => [
                "Frequent spam placements; slow the ramp down.",
                "Reputation is weak; review content and timing.",
                "Engagement is low for this stage.",
                "Sending pattern needs attention.",
            ],
            Self::F => [
                "Reputation is poor; pause and review the setup.",
                "Engagement is very low.",
                "Heavy spam placement; check authentication before sending more.",
                "Warmup is off track.",
            ],
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status line for a grade, picked by ramp day, open rate (percent) or spam count.
pub fn status_message(grade: Grade, ramp_day: i32, open_rate: f64, spam_count: u64) -> &'static str {
    let idx = match grade {
        Grade::APlus => usize::from(ramp_day >= 29),
        Grade::A => usize::from(ramp_day < 21),
        Grade::B => usize::from(open_rate < 40.0),
        Grade::C => usize::from(spam_count <= 5),
        Grade::D => usize::from(spam_count <= 10),
        Grade::F => {
            if spam_count > 20 {
                2
            } else {
                0
            }
        }
    };
    grade.messages()[idx]
}

/// Advice derived from rates (percent), the phase component and the ramp day.
pub fn recommendations(
    open_rate: f64,
    reply_rate: f64,
    phase_score: f64,
    spam_rate: f64,
    ramp_day: i32,
) -> Vec<String> {
    let mut recs: Vec<String> = Vec::new();

    if open_rate < 40.0 {
        recs.push("Open rate is low: make subject lines shorter and more personal.".into());
        recs.push("Shift sends toward the recipients' morning peak hours.".into());
    } else if open_rate < 60.0 {
        recs.push("Open rate could improve: test a few subject line variants.".into());
    }

    if reply_rate < 15.0 {
        recs.push("Reply rate is low: end messages with a direct question.".into());
        recs.push("Keep bodies short and conversational to invite replies.".into());
    } else if reply_rate < 25.0 {
        recs.push("Replies are moderate: ask for a quick opinion more often.".into());
    }

    if phase_score < 70.0 {
        recs.push("Daily volume is below the ramp plan: let scheduled sends complete.".into());
        recs.push("Avoid pausing the account; consistency matters more than volume.".into());
    }

    if spam_rate > 5.0 {
        recs.push("Verify SPF, DKIM and DMARC records for the sending domain.".into());
        recs.push("Remove links and promotional wording from message bodies.".into());
        recs.push("Hold the daily volume flat until spam placements drop.".into());
    } else if spam_rate > 2.0 {
        recs.push("Some mail lands in spam: review content for trigger words.".into());
    }

    if ramp_day < 7 {
        recs.push("Early stage: keep volume low while the reputation forms.".into());
    } else if ramp_day < 14 {
        recs.push("Trust-building stage: increase volume gradually.".into());
    }

    if ramp_day >= 29 && recs.is_empty() {
        recs.push("Warmup is complete: maintain steady daily volume.".into());
    }

    if recs.is_empty() {
        recs.push("Metrics are healthy: keep the current schedule.".into());
        recs.push("Keep monitoring spam placement as volume grows.".into());
    }

    recs
}
