//! # InboxWarm Score
//!
//! Weighted 0–100 health score for a warmup account:
//!
//! ```text
//! total = 0.30·open + 0.20·reply + 0.40·phase + 0.10·spam   (one decimal)
//! ```
//!
//! Each component is itself 0–100. The grade, status line and recommendation
//! list are derived from the same inputs.

pub mod calculator;
pub mod grade;

pub use calculator::{Component, ScoreCalculator, ScoreComponents, ScoreInputs, ScoreSnapshot, ScoreStatistics};
pub use grade::Grade;
