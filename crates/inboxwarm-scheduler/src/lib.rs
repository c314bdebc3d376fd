//! # InboxWarm Scheduler
//!
//! Human-paced schedules, at-most-once dispatch and the engagement loop.
//!
//! ## Architecture
//! ```text
//! Scheduler (Arc, one tokio interval per pass)
//!   ├── generate    1h   advance ramp → fill today's slots (per timezone)
//!   ├── dispatch    2m   claim due slot → Mailbox::send → sent | failed
//!   ├── reschedule  15m  expired claims → skipped; failed/stale → re-armed
//!   ├── engagement  3m   pool inbox → open / reply / important decisions
//!   ├── replies     5m   warmup inbox → replied flags
//!   ├── spam        6h   pool spam folder → recovered | failed
//!   ├── score       6h   snapshots + status and spam reports
//!   └── cleanup     24h  expire stale pending, drop old terminal slots
//! ```
//!
//! Slot lifecycle: `pending → sent | failed | skipped`, `failed → pending`
//! only through the reschedule pass.

pub mod dispatch;
pub mod engage;
pub mod engine;
pub mod generate;
pub mod maintenance;
pub mod replies;
pub mod reschedule;
pub mod slots;
pub mod spam;
pub mod sweep;
pub mod timing;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatch::DispatchReport;
pub use engage::EngagementReport;
pub use engine::{GenerateOutcome, Pass, Scheduler};
pub use generate::GenerateReport;
pub use maintenance::{AccountStatus, CleanupReport, ScoreReport};
pub use replies::ReplyReport;
pub use slots::DueWindow;
pub use spam::SpamReport;
pub use sweep::RescheduleReport;
pub use timing::{HumanTiming, PlannedSlot, ScheduleStats};
