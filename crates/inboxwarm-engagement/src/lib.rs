//! # InboxWarm Engagement
//!
//! Decides, per inbound warmup message, whether the recipient opens it,
//! replies to it and marks it important. Opens are driven by a feedback
//! controller so that a sender's observed open rate settles on its target
//! instead of drifting like independent coin flips.

pub mod controller;

pub use controller::{
    EngagementController, EngagementHistory, ImportantDecision, OpenDecision, OpenReason,
};
