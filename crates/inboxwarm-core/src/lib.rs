//! # InboxWarm Core
//!
//! Shared building blocks for the warmup engine: the error taxonomy, the
//! TOML configuration, the persisted data model, the ramp curve, the clock
//! abstraction and the collaborator traits (`Mailbox`, `ContentSource`).

pub mod clock;
pub mod config;
pub mod error;
pub mod ramp;
pub mod traits;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::WarmupConfig;
pub use error::{Result, WarmupError};
pub use ramp::{RampAdvance, RampPhase};
pub use traits::{ContentKind, ContentSource, Composed, Mailbox};
pub use types::{
    Account, ActivityPeriod, Credential, InboundMessage, Message, Role, ScheduleSlot,
    SlotStatus, SpamRecord, SpamStatus,
};
