//! Collaborator traits the warmup engine consumes.

pub mod content;
pub mod mailbox;

pub use content::{Composed, ContentKind, ContentSource};
pub use mailbox::Mailbox;
