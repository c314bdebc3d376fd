//! Content source: supplies subjects and bodies for outbound mail and replies.

use async_trait::async_trait;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum ContentKind {
    /// A fresh conversation starter.
    Outbound,
    /// A reply to a message with the given subject.
    Reply { subject: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Composed {
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn compose(&self, kind: ContentKind) -> Result<Composed>;
}
