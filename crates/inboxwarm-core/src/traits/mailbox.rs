//! Mailbox trait: the transport the warmup engine sends and observes through.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Account, Credential, InboundMessage};

/// Provider-facing mailbox operations. Every call names the account it acts as.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Mailbox implementation name.
    fn name(&self) -> &str;

    /// Verify the account can talk to its provider.
    ///
    /// `Ok(Some(cred))` carries a refreshed credential the caller must persist;
    /// the implementation never writes it back on its own.
    async fn authenticate(&self, account: &Account) -> Result<Option<Credential>>;

    /// Send a message and return the provider message id.
    async fn send(&self, account: &Account, to: &str, subject: &str, body: &str)
    -> Result<String>;

    /// Reply to an inbound message, threading it under `in_reply_to`.
    async fn reply(
        &self,
        account: &Account,
        to: &str,
        subject: &str,
        body: &str,
        in_reply_to: Option<&str>,
    ) -> Result<String> {
        let _ = in_reply_to;
        self.send(account, to, subject, body).await
    }

    /// Unread inbox mail from any of `senders`, newest first, at most `max`.
    async fn list_unread(
        &self,
        account: &Account,
        senders: &[String],
        max: usize,
    ) -> Result<Vec<InboundMessage>>;

    async fn mark_read(&self, account: &Account, id: &str) -> Result<()>;

    async fn mark_important(&self, account: &Account, id: &str) -> Result<()>;

    /// Whether the message is still flagged as opened (read).
    async fn is_opened(&self, account: &Account, id: &str) -> Result<bool>;

    /// Spam-folder mail from any of `senders`, at most `max`.
    async fn list_spam(
        &self,
        account: &Account,
        senders: &[String],
        max: usize,
    ) -> Result<Vec<InboundMessage>>;

    /// Move a message out of spam back into the inbox.
    async fn unmark_spam(&self, account: &Account, id: &str) -> Result<()>;
}
