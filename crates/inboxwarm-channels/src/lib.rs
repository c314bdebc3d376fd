//! # InboxWarm Channels
//! Mail transports and content sources the scheduler runs against.

pub mod content;
pub mod imap_smtp;

pub use content::StaticContent;
pub use imap_smtp::ImapSmtpMailbox;
