//! IMAP/SMTP mailbox: async IMAP over TLS for reading and flagging, SMTP
//! (async lettre) for sending. Works against Gmail, Outlook or any server
//! that supports `UID MOVE`.
//!
//! The account credential is either a bare app password or a JSON object
//! `{"username": "...", "password": "..."}`; the username defaults to the
//! account email.

use async_trait::async_trait;
use futures::StreamExt;
use inboxwarm_core::config::MailboxConfig;
use inboxwarm_core::error::{Result, WarmupError};
use inboxwarm_core::traits::Mailbox;
use inboxwarm_core::types::{Account, Credential, InboundMessage, address_of};
use serde::Deserialize;

/// Snippets are cut to this many characters.
const SNIPPET_CHARS: usize = 200;

type ImapTlsStream = tokio_native_tls::TlsStream<tokio::net::TcpStream>;
type ImapSession = async_imap::Session<ImapTlsStream>;

/// Login pair resolved from an account's stored credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
struct CredentialJson {
    #[serde(default)]
    username: Option<String>,
    password: String,
}

impl Login {
    pub fn for_account(account: &Account) -> Result<Self> {
        let credential = account
            .credential
            .as_ref()
            .ok_or_else(|| WarmupError::AuthFailed(format!("{} has no credential", account.email)))?;
        Ok(Self::parse(&account.email, credential))
    }

    fn parse(email: &str, credential: &Credential) -> Self {
        let raw = credential.as_str().trim();
        match serde_json::from_str::<CredentialJson>(raw) {
            Ok(json) => Self {
                username: json.username.unwrap_or_else(|| email.to_string()),
                password: json.password,
            },
            Err(_) => Self {
                username: email.to_string(),
                password: raw.to_string(),
            },
        }
    }
}

/// Mailbox backed by a plain IMAP + SMTP provider account.
pub struct ImapSmtpMailbox {
    config: MailboxConfig,
}

impl ImapSmtpMailbox {
    pub fn new(config: MailboxConfig) -> Self {
        Self { config }
    }

    async fn session(&self, account: &Account) -> Result<ImapSession> {
        let login = Login::for_account(account)?;
        let client = connect_imap_tls(&self.config.imap_host, self.config.imap_port).await?;
        client
            .login(&login.username, &login.password)
            .await
            .map_err(|e| WarmupError::AuthFailed(format!("IMAP login for {}: {}", account.email, e.0)))
    }

    /// Fetch the newest `max` messages from `folder` matching `base` and sent
    /// by one of `senders`, without touching their flags.
    async fn list_folder(
        &self,
        account: &Account,
        folder: &str,
        base: &str,
        senders: &[String],
        max: usize,
    ) -> Result<Vec<InboundMessage>> {
        if senders.is_empty() || max == 0 {
            return Ok(vec![]);
        }
        let mut session = self.session(account).await?;
        session.select(folder).await.map_err(imap_err("select"))?;

        let uids = session
            .uid_search(search_query(base, senders))
            .await
            .map_err(imap_err("search"))?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable_by(|a, b| b.cmp(a));
        uids.truncate(max);

        let mut found = Vec::new();
        if !uids.is_empty() {
            let uid_set = uid_set(&uids);
            let mut fetched = session
                .uid_fetch(&uid_set, "(UID FLAGS BODY.PEEK[])")
                .await
                .map_err(imap_err("fetch"))?;
            while let Some(item) = fetched.next().await {
                let fetch = item.map_err(imap_err("fetch message"))?;
                let (Some(uid), Some(body)) = (fetch.uid, fetch.body()) else {
                    continue;
                };
                match parse_message(body, uid) {
                    Some(mail) if sent_by(&mail.from, senders) => found.push(mail),
                    Some(_) => {}
                    None => tracing::debug!("📭 Unparseable message {} in {}", uid, folder),
                }
            }
        }

        session.logout().await.ok();
        found.sort_by(|a, b| uid_of(&b.id).cmp(&uid_of(&a.id)));
        Ok(found)
    }

    async fn store_flag(&self, account: &Account, id: &str, flags: &str) -> Result<()> {
        let mut session = self.session(account).await?;
        session.select(&self.config.inbox).await.map_err(imap_err("select"))?;
        {
            let updates = session
                .uid_store(id, format!("+FLAGS ({flags})"))
                .await
                .map_err(imap_err("store"))?;
            let results: Vec<_> = updates.collect().await;
            if let Some(Err(e)) = results.into_iter().find(|r| r.is_err()) {
                return Err(imap_err("store")(e));
            }
        }
        session.logout().await.ok();
        Ok(())
    }

    async fn send_smtp(
        &self,
        account: &Account,
        to: &str,
        subject: &str,
        body: &str,
        in_reply_to: Option<&str>,
    ) -> Result<String> {
        use lettre::{
            AsyncSmtpTransport, AsyncTransport, Message as LettreMessage, message::Mailbox as Address,
            message::header::ContentType, transport::smtp::authentication::Credentials,
        };

        let login = Login::for_account(account)?;
        let from = match account.display_name.as_deref() {
            Some(name) => format!("{name} <{}>", account.email),
            None => account.email.clone(),
        };
        let from: Address = from
            .parse()
            .map_err(|e| WarmupError::Mailbox(format!("Invalid from {}: {e}", account.email)))?;
        let to_addr: Address = to
            .parse()
            .map_err(|e| WarmupError::Mailbox(format!("Invalid to {to}: {e}")))?;

        let message_id = new_message_id(&account.email);
        let mut builder = LettreMessage::builder()
            .from(from)
            .to(to_addr)
            .subject(subject)
            .message_id(Some(angle(&message_id)))
            .header(ContentType::TEXT_PLAIN);
        if let Some(parent) = in_reply_to {
            builder = builder.in_reply_to(angle(parent)).references(angle(parent));
        }
        let email = builder
            .body(body.to_string())
            .map_err(|e| WarmupError::Mailbox(format!("Build email: {e}")))?;

        let mailer = AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&self.config.smtp_host)
            .map_err(|e| WarmupError::Config(format!("SMTP relay {}: {e}", self.config.smtp_host)))?
            .port(self.config.smtp_port)
            .credentials(Credentials::new(login.username, login.password))
            .build();

        mailer.send(email).await.map_err(|e| {
            if e.is_permanent() {
                WarmupError::Mailbox(format!("SMTP send: {e}"))
            } else {
                WarmupError::Transient(format!("SMTP send: {e}"))
            }
        })?;

        tracing::debug!("📤 {} → {}: {}", account.email, to, subject);
        Ok(message_id)
    }
}

#[async_trait]
impl Mailbox for ImapSmtpMailbox {
    fn name(&self) -> &str {
        "imap-smtp"
    }

    async fn authenticate(&self, account: &Account) -> Result<Option<Credential>> {
        let mut session = self.session(account).await?;
        session.logout().await.ok();
        Ok(None)
    }

    async fn send(&self, account: &Account, to: &str, subject: &str, body: &str) -> Result<String> {
        self.send_smtp(account, to, subject, body, None).await
    }

    async fn reply(
        &self,
        account: &Account,
        to: &str,
        subject: &str,
        body: &str,
        in_reply_to: Option<&str>,
    ) -> Result<String> {
        self.send_smtp(account, to, subject, body, in_reply_to).await
    }

    async fn list_unread(
        &self,
        account: &Account,
        senders: &[String],
        max: usize,
    ) -> Result<Vec<InboundMessage>> {
        self.list_folder(account, &self.config.inbox, "UNSEEN", senders, max)
            .await
    }

    async fn mark_read(&self, account: &Account, id: &str) -> Result<()> {
        self.store_flag(account, id, "\\Seen").await
    }

    async fn mark_important(&self, account: &Account, id: &str) -> Result<()> {
        self.store_flag(account, id, "\\Flagged").await
    }

    async fn is_opened(&self, account: &Account, id: &str) -> Result<bool> {
        use async_imap::types::Flag;

        let mut session = self.session(account).await?;
        session.select(&self.config.inbox).await.map_err(imap_err("select"))?;
        let mut seen = false;
        {
            let mut fetched = session.uid_fetch(id, "FLAGS").await.map_err(imap_err("fetch"))?;
            while let Some(item) = fetched.next().await {
                let fetch = item.map_err(imap_err("fetch flags"))?;
                seen |= fetch.flags().any(|f| matches!(f, Flag::Seen));
            }
        }
        session.logout().await.ok();
        Ok(seen)
    }

    async fn list_spam(
        &self,
        account: &Account,
        senders: &[String],
        max: usize,
    ) -> Result<Vec<InboundMessage>> {
        self.list_folder(account, &self.config.spam_folder, "ALL", senders, max)
            .await
    }

    async fn unmark_spam(&self, account: &Account, id: &str) -> Result<()> {
        let mut session = self.session(account).await?;
        session
            .select(&self.config.spam_folder)
            .await
            .map_err(imap_err("select spam"))?;
        session
            .uid_mv(id, &self.config.inbox)
            .await
            .map_err(imap_err("move to inbox"))?;
        session.logout().await.ok();
        Ok(())
    }
}

/// Create a TLS-wrapped IMAP connection.
async fn connect_imap_tls(host: &str, port: u16) -> Result<async_imap::Client<ImapTlsStream>> {
    let tcp = tokio::net::TcpStream::connect((host, port))
        .await
        .map_err(|e| WarmupError::Transient(format!("TCP connect {host}:{port}: {e}")))?;

    let connector = native_tls::TlsConnector::new()
        .map_err(|e| WarmupError::Mailbox(format!("TLS connector: {e}")))?;
    let connector = tokio_native_tls::TlsConnector::from(connector);

    let tls_stream = connector
        .connect(host, tcp)
        .await
        .map_err(|e| WarmupError::Transient(format!("TLS handshake with {host}: {e}")))?;

    Ok(async_imap::Client::new(tls_stream))
}

/// Socket-level failures are retried, protocol rejections are not.
fn imap_err(op: &'static str) -> impl Fn(async_imap::error::Error) -> WarmupError {
    move |e| match e {
        async_imap::error::Error::Io(io) => WarmupError::Transient(format!("IMAP {op}: {io}")),
        other => WarmupError::Mailbox(format!("IMAP {op}: {other}")),
    }
}

/// IMAP search for `base` restricted to any of `senders`, e.g.
/// `UNSEEN OR FROM "a@x" FROM "b@y"`.
fn search_query(base: &str, senders: &[String]) -> String {
    let mut from = String::new();
    for (i, sender) in senders.iter().enumerate() {
        if i + 1 < senders.len() {
            from.push_str("OR ");
        }
        from.push_str(&format!("FROM \"{}\" ", sender.replace('"', "")));
    }
    format!("{base} {}", from.trim_end())
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
}

fn uid_of(id: &str) -> u32 {
    id.parse().unwrap_or(0)
}

fn sent_by(from: &str, senders: &[String]) -> bool {
    let addr = address_of(from);
    senders.iter().any(|s| s.eq_ignore_ascii_case(addr))
}

fn new_message_id(email: &str) -> String {
    let domain = email.rsplit_once('@').map(|(_, d)| d).unwrap_or("localhost");
    format!("{}@{}", uuid::Uuid::new_v4().simple(), domain)
}

fn angle(id: &str) -> String {
    let id = id.trim().trim_start_matches('<').trim_end_matches('>');
    format!("<{id}>")
}

/// Parse raw RFC 822 bytes into an inbound message keyed by its UID.
fn parse_message(raw: &[u8], uid: u32) -> Option<InboundMessage> {
    use mail_parser::MessageParser;
    let parsed = MessageParser::default().parse(raw)?;

    let body = parsed
        .body_text(0)
        .map(|s| s.to_string())
        .or_else(|| parsed.body_html(0).map(|h| strip_html(&h)))
        .unwrap_or_default();

    Some(InboundMessage {
        id: uid.to_string(),
        from: first_address(parsed.from()),
        to: first_address(parsed.to()),
        subject: parsed.subject().unwrap_or_default().to_string(),
        snippet: snippet(&body),
        internal_id: parsed.message_id().map(String::from),
    })
}

fn first_address(addr: Option<&mail_parser::Address<'_>>) -> String {
    addr.and_then(|a| a.first())
        .and_then(|a| a.address())
        .unwrap_or_default()
        .to_string()
}

fn snippet(body: &str) -> String {
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    flat.chars().take(SNIPPET_CHARS).collect()
}

fn strip_html(html: &str) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.trim().to_string()
}
