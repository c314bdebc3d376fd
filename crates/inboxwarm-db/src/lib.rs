//! # InboxWarm DB
//!
//! SQLite store for warmup state. One connection behind a mutex, WAL mode,
//! migrations on open. Slot transitions are status-conditioned updates so
//! that exactly one worker wins each transition; schedule generation runs
//! its existence check and inserts inside one immediate transaction.
//!
//! ```text
//! accounts ──< schedule_slots
//!    │
//!    └──────< messages >── spam_records
//!    └──────  score_snapshots
//! ```

mod accounts;
mod messages;
mod slots;
mod snapshots;
mod spam;

pub use messages::{MessageStats, SenderStats};
pub use spam::SpamStats;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use inboxwarm_core::error::{Result, WarmupError};
use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Warmup database handle, shareable across tasks behind an `Arc`.
pub struct WarmupDb {
    conn: Mutex<Connection>,
}

impl WarmupDb {
    /// Open or create the warmup database. `:memory:` gives a private in-memory store.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && path != Path::new(":memory:") {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| WarmupError::Store(format!("DB open error: {e}")))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| WarmupError::Store(format!("DB pragma error: {e}")))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                display_name TEXT,
                role TEXT NOT NULL,                 -- 'warmup' | 'pool'
                timezone TEXT NOT NULL,
                target_open_rate REAL NOT NULL,
                target_reply_rate REAL NOT NULL,
                target_volume INTEGER NOT NULL,
                ramp_day INTEGER NOT NULL DEFAULT 0,
                daily_quota INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                last_advanced_on TEXT,              -- account-local YYYY-MM-DD
                open_margin REAL,
                credential TEXT,
                score REAL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS schedule_slots (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                scheduled_at TEXT NOT NULL,         -- UTC, fixed-width RFC 3339
                schedule_date TEXT NOT NULL,        -- account-local YYYY-MM-DD
                period TEXT NOT NULL,               -- 'peak' | 'normal' | 'low'
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                message_id TEXT,
                claimed_at TEXT,
                sent_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_slots_account_date
                ON schedule_slots(account_id, schedule_date);
            CREATE INDEX IF NOT EXISTS idx_slots_status_time
                ON schedule_slots(status, scheduled_at);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                sender_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                recipient TEXT NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL DEFAULT '',
                provider_id TEXT,
                open_rate REAL,
                reply_rate REAL,
                opened INTEGER NOT NULL DEFAULT 0,
                replied INTEGER NOT NULL DEFAULT 0,
                processed INTEGER NOT NULL DEFAULT 0,
                sent_at TEXT NOT NULL,
                opened_at TEXT,
                replied_at TEXT,
                processed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_id, sent_at);
            CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient, processed);
            CREATE INDEX IF NOT EXISTS idx_messages_provider ON messages(provider_id);

            CREATE TABLE IF NOT EXISTS spam_records (
                id TEXT PRIMARY KEY,
                message_id TEXT,
                pool_account_id TEXT NOT NULL,
                sender_account_id TEXT,
                provider_id TEXT NOT NULL,
                subject TEXT NOT NULL DEFAULT '',
                from_addr TEXT NOT NULL DEFAULT '',
                to_addr TEXT NOT NULL DEFAULT '',
                snippet TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'detected',
                recovery_attempts INTEGER NOT NULL DEFAULT 0,
                detected_at TEXT NOT NULL,
                recovered_at TEXT,
                last_attempt_at TEXT,
                error TEXT,
                UNIQUE(pool_account_id, provider_id)
            );

            CREATE TABLE IF NOT EXISTS score_snapshots (
                account_id TEXT PRIMARY KEY REFERENCES accounts(id) ON DELETE CASCADE,
                total REAL NOT NULL,
                snapshot TEXT NOT NULL,             -- JSON
                computed_at TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| WarmupError::Store(format!("Migration: {e}")))?;

        // Columns added after the first schema (safe to fail if already present)
        let _ = conn.execute("ALTER TABLE schedule_slots ADD COLUMN claimed_at TEXT", []);
        let _ = conn.execute("ALTER TABLE accounts ADD COLUMN open_margin REAL", []);

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| WarmupError::Store(format!("DB lock poisoned: {e}")))
    }

    /// Run `f` inside an immediate transaction: committed on `Ok`, rolled back on `Err`.
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| WarmupError::Store(format!("Begin transaction: {e}")))?;
        let out = f(&tx)?;
        tx.commit()
            .map_err(|e| WarmupError::Store(format!("Commit: {e}")))?;
        Ok(out)
    }
}

/// Fixed-width UTC timestamp so that text comparison orders chronologically.
pub(crate) fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn day(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

pub(crate) fn parse_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

pub(crate) fn parse_opt_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| {
        DateTime::parse_from_rfc3339(&r)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

pub(crate) fn parse_day(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| conversion_err(idx, e))
}

pub(crate) fn parse_enum<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = WarmupError>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion_err(idx, e))
}
