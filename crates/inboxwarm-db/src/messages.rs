//! Sent-message records and the aggregates the controllers read.

use chrono::{DateTime, Utc};
use inboxwarm_core::error::{Result, WarmupError};
use inboxwarm_core::types::Message;
use rusqlite::{OptionalExtension, params};

use crate::{WarmupDb, parse_opt_ts, parse_ts, ts};

const MESSAGE_SELECT: &str = "SELECT id,sender_id,recipient,subject,body,provider_id,open_rate,reply_rate,opened,replied,processed,sent_at,opened_at,replied_at,processed_at FROM messages";

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        recipient: row.get(2)?,
        subject: row.get(3)?,
        body: row.get(4)?,
        provider_id: row.get(5)?,
        open_rate: row.get(6)?,
        reply_rate: row.get(7)?,
        opened: row.get::<_, i32>(8)? != 0,
        replied: row.get::<_, i32>(9)? != 0,
        processed: row.get::<_, i32>(10)? != 0,
        sent_at: parse_ts(row, 11)?,
        opened_at: parse_opt_ts(row, 12)?,
        replied_at: parse_opt_ts(row, 13)?,
        processed_at: parse_opt_ts(row, 14)?,
    })
}

/// Processed/opened counts for one sender, the engagement controller's feedback signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub processed: u64,
    pub opened: u64,
}

/// Totals used by the health score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageStats {
    pub total: u64,
    pub opened: u64,
    pub replied: u64,
}

impl WarmupDb {
    pub fn insert_message(&self, m: &Message) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO messages (id,sender_id,recipient,subject,body,provider_id,open_rate,reply_rate,
                opened,replied,processed,sent_at,opened_at,replied_at,processed_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            params![
                m.id,
                m.sender_id,
                m.recipient,
                m.subject,
                m.body,
                m.provider_id,
                m.open_rate,
                m.reply_rate,
                m.opened as i32,
                m.replied as i32,
                m.processed as i32,
                ts(m.sent_at),
                m.opened_at.map(ts),
                m.replied_at.map(ts),
                m.processed_at.map(ts),
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: &str) -> Result<Message> {
        let conn = self.conn()?;
        conn.query_row(&format!("{MESSAGE_SELECT} WHERE id = ?1"), params![id], row_to_message)
            .optional()?
            .ok_or_else(|| WarmupError::NotFound(format!("message {id}")))
    }

    pub fn find_message_by_provider_id(&self, provider_id: &str) -> Result<Option<Message>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("{MESSAGE_SELECT} WHERE provider_id = ?1"),
                params![provider_id],
                row_to_message,
            )
            .optional()?)
    }

    /// Oldest unprocessed message to `recipient` with exactly this subject.
    pub fn find_unprocessed_message(&self, recipient: &str, subject: &str) -> Result<Option<Message>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!(
                    "{MESSAGE_SELECT} WHERE lower(recipient) = lower(?1) AND subject = ?2 AND processed = 0
                     ORDER BY sent_at ASC LIMIT 1"
                ),
                params![recipient, subject],
                row_to_message,
            )
            .optional()?)
    }

    /// Latest message from `sender_id` to `recipient` with this subject, any state.
    pub fn find_sent_message(
        &self,
        sender_id: &str,
        recipient: &str,
        subject: &str,
    ) -> Result<Option<Message>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!(
                    "{MESSAGE_SELECT} WHERE sender_id = ?1 AND lower(recipient) = lower(?2) AND subject = ?3
                     ORDER BY sent_at DESC LIMIT 1"
                ),
                params![sender_id, recipient, subject],
                row_to_message,
            )
            .optional()?)
    }

    /// Unreplied messages from `sender_id` to `recipient`, newest first.
    pub fn unreplied_messages_to(&self, sender_id: &str, recipient: &str) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{MESSAGE_SELECT} WHERE sender_id = ?1 AND lower(recipient) = lower(?2) AND replied = 0
             ORDER BY sent_at DESC"
        ))?;
        let rows = stmt.query_map(params![sender_id, recipient], row_to_message)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn sender_stats(&self, sender_id: &str) -> Result<SenderStats> {
        let conn = self.conn()?;
        let (processed, opened): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(opened), 0) FROM messages WHERE sender_id = ?1 AND processed = 1",
            params![sender_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(SenderStats {
            processed: processed as u64,
            opened: opened as u64,
        })
    }

    pub fn message_stats(&self, sender_id: &str) -> Result<MessageStats> {
        let conn = self.conn()?;
        let (total, opened, replied): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(opened), 0), COALESCE(SUM(replied), 0)
             FROM messages WHERE sender_id = ?1",
            params![sender_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;
        Ok(MessageStats {
            total: total as u64,
            opened: opened as u64,
            replied: replied as u64,
        })
    }

    /// Messages sent by `sender_id` at or after `since`.
    pub fn count_sent_since(&self, sender_id: &str, since: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE sender_id = ?1 AND sent_at >= ?2",
            params![sender_id, ts(since)],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }

    /// Mark a message processed with the decided outcome. Only the first call wins.
    /// A reply already recorded by the reply pass is kept.
    pub fn record_engagement_decision(
        &self,
        message_id: &str,
        opened: bool,
        replied: bool,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let at = ts(now);
        let changed = conn.execute(
            "UPDATE messages SET processed = 1, processed_at = ?4,
                opened = ?2, opened_at = CASE WHEN ?2 = 1 THEN ?4 ELSE NULL END,
                replied = MAX(replied, ?3), replied_at = COALESCE(replied_at, CASE WHEN ?3 = 1 THEN ?4 END)
             WHERE id = ?1 AND processed = 0",
            params![message_id, opened as i32, replied as i32, at],
        )?;
        Ok(changed == 1)
    }

    /// Flag a reply observed after the open decision was recorded.
    pub fn mark_message_replied(&self, message_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE messages SET replied = 1, replied_at = ?2 WHERE id = ?1 AND replied = 0",
            params![message_id, ts(now)],
        )?;
        Ok(changed == 1)
    }
}
