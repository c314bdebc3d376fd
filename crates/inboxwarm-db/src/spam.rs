//! Spam-folder detections and their recovery bookkeeping.

use chrono::{DateTime, Utc};
use inboxwarm_core::error::Result;
use inboxwarm_core::types::{SpamRecord, SpamStatus};
use rusqlite::{OptionalExtension, params};

use crate::{WarmupDb, parse_enum, parse_opt_ts, parse_ts, ts};

const SPAM_SELECT: &str = "SELECT id,message_id,pool_account_id,sender_account_id,provider_id,subject,from_addr,to_addr,snippet,status,recovery_attempts,detected_at,recovered_at,last_attempt_at,error FROM spam_records";

fn row_to_spam(row: &rusqlite::Row) -> rusqlite::Result<SpamRecord> {
    Ok(SpamRecord {
        id: row.get(0)?,
        message_id: row.get(1)?,
        pool_account_id: row.get(2)?,
        sender_account_id: row.get(3)?,
        provider_id: row.get(4)?,
        subject: row.get(5)?,
        from: row.get(6)?,
        to: row.get(7)?,
        snippet: row.get(8)?,
        status: parse_enum(row, 9)?,
        recovery_attempts: row.get(10)?,
        detected_at: parse_ts(row, 11)?,
        recovered_at: parse_opt_ts(row, 12)?,
        last_attempt_at: parse_opt_ts(row, 13)?,
        error: row.get(14)?,
    })
}

/// Spam detections attributed to one warmup sender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpamStats {
    pub total: u64,
    pub recovered: u64,
}

impl WarmupDb {
    pub fn insert_spam_record(&self, r: &SpamRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO spam_records (id,message_id,pool_account_id,sender_account_id,provider_id,subject,
                from_addr,to_addr,snippet,status,recovery_attempts,detected_at,recovered_at,last_attempt_at,error)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            params![
                r.id,
                r.message_id,
                r.pool_account_id,
                r.sender_account_id,
                r.provider_id,
                r.subject,
                r.from,
                r.to,
                r.snippet,
                r.status.as_str(),
                r.recovery_attempts,
                ts(r.detected_at),
                r.recovered_at.map(ts),
                r.last_attempt_at.map(ts),
                r.error,
            ],
        )?;
        Ok(())
    }

    pub fn find_spam_record(&self, pool_account_id: &str, provider_id: &str) -> Result<Option<SpamRecord>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("{SPAM_SELECT} WHERE pool_account_id = ?1 AND provider_id = ?2"),
                params![pool_account_id, provider_id],
                row_to_spam,
            )
            .optional()?)
    }

    /// Record the outcome of a recovery attempt, bumping the attempt counter.
    pub fn record_spam_attempt(
        &self,
        id: &str,
        status: SpamStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let at = ts(now);
        conn.execute(
            "UPDATE spam_records SET status = ?2, error = ?3, recovery_attempts = recovery_attempts + 1,
                last_attempt_at = ?4,
                recovered_at = CASE WHEN ?2 = 'recovered' THEN ?4 ELSE recovered_at END
             WHERE id = ?1",
            params![id, status.as_str(), error, at],
        )?;
        Ok(())
    }

    pub fn spam_stats(&self, sender_account_id: &str) -> Result<SpamStats> {
        let conn = self.conn()?;
        let (total, recovered): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'recovered' THEN 1 ELSE 0 END), 0)
             FROM spam_records WHERE sender_account_id = ?1",
            params![sender_account_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(SpamStats {
            total: total as u64,
            recovered: recovered as u64,
        })
    }

    /// Detections per status since `since`, for the spam report.
    pub fn spam_status_counts(&self, since: DateTime<Utc>) -> Result<Vec<(SpamStatus, u64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM spam_records WHERE detected_at >= ?1 GROUP BY status ORDER BY status",
        )?;
        let rows = stmt.query_map(params![ts(since)], |r| {
            Ok((parse_enum::<SpamStatus>(r, 0)?, r.get::<_, i64>(1)? as u64))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::*;
    use chrono::{Duration, Utc};
    use inboxwarm_core::types::{SpamRecord, SpamStatus};

    fn record(pool: &str, sender: &str, provider_id: &str) -> SpamRecord {
        SpamRecord {
            id: uuid::Uuid::new_v4().to_string(),
            message_id: None,
            pool_account_id: pool.into(),
            sender_account_id: Some(sender.into()),
            provider_id: provider_id.into(),
            subject: "Hello".into(),
            from: "w@example.com".into(),
            to: "p@example.com".into(),
            snippet: String::new(),
            status: SpamStatus::Detected,
            recovery_attempts: 0,
            detected_at: Utc::now(),
            recovered_at: None,
            last_attempt_at: None,
            error: None,
        }
    }

    #[test]
    fn test_spam_attempts_and_stats() {
        let db = temp_db();
        let w = warmup_account(&db, "w@example.com");
        let p = pool_account(&db, "p@example.com");
        let a = record(&p.id, &w.id, "101");
        let b = record(&p.id, &w.id, "102");
        db.insert_spam_record(&a).unwrap();
        db.insert_spam_record(&b).unwrap();

        db.record_spam_attempt(&a.id, SpamStatus::Recovered, None, Utc::now()).unwrap();
        db.record_spam_attempt(&b.id, SpamStatus::Failed, Some("imap move"), Utc::now()).unwrap();
        db.record_spam_attempt(&b.id, SpamStatus::Failed, Some("imap move"), Utc::now()).unwrap();

        let a2 = db.find_spam_record(&p.id, "101").unwrap().unwrap();
        assert_eq!(a2.status, SpamStatus::Recovered);
        assert!(a2.recovered_at.is_some());
        let b2 = db.find_spam_record(&p.id, "102").unwrap().unwrap();
        assert_eq!(b2.recovery_attempts, 2);

        let stats = db.spam_stats(&w.id).unwrap();
        assert_eq!((stats.total, stats.recovered), (2, 1));

        let counts = db.spam_status_counts(Utc::now() - Duration::hours(1)).unwrap();
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn test_duplicate_detection_rejected() {
        let db = temp_db();
        let w = warmup_account(&db, "w@example.com");
        let p = pool_account(&db, "p@example.com");
        db.insert_spam_record(&record(&p.id, &w.id, "7")).unwrap();
        assert!(db.insert_spam_record(&record(&p.id, &w.id, "7")).is_err());
    }
}
