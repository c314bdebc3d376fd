//! Schedule slot persistence and compare-and-swap transitions.

use chrono::{DateTime, NaiveDate, Utc};
use inboxwarm_core::error::{Result, WarmupError};
use inboxwarm_core::types::{ScheduleSlot, SlotStatus};
use rusqlite::{Connection, params};

use crate::{WarmupDb, day, parse_day, parse_enum, parse_opt_ts, parse_ts, ts};

const SLOT_SELECT: &str = "SELECT s.id,s.account_id,s.scheduled_at,s.schedule_date,s.period,s.status,s.retry_count,s.last_error,s.message_id,s.claimed_at,s.sent_at,s.created_at,s.updated_at FROM schedule_slots s";

fn row_to_slot(row: &rusqlite::Row) -> rusqlite::Result<ScheduleSlot> {
    Ok(ScheduleSlot {
        id: row.get(0)?,
        account_id: row.get(1)?,
        scheduled_at: parse_ts(row, 2)?,
        schedule_date: parse_day(row, 3)?,
        period: parse_enum(row, 4)?,
        status: parse_enum(row, 5)?,
        retry_count: row.get(6)?,
        last_error: row.get(7)?,
        message_id: row.get(8)?,
        claimed_at: parse_opt_ts(row, 9)?,
        sent_at: parse_opt_ts(row, 10)?,
        created_at: parse_ts(row, 11)?,
        updated_at: parse_ts(row, 12)?,
    })
}

fn count_for_date(conn: &Connection, account_id: &str, date: NaiveDate) -> Result<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM schedule_slots WHERE account_id = ?1 AND schedule_date = ?2",
        params![account_id, day(date)],
        |r| r.get(0),
    )?;
    Ok(n as usize)
}

fn insert_slot(conn: &Connection, s: &ScheduleSlot) -> Result<()> {
    conn.execute(
        "INSERT INTO schedule_slots (id,account_id,scheduled_at,schedule_date,period,status,retry_count,
            last_error,message_id,claimed_at,sent_at,created_at,updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
        params![
            s.id,
            s.account_id,
            ts(s.scheduled_at),
            day(s.schedule_date),
            s.period.as_str(),
            s.status.as_str(),
            s.retry_count,
            s.last_error,
            s.message_id,
            s.claimed_at.map(ts),
            s.sent_at.map(ts),
            ts(s.created_at),
            ts(s.updated_at),
        ],
    )?;
    Ok(())
}

impl WarmupDb {
    /// Insert a day's slots unless that (account, date) already has any.
    ///
    /// Returns `None` when another run already generated the day.
    pub fn insert_schedule_if_absent(
        &self,
        account_id: &str,
        date: NaiveDate,
        slots: &[ScheduleSlot],
    ) -> Result<Option<usize>> {
        self.with_transaction(|tx| {
            if count_for_date(tx, account_id, date)? > 0 {
                return Ok(None);
            }
            for slot in slots {
                if slot.account_id != account_id || slot.schedule_date != date {
                    return Err(WarmupError::Data(format!(
                        "slot {} does not belong to {account_id}/{date}",
                        slot.id
                    )));
                }
                insert_slot(tx, slot)?;
            }
            Ok(Some(slots.len()))
        })
    }

    pub fn has_schedule_for(&self, account_id: &str, date: NaiveDate) -> Result<bool> {
        let conn = self.conn()?;
        Ok(count_for_date(&conn, account_id, date)? > 0)
    }

    pub fn get_slot(&self, id: &str) -> Result<ScheduleSlot> {
        let conn = self.conn()?;
        conn.query_row(&format!("{SLOT_SELECT} WHERE s.id = ?1"), params![id], row_to_slot)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => WarmupError::NotFound(format!("slot {id}")),
                other => other.into(),
            })
    }

    /// Unclaimed pending slots of active warmup accounts with an instant in `[from, to]`.
    pub fn due_slots(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<ScheduleSlot>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SLOT_SELECT} JOIN accounts a ON a.id = s.account_id
             WHERE s.status = 'pending' AND s.claimed_at IS NULL
               AND s.scheduled_at >= ?1 AND s.scheduled_at <= ?2
               AND a.active = 1 AND a.role = 'warmup'
             ORDER BY s.scheduled_at"
        ))?;
        let rows = stmt.query_map(params![ts(from), ts(to)], row_to_slot)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// All pending slots of an account, earliest first.
    pub fn pending_slots(&self, account_id: &str) -> Result<Vec<ScheduleSlot>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SLOT_SELECT} WHERE s.account_id = ?1 AND s.status = 'pending' ORDER BY s.scheduled_at"
        ))?;
        let rows = stmt.query_map(params![account_id], row_to_slot)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn slots_for_date(&self, account_id: &str, date: NaiveDate) -> Result<Vec<ScheduleSlot>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SLOT_SELECT} WHERE s.account_id = ?1 AND s.schedule_date = ?2 ORDER BY s.scheduled_at"
        ))?;
        let rows = stmt.query_map(params![account_id, day(date)], row_to_slot)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Pending slots whose dispatch claim is older than `before`.
    pub fn expired_claims(&self, before: DateTime<Utc>) -> Result<Vec<ScheduleSlot>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SLOT_SELECT} WHERE s.status = 'pending' AND s.claimed_at IS NOT NULL AND s.claimed_at < ?1"
        ))?;
        let rows = stmt.query_map(params![ts(before)], row_to_slot)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Take the dispatch lease on a pending slot. Only one caller gets `true`.
    pub fn claim_slot(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE schedule_slots SET claimed_at = ?2, updated_at = ?2
             WHERE id = ?1 AND status = 'pending' AND claimed_at IS NULL",
            params![id, ts(now)],
        )?;
        Ok(changed == 1)
    }

    /// pending → sent, recording the resulting message.
    pub fn mark_slot_sent(&self, id: &str, message_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE schedule_slots SET status = 'sent', message_id = ?2, sent_at = ?3, claimed_at = NULL,
                last_error = NULL, updated_at = ?3
             WHERE id = ?1 AND status = 'pending'",
            params![id, message_id, ts(now)],
        )?;
        Ok(changed == 1)
    }

    /// pending → failed, incrementing the retry count.
    pub fn mark_slot_failed(&self, id: &str, error: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE schedule_slots SET status = 'failed', last_error = ?2, retry_count = retry_count + 1,
                claimed_at = NULL, updated_at = ?3
             WHERE id = ?1 AND status = 'pending'",
            params![id, error, ts(now)],
        )?;
        Ok(changed == 1)
    }

    /// pending → skipped.
    pub fn mark_slot_skipped(&self, id: &str, reason: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE schedule_slots SET status = 'skipped', last_error = ?2, claimed_at = NULL, updated_at = ?3
             WHERE id = ?1 AND status = 'pending'",
            params![id, reason, ts(now)],
        )?;
        Ok(changed == 1)
    }

    /// Move a failed or stale pending slot to a new instant, if it is still in `from`.
    /// The retry count is left alone; only `mark_slot_failed` bumps it.
    pub fn rearm_slot(
        &self,
        id: &str,
        from: SlotStatus,
        new_at: DateTime<Utc>,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if !from.can_rearm_from() {
            return Err(WarmupError::Data(format!("cannot re-arm a {from} slot")));
        }
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE schedule_slots SET status = 'pending', scheduled_at = ?3, last_error = ?4,
                claimed_at = NULL, updated_at = ?5
             WHERE id = ?1 AND status = ?2 AND claimed_at IS NULL",
            params![id, from.as_str(), ts(new_at), note, ts(now)],
        )?;
        Ok(changed == 1)
    }

    /// Skip every pending slot of an account, in-flight ones included.
    pub fn skip_pending_for_account(
        &self,
        account_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE schedule_slots SET status = 'skipped', last_error = ?2, claimed_at = NULL, updated_at = ?3
             WHERE account_id = ?1 AND status = 'pending'",
            params![account_id, reason, ts(now)],
        )?;
        Ok(changed)
    }

    /// Skip unclaimed pending slots scheduled before `before`; past days the sweep no longer looks at.
    pub fn skip_pending_before(&self, before: DateTime<Utc>, reason: &str, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE schedule_slots SET status = 'skipped', last_error = ?2, updated_at = ?3
             WHERE status = 'pending' AND claimed_at IS NULL AND scheduled_at < ?1",
            params![ts(before), reason, ts(now)],
        )?;
        Ok(changed)
    }

    /// Delete terminal slots generated before `before`.
    pub fn delete_terminal_slots_before(&self, before: NaiveDate) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM schedule_slots
             WHERE schedule_date < ?1 AND status IN ('sent', 'failed', 'skipped')",
            params![day(before)],
        )?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::*;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use inboxwarm_core::types::{ActivityPeriod, ScheduleSlot, SlotStatus};
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn slots_for(account_id: &str, n: usize) -> Vec<ScheduleSlot> {
        let base = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                ScheduleSlot::pending(
                    account_id,
                    base + Duration::minutes(10 * i as i64),
                    date(),
                    ActivityPeriod::Peak,
                )
            })
            .collect()
    }

    #[test]
    fn test_generation_guard_is_idempotent() {
        let db = temp_db();
        let acct = warmup_account(&db, "w@example.com");

        let first = db.insert_schedule_if_absent(&acct.id, date(), &slots_for(&acct.id, 5)).unwrap();
        assert_eq!(first, Some(5));
        let second = db.insert_schedule_if_absent(&acct.id, date(), &slots_for(&acct.id, 5)).unwrap();
        assert_eq!(second, None);
        assert_eq!(db.slots_for_date(&acct.id, date()).unwrap().len(), 5);
        assert!(db.has_schedule_for(&acct.id, date()).unwrap());
    }

    #[test]
    fn test_foreign_slot_aborts_whole_insert() {
        let db = temp_db();
        let acct = warmup_account(&db, "w@example.com");
        let mut slots = slots_for(&acct.id, 3);
        slots[2].schedule_date = date().succ_opt().unwrap();
        assert!(db.insert_schedule_if_absent(&acct.id, date(), &slots).is_err());
        assert!(db.slots_for_date(&acct.id, date()).unwrap().is_empty());
    }

    #[test]
    fn test_due_window_and_claim() {
        let db = temp_db();
        let acct = warmup_account(&db, "w@example.com");
        db.insert_schedule_if_absent(&acct.id, date(), &slots_for(&acct.id, 6)).unwrap();

        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 21, 0).unwrap();
        let due = db.due_slots(now - Duration::minutes(5), now + Duration::minutes(2)).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].scheduled_at, Utc.with_ymd_and_hms(2026, 3, 2, 9, 20, 0).unwrap());

        assert!(db.claim_slot(&due[0].id, now).unwrap());
        assert!(!db.claim_slot(&due[0].id, now).unwrap());
        let again = db.due_slots(now - Duration::minutes(5), now + Duration::minutes(2)).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_concurrent_claimers_one_wins() {
        let db = Arc::new(temp_db());
        let acct = warmup_account(&db, "w@example.com");
        let slots = slots_for(&acct.id, 1);
        db.insert_schedule_if_absent(&acct.id, date(), &slots).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();

        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db = Arc::clone(&db);
                let barrier = Arc::clone(&barrier);
                let id = slots[0].id.clone();
                thread::spawn(move || {
                    barrier.wait();
                    db.claim_slot(&id, now).unwrap()
                })
            })
            .collect();
        let wins = handles.into_iter().map(|h| h.join().unwrap()).filter(|won| *won).count();
        assert_eq!(wins, 1);
        assert_eq!(db.get_slot(&slots[0].id).unwrap().claimed_at, Some(now));
    }

    #[test]
    fn test_concurrent_generation_inserts_once() {
        let db = Arc::new(temp_db());
        let acct = warmup_account(&db, "w@example.com");

        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db = Arc::clone(&db);
                let barrier = Arc::clone(&barrier);
                let slots = slots_for(&acct.id, 5);
                let account_id = acct.id.clone();
                thread::spawn(move || {
                    barrier.wait();
                    db.insert_schedule_if_absent(&account_id, date(), &slots).unwrap()
                })
            })
            .collect();
        let outcomes: Vec<Option<usize>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|o| o.is_some()).count(), 1);
        assert_eq!(db.slots_for_date(&acct.id, date()).unwrap().len(), 5);
    }

    #[test]
    fn test_transitions_are_compare_and_swap() {
        let db = temp_db();
        let acct = warmup_account(&db, "w@example.com");
        let slots = slots_for(&acct.id, 2);
        db.insert_schedule_if_absent(&acct.id, date(), &slots).unwrap();
        let now = Utc::now();

        assert!(db.mark_slot_sent(&slots[0].id, "msg-1", now).unwrap());
        assert!(!db.mark_slot_sent(&slots[0].id, "msg-2", now).unwrap());
        assert!(!db.mark_slot_failed(&slots[0].id, "late", now).unwrap());
        let sent = db.get_slot(&slots[0].id).unwrap();
        assert_eq!(sent.status, SlotStatus::Sent);
        assert_eq!(sent.message_id.as_deref(), Some("msg-1"));

        assert!(db.mark_slot_failed(&slots[1].id, "smtp timeout", now).unwrap());
        let failed = db.get_slot(&slots[1].id).unwrap();
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.last_error.as_deref(), Some("smtp timeout"));
    }

    #[test]
    fn test_rearm_failed_slot() {
        let db = temp_db();
        let acct = warmup_account(&db, "w@example.com");
        let slots = slots_for(&acct.id, 1);
        db.insert_schedule_if_absent(&acct.id, date(), &slots).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        db.mark_slot_failed(&slots[0].id, "boom", now).unwrap();

        let new_at = now + Duration::minutes(30);
        assert!(!db.rearm_slot(&slots[0].id, SlotStatus::Pending, new_at, "x", now).unwrap());
        assert!(db.rearm_slot(&slots[0].id, SlotStatus::Failed, new_at, "Rescheduled", now).unwrap());
        let slot = db.get_slot(&slots[0].id).unwrap();
        assert_eq!(slot.status, SlotStatus::Pending);
        assert_eq!(slot.retry_count, 1);
        assert_eq!(slot.scheduled_at, new_at);
        assert!(db.rearm_slot(&slots[0].id, SlotStatus::Sent, new_at, "x", now).is_err());
    }

    #[test]
    fn test_retry_count_tracks_failures_only() {
        let db = temp_db();
        let acct = warmup_account(&db, "w@example.com");
        let slots = slots_for(&acct.id, 1);
        db.insert_schedule_if_absent(&acct.id, date(), &slots).unwrap();
        let mut now = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();

        for attempt in 1..=4u32 {
            assert!(db.mark_slot_failed(&slots[0].id, "smtp timeout", now).unwrap());
            assert_eq!(db.get_slot(&slots[0].id).unwrap().retry_count, attempt);
            now += Duration::minutes(20);
            assert!(db.rearm_slot(&slots[0].id, SlotStatus::Failed, now, "Rescheduled", now).unwrap());
            assert_eq!(db.get_slot(&slots[0].id).unwrap().retry_count, attempt);
        }
    }

    #[test]
    fn test_stale_pending_rearm_keeps_retry_count() {
        let db = temp_db();
        let acct = warmup_account(&db, "w@example.com");
        let slots = slots_for(&acct.id, 1);
        db.insert_schedule_if_absent(&acct.id, date(), &slots).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();

        assert!(db.rearm_slot(&slots[0].id, SlotStatus::Pending, now, "Rescheduled", now).unwrap());
        let slot = db.get_slot(&slots[0].id).unwrap();
        assert_eq!(slot.retry_count, 0);
        assert_eq!(slot.scheduled_at, now);
    }

    #[test]
    fn test_skip_pending_for_account() {
        let db = temp_db();
        let acct = warmup_account(&db, "w@example.com");
        let slots = slots_for(&acct.id, 4);
        db.insert_schedule_if_absent(&acct.id, date(), &slots).unwrap();
        let now = Utc::now();
        db.mark_slot_sent(&slots[0].id, "m", now).unwrap();
        db.claim_slot(&slots[1].id, now).unwrap();

        assert_eq!(db.skip_pending_for_account(&acct.id, "account deactivated", now).unwrap(), 3);
        assert!(db.pending_slots(&acct.id).unwrap().is_empty());
        // the in-flight send can no longer complete the slot
        assert!(!db.mark_slot_sent(&slots[1].id, "m2", now).unwrap());
    }

    #[test]
    fn test_expired_claims_and_cleanup() {
        let db = temp_db();
        let acct = warmup_account(&db, "w@example.com");
        let slots = slots_for(&acct.id, 2);
        db.insert_schedule_if_absent(&acct.id, date(), &slots).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        db.claim_slot(&slots[0].id, t0).unwrap();

        assert!(db.expired_claims(t0).unwrap().is_empty());
        assert_eq!(db.expired_claims(t0 + Duration::minutes(11)).unwrap().len(), 1);

        db.mark_slot_skipped(&slots[0].id, "dispatch interrupted", t0).unwrap();
        db.mark_slot_sent(&slots[1].id, "m", t0).unwrap();
        assert_eq!(db.delete_terminal_slots_before(date()).unwrap(), 0);
        assert_eq!(db.delete_terminal_slots_before(date().succ_opt().unwrap()).unwrap(), 2);
    }

    #[test]
    fn test_skip_pending_before() {
        let db = temp_db();
        let acct = warmup_account(&db, "w@example.com");
        let slots = slots_for(&acct.id, 3);
        db.insert_schedule_if_absent(&acct.id, date(), &slots).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        db.claim_slot(&slots[0].id, t0).unwrap();

        let cutoff = Utc.with_ymd_and_hms(2026, 3, 2, 9, 15, 0).unwrap();
        assert_eq!(db.skip_pending_before(cutoff, "expired", t0).unwrap(), 1);
        assert_eq!(db.get_slot(&slots[1].id).unwrap().status, SlotStatus::Skipped);
        assert_eq!(db.get_slot(&slots[0].id).unwrap().status, SlotStatus::Pending);
        assert_eq!(db.get_slot(&slots[2].id).unwrap().status, SlotStatus::Pending);
    }
}
