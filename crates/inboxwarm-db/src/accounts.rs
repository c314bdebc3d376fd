//! Account persistence.

use chrono::{DateTime, Utc};
use inboxwarm_core::error::{Result, WarmupError};
use inboxwarm_core::types::{Account, Credential, Role};
use rusqlite::{Connection, OptionalExtension, params};

use crate::{WarmupDb, day, parse_enum, parse_ts, ts};

/// Shared SELECT column list for account queries.
const ACCOUNT_SELECT: &str = "SELECT id,email,display_name,role,timezone,target_open_rate,target_reply_rate,target_volume,ramp_day,daily_quota,active,last_advanced_on,open_margin,credential,score,created_at,updated_at FROM accounts";

fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<Account> {
    let last_advanced_on = match row.get::<_, Option<String>>(11)? {
        Some(raw) => Some(
            chrono::NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, Box::new(e))
            })?,
        ),
        None => None,
    };
    Ok(Account {
        id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        role: parse_enum(row, 3)?,
        timezone: row.get(4)?,
        target_open_rate: row.get(5)?,
        target_reply_rate: row.get(6)?,
        target_volume: row.get(7)?,
        ramp_day: row.get(8)?,
        daily_quota: row.get(9)?,
        active: row.get::<_, i32>(10)? != 0,
        last_advanced_on,
        open_margin: row.get(12)?,
        credential: row.get::<_, Option<String>>(13)?.map(Credential),
        score: row.get(14)?,
        created_at: parse_ts(row, 15)?,
        updated_at: parse_ts(row, 16)?,
    })
}

pub(crate) fn load_account(conn: &Connection, id: &str) -> Result<Account> {
    conn.query_row(
        &format!("{ACCOUNT_SELECT} WHERE id = ?1"),
        params![id],
        row_to_account,
    )
    .optional()?
    .ok_or_else(|| WarmupError::NotFound(format!("account {id}")))
}

pub(crate) fn store_account(conn: &Connection, a: &Account) -> Result<()> {
    let changed = conn.execute(
        "UPDATE accounts SET email=?2, display_name=?3, role=?4, timezone=?5, target_open_rate=?6,
            target_reply_rate=?7, target_volume=?8, ramp_day=?9, daily_quota=?10, active=?11,
            last_advanced_on=?12, open_margin=?13, credential=?14, score=?15, updated_at=?16
         WHERE id=?1",
        params![
            a.id,
            a.email,
            a.display_name,
            a.role.as_str(),
            a.timezone,
            a.target_open_rate,
            a.target_reply_rate,
            a.target_volume,
            a.ramp_day,
            a.daily_quota,
            a.active as i32,
            a.last_advanced_on.map(day),
            a.open_margin,
            a.credential.as_ref().map(|c| c.as_str().to_string()),
            a.score,
            ts(a.updated_at),
        ],
    )?;
    if changed == 0 {
        return Err(WarmupError::NotFound(format!("account {}", a.id)));
    }
    Ok(())
}

impl WarmupDb {
    pub fn insert_account(&self, a: &Account) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO accounts (id,email,display_name,role,timezone,target_open_rate,target_reply_rate,
                target_volume,ramp_day,daily_quota,active,last_advanced_on,open_margin,credential,score,
                created_at,updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
            params![
                a.id,
                a.email,
                a.display_name,
                a.role.as_str(),
                a.timezone,
                a.target_open_rate,
                a.target_reply_rate,
                a.target_volume,
                a.ramp_day,
                a.daily_quota,
                a.active as i32,
                a.last_advanced_on.map(day),
                a.open_margin,
                a.credential.as_ref().map(|c| c.as_str().to_string()),
                a.score,
                ts(a.created_at),
                ts(a.updated_at),
            ],
        )
        .map_err(|e| WarmupError::Store(format!("Insert account {}: {e}", a.email)))?;
        tracing::info!("👤 Account added: {} ({})", a.email, a.role);
        Ok(())
    }

    pub fn update_account(&self, a: &Account) -> Result<()> {
        let conn = self.conn()?;
        store_account(&conn, a)
    }

    pub fn get_account(&self, id: &str) -> Result<Account> {
        let conn = self.conn()?;
        load_account(&conn, id)
    }

    pub fn get_account_by_email(&self, email: &str) -> Result<Account> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("{ACCOUNT_SELECT} WHERE lower(email) = lower(?1)"),
            params![email],
            row_to_account,
        )
        .optional()?
        .ok_or_else(|| WarmupError::NotFound(format!("account {email}")))
    }

    /// Accounts filtered by role; `active_only` drops deactivated ones.
    pub fn list_accounts(&self, role: Option<Role>, active_only: bool) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{ACCOUNT_SELECT} WHERE (?1 IS NULL OR role = ?1) AND (?2 = 0 OR active = 1) ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![role.map(|r| r.as_str()), active_only as i32], row_to_account)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Active accounts of a role, addresses only.
    pub fn active_emails(&self, role: Role) -> Result<Vec<String>> {
        Ok(self
            .list_accounts(Some(role), true)?
            .into_iter()
            .map(|a| a.email)
            .collect())
    }

    /// Distinct timezones of active warmup accounts.
    pub fn warmup_timezones(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT timezone FROM accounts WHERE role = 'warmup' AND active = 1 ORDER BY timezone",
        )?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_account_active(&self, id: &str, active: bool, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE accounts SET active = ?2, updated_at = ?3 WHERE id = ?1 AND active != ?2",
            params![id, active as i32, ts(now)],
        )?;
        Ok(changed > 0)
    }

    /// Persist a credential handed back by `Mailbox::authenticate`.
    pub fn save_credential(&self, id: &str, credential: &Credential, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE accounts SET credential = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, credential.as_str(), ts(now)],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::*;
    use chrono::{NaiveDate, Utc};
    use inboxwarm_core::types::{Credential, Role};

    #[test]
    fn test_insert_and_get_account() {
        let db = temp_db();
        let acct = warmup_account(&db, "w@example.com");
        let loaded = db.get_account(&acct.id).unwrap();
        assert_eq!(loaded.email, "w@example.com");
        assert_eq!(loaded.role, Role::Warmup);
        assert_eq!(loaded.ramp_day, 10);
        assert!(loaded.active);
        assert!(db.get_account("missing").is_err());
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let db = temp_db();
        warmup_account(&db, "w@example.com");
        let dup = inboxwarm_core::types::Account::new("w@example.com", Role::Pool, "UTC");
        assert!(db.insert_account(&dup).is_err());
    }

    #[test]
    fn test_update_account_roundtrips_ramp_state() {
        let db = temp_db();
        let mut acct = warmup_account(&db, "w@example.com");
        acct.last_advanced_on = NaiveDate::from_ymd_opt(2026, 3, 2);
        acct.open_margin = Some(0.03);
        db.update_account(&acct).unwrap();

        let loaded = db.get_account_by_email("W@example.com").unwrap();
        assert_eq!(loaded.last_advanced_on, NaiveDate::from_ymd_opt(2026, 3, 2));
        assert_eq!(loaded.open_margin, Some(0.03));
    }

    #[test]
    fn test_list_accounts_filters() {
        let db = temp_db();
        let w = warmup_account(&db, "w@example.com");
        pool_account(&db, "p1@example.com");
        pool_account(&db, "p2@example.com");
        db.set_account_active(&w.id, false, Utc::now()).unwrap();

        assert_eq!(db.list_accounts(None, false).unwrap().len(), 3);
        assert_eq!(db.list_accounts(Some(Role::Pool), true).unwrap().len(), 2);
        assert!(db.list_accounts(Some(Role::Warmup), true).unwrap().is_empty());
        assert_eq!(db.active_emails(Role::Pool).unwrap().len(), 2);
    }

    #[test]
    fn test_save_credential() {
        let db = temp_db();
        let acct = warmup_account(&db, "w@example.com");
        db.save_credential(&acct.id, &Credential::new("{\"password\":\"x\"}"), Utc::now())
            .unwrap();
        let loaded = db.get_account(&acct.id).unwrap();
        assert_eq!(loaded.credential.unwrap().as_str(), "{\"password\":\"x\"}");
    }
}
