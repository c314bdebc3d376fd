//! Cached score snapshots. Always recomputable; the latest one is the fallback
//! when a fresh calculation fails.

use chrono::{DateTime, Utc};
use inboxwarm_core::error::Result;
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{WarmupDb, ts};

impl WarmupDb {
    /// Replace the account's cached snapshot and its headline score.
    pub fn save_score_snapshot<T: Serialize>(
        &self,
        account_id: &str,
        total: f64,
        snapshot: &T,
        computed_at: DateTime<Utc>,
    ) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        self.with_transaction(|tx| {
            tx.execute(
                "INSERT OR REPLACE INTO score_snapshots (account_id, total, snapshot, computed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![account_id, total, json, ts(computed_at)],
            )?;
            tx.execute(
                "UPDATE accounts SET score = ?2, updated_at = ?3 WHERE id = ?1",
                params![account_id, total, ts(computed_at)],
            )?;
            Ok(())
        })
    }

    pub fn latest_score_snapshot<T: DeserializeOwned>(&self, account_id: &str) -> Result<Option<T>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT snapshot FROM score_snapshots WHERE account_id = ?1",
                params![account_id],
                |r| r.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::*;
    use chrono::Utc;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Snap {
        total: f64,
        grade: String,
    }

    #[test]
    fn test_snapshot_replace_and_load() {
        let db = temp_db();
        let w = warmup_account(&db, "w@example.com");
        assert!(db.latest_score_snapshot::<Snap>(&w.id).unwrap().is_none());

        let first = Snap { total: 71.5, grade: "B".into() };
        db.save_score_snapshot(&w.id, first.total, &first, Utc::now()).unwrap();
        let second = Snap { total: 82.0, grade: "A".into() };
        db.save_score_snapshot(&w.id, second.total, &second, Utc::now()).unwrap();

        assert_eq!(db.latest_score_snapshot::<Snap>(&w.id).unwrap(), Some(second));
        assert_eq!(db.get_account(&w.id).unwrap().score, Some(82.0));
    }
}
