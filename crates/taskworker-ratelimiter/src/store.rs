//! The durable counter store (spec §6 "Persisted state layout").
//!
//! Day/week/month tiers and rolling-window completion records are
//! persisted through `rusqlite` behind a plain `Arc<Mutex<Connection>>`:
//! every call blocks the calling task for the duration of the query.
//! `rusqlite` has no async driver and the queries here are single-row
//! point lookups, so a blocking mutex is simpler than a `spawn_blocking`
//! pool and cheap enough not to matter.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use taskworker_core::WorkerError;

use crate::tier::Tier;

#[derive(Debug, Clone)]
pub struct FixedCounter {
    pub count: u64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// `path` may be a filesystem path or `:memory:`.
    pub fn open(path: &str) -> Result<Self, WorkerError> {
        let conn = Connection::open(path)
            .map_err(|e| WorkerError::Configuration(format!("opening rate limit store: {e}")))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rate_limits (
                period TEXT PRIMARY KEY,
                count INTEGER NOT NULL,
                window_start TEXT NOT NULL,
                window_end TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS task_completions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                completed_at TEXT NOT NULL,
                kind TEXT NOT NULL,
                task_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_task_completions_completed_at
                ON task_completions(completed_at);
            CREATE INDEX IF NOT EXISTS idx_rate_limits_period ON rate_limits(period);",
        )
        .map_err(|e| WorkerError::Configuration(format!("migrating rate limit store: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn fixed_get(&self, tier: Tier) -> Result<Option<FixedCounter>, WorkerError> {
        let conn = self.conn.lock().expect("rate limit store mutex poisoned");
        let result = conn.query_row(
            "SELECT count, window_start, window_end FROM rate_limits WHERE period = ?1",
            params![tier.as_str()],
            |row| {
                let count: i64 = row.get(0)?;
                let window_start: String = row.get(1)?;
                let window_end: String = row.get(2)?;
                Ok((count, window_start, window_end))
            },
        );
        match result {
            Ok((count, start, end)) => Ok(Some(FixedCounter {
                count: count.max(0) as u64,
                window_start: parse_ts(&start)?,
                window_end: parse_ts(&end)?,
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(WorkerError::Transient(format!("reading rate limit row: {e}"))),
        }
    }

    /// Sets the counter for `tier` to `count` within `[window_start,
    /// window_end)`, replacing any prior row (used both to increment within
    /// a window and to reset on rollover).
    pub fn fixed_upsert(
        &self,
        tier: Tier,
        count: u64,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), WorkerError> {
        let conn = self.conn.lock().expect("rate limit store mutex poisoned");
        conn.execute(
            "INSERT INTO rate_limits (period, count, window_start, window_end, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(period) DO UPDATE SET
                count = excluded.count,
                window_start = excluded.window_start,
                window_end = excluded.window_end,
                updated_at = excluded.updated_at",
            params![
                tier.as_str(),
                count as i64,
                window_start.to_rfc3339(),
                window_end.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| WorkerError::Transient(format!("writing rate limit row: {e}")))?;
        Ok(())
    }

    /// Counts completion records with `completed_at >= since`, for rolling
    /// windows.
    pub fn rolling_count_since(&self, since: DateTime<Utc>) -> Result<u64, WorkerError> {
        let conn = self.conn.lock().expect("rate limit store mutex poisoned");
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM task_completions WHERE completed_at >= ?1",
                params![since.to_rfc3339()],
                |row| row.get(0),
            )
            .map_err(|e| WorkerError::Transient(format!("counting completions: {e}")))?;
        Ok(count.max(0) as u64)
    }

    pub fn insert_completion(
        &self,
        completed_at: DateTime<Utc>,
        kind: &str,
        task_id: Option<&str>,
    ) -> Result<(), WorkerError> {
        let conn = self.conn.lock().expect("rate limit store mutex poisoned");
        conn.execute(
            "INSERT INTO task_completions (completed_at, kind, task_id) VALUES (?1, ?2, ?3)",
            params![completed_at.to_rfc3339(), kind, task_id],
        )
        .map_err(|e| WorkerError::Transient(format!("recording completion: {e}")))?;
        Ok(())
    }

    /// Deletes completion records older than `cutoff` (spec: 35-day
    /// retention).
    pub fn prune_completions_before(&self, cutoff: DateTime<Utc>) -> Result<usize, WorkerError> {
        let conn = self.conn.lock().expect("rate limit store mutex poisoned");
        let deleted = conn
            .execute(
                "DELETE FROM task_completions WHERE completed_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .map_err(|e| WorkerError::Transient(format!("pruning completions: {e}")))?;
        Ok(deleted)
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, WorkerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| WorkerError::Transient(format!("corrupt timestamp in rate limit store: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_round_trip() {
        let store = Store::open(":memory:").unwrap();
        assert!(store.fixed_get(Tier::Minute).unwrap().is_none());

        let start = Utc.with_ymd_and_hms(2026, 7, 31, 10, 0, 0).unwrap();
        let end = start + chrono::Duration::minutes(1);
        store.fixed_upsert(Tier::Minute, 3, start, end, start).unwrap();

        let row = store.fixed_get(Tier::Minute).unwrap().unwrap();
        assert_eq!(row.count, 3);
        assert_eq!(row.window_start, start);
    }

    #[test]
    fn rolling_counts_and_prunes() {
        let store = Store::open(":memory:").unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 7, 31, 0, 0, 0).unwrap();
        store.insert_completion(t0, "text-embedding", Some("a")).unwrap();
        store.insert_completion(t1, "text-embedding", Some("b")).unwrap();

        assert_eq!(store.rolling_count_since(t0).unwrap(), 2);
        assert_eq!(store.rolling_count_since(t1).unwrap(), 1);

        let deleted = store
            .prune_completions_before(t1 - chrono::Duration::days(1))
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.rolling_count_since(t0).unwrap(), 1);
    }
}
