use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::StoreError;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default retention for attempt records.
pub const DEFAULT_ATTEMPT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    InProgress,
    Completed,
}

impl AttemptStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_id: String,
    pub status: AttemptStatus,
    /// Present iff `status == Completed`.
    pub result: Option<serde_json::Value>,
    /// Unix seconds at claim time.
    pub created_ts: i64,
}

impl AttemptRecord {
    /// Result as seen by a caller that lost the claim: the stored result, or a
    /// synthetic in-progress marker instead of partial state.
    pub fn caller_result(&self) -> serde_json::Value {
        match (&self.status, &self.result) {
            (AttemptStatus::Completed, Some(result)) => result.clone(),
            _ => in_progress_result(),
        }
    }
}

/// Marker returned while another caller owns the attempt.
pub fn in_progress_result() -> serde_json::Value {
    json!({
        "ok": false,
        "error_code": "IN_PROGRESS",
        "error": "attempt is still executing",
    })
}

/// Persistent idempotency ledger keyed by attempt id.
///
/// The primary-key constraint is the only arbiter of who owns an attempt:
/// `claim` is an `INSERT OR IGNORE`, so any number of connections (threads or
/// processes) racing on one id produce exactly one winner.
#[derive(Clone)]
pub struct AttemptLedger {
    conn: Arc<Mutex<Connection>>,
}

impl AttemptLedger {
    /// Open (or create) the ledger database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened attempt ledger");
        Self::init(conn)
    }

    /// Private, non-durable ledger.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS attempts (
                attempt_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                result TEXT,
                created_ts INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS attempts_created_idx ON attempts(created_ts);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Task("ledger connection lock poisoned".into()))
    }

    /// Try to take ownership of `attempt_id`. Returns `true` iff this call created
    /// the IN_PROGRESS record.
    pub fn claim(&self, attempt_id: &str, now: i64) -> Result<bool, StoreError> {
        let inserted = self.conn()?.execute(
            "INSERT OR IGNORE INTO attempts (attempt_id, status, result, created_ts)
             VALUES (?1, ?2, NULL, ?3)",
            params![attempt_id, AttemptStatus::InProgress.as_str(), now],
        )?;
        Ok(inserted == 1)
    }

    /// Record the terminal result. Repeating the call with the same result is a
    /// no-op in effect.
    pub fn complete(&self, attempt_id: &str, result: &serde_json::Value) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(result)?;
        let updated = self.conn()?.execute(
            "UPDATE attempts SET status = ?2, result = ?3 WHERE attempt_id = ?1",
            params![attempt_id, AttemptStatus::Completed.as_str(), encoded],
        )?;
        if updated == 0 {
            tracing::warn!(attempt_id, "completed an attempt that has no record");
        }
        Ok(())
    }

    pub fn get(&self, attempt_id: &str) -> Result<Option<AttemptRecord>, StoreError> {
        let row: Option<(String, Option<String>, i64)> = self
            .conn()?
            .query_row(
                "SELECT status, result, created_ts FROM attempts WHERE attempt_id = ?1",
                params![attempt_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;

        let Some((status, result, created_ts)) = row else {
            return Ok(None);
        };
        let status = AttemptStatus::parse(&status).ok_or_else(|| StoreError::Corrupt {
            key: attempt_id.to_string(),
            reason: format!("unknown status {status:?}"),
        })?;
        let result = match (status, result) {
            (AttemptStatus::Completed, Some(raw)) => Some(serde_json::from_str(&raw)?),
            (AttemptStatus::Completed, None) => {
                return Err(StoreError::Corrupt {
                    key: attempt_id.to_string(),
                    reason: "completed without result".into(),
                })
            }
            (AttemptStatus::InProgress, _) => None,
        };

        Ok(Some(AttemptRecord {
            attempt_id: attempt_id.to_string(),
            status,
            result,
            created_ts,
        }))
    }

    /// Delete records claimed more than `ttl` before `now`. Returns the number of
    /// records removed.
    pub fn evict_expired(&self, ttl: Duration, now: i64) -> Result<usize, StoreError> {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(ttl_secs);
        let removed = self
            .conn()?
            .execute("DELETE FROM attempts WHERE created_ts < ?1", params![cutoff])?;
        if removed > 0 {
            tracing::info!(removed, cutoff, "evicted expired attempt records");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claim_wins() {
        let ledger = AttemptLedger::open_in_memory().unwrap();
        assert!(ledger.claim("a", 10).unwrap());
        assert!(!ledger.claim("a", 11).unwrap());
        assert!(ledger.claim("b", 11).unwrap());
    }

    #[test]
    fn in_progress_record_hides_partial_state() {
        let ledger = AttemptLedger::open_in_memory().unwrap();
        ledger.claim("a", 10).unwrap();
        let rec = ledger.get("a").unwrap().unwrap();
        assert_eq!(rec.status, AttemptStatus::InProgress);
        assert!(rec.result.is_none());
        assert_eq!(rec.created_ts, 10);
        assert_eq!(rec.caller_result()["error_code"], "IN_PROGRESS");
        assert_eq!(rec.caller_result()["ok"], false);
    }

    #[test]
    fn complete_stores_result() {
        let ledger = AttemptLedger::open_in_memory().unwrap();
        ledger.claim("a", 10).unwrap();
        let result = json!({"ok": true, "bytes_written": 3});
        ledger.complete("a", &result).unwrap();
        ledger.complete("a", &result).unwrap();

        let rec = ledger.get("a").unwrap().unwrap();
        assert_eq!(rec.status, AttemptStatus::Completed);
        assert_eq!(rec.caller_result(), result);
    }

    #[test]
    fn unknown_attempt_is_none() {
        let ledger = AttemptLedger::open_in_memory().unwrap();
        assert!(ledger.get("nope").unwrap().is_none());
    }

    #[test]
    fn eviction_respects_ttl() {
        let ledger = AttemptLedger::open_in_memory().unwrap();
        ledger.claim("old", 0).unwrap();
        ledger.claim("new", 90_000).unwrap();

        let removed = ledger.evict_expired(DEFAULT_ATTEMPT_TTL, 90_000).unwrap();
        assert_eq!(removed, 1);
        assert!(ledger.get("old").unwrap().is_none());
        assert!(ledger.get("new").unwrap().is_some());
        // An evicted id can be claimed again.
        assert!(ledger.claim("old", 90_001).unwrap());
    }

    #[test]
    fn file_ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attempts.db");
        {
            let ledger = AttemptLedger::open(&path).unwrap();
            ledger.claim("a", 1).unwrap();
            ledger.complete("a", &json!({"ok": true})).unwrap();
        }
        let ledger = AttemptLedger::open(&path).unwrap();
        assert!(!ledger.claim("a", 2).unwrap());
        assert_eq!(ledger.get("a").unwrap().unwrap().caller_result(), json!({"ok": true}));
    }

    #[test]
    fn concurrent_connections_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attempts.db");

        // Separate connections, as separate worker processes would have.
        let ledgers: Vec<AttemptLedger> =
            (0..16).map(|_| AttemptLedger::open(&path).unwrap()).collect();
        let barrier = Arc::new(std::sync::Barrier::new(ledgers.len()));

        let handles: Vec<_> = ledgers
            .into_iter()
            .map(|ledger| {
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    ledger.claim("A", 1).unwrap()
                })
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }
}
