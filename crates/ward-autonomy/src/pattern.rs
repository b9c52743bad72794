use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use ward_core::{Result, WardError};

/// History of human approvals for one action type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalPattern {
    pub action_type: String,
    /// Approvals since the last rejection.
    pub consecutive_approvals: u32,
    pub total_approvals: u32,
    pub last_approved_at: DateTime<Utc>,
}

/// Answers "has this action type ever been approved before?".
///
/// Rows are created on first approval and never removed.
pub trait ApprovalPatternStore: Send + Sync {
    fn get(&self, action_type: &str) -> Result<Option<ApprovalPattern>>;
    fn record_approval(&self, action_type: &str) -> Result<ApprovalPattern>;
    /// Reset the consecutive-approval streak. No-op for never-approved actions.
    fn record_rejection(&self, action_type: &str) -> Result<()>;
    fn list(&self) -> Result<Vec<ApprovalPattern>>;
}

/// SQLite-backed approval pattern store.
#[derive(Clone)]
pub struct SqlitePatternStore {
    db: Arc<Mutex<Connection>>,
}

fn storage_err(e: rusqlite::Error) -> WardError {
    WardError::Storage(e.to_string())
}

impl SqlitePatternStore {
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening approval pattern store");
        let conn = Connection::open(path).map_err(storage_err)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA busy_timeout=5000;
            CREATE TABLE IF NOT EXISTS approval_patterns (
                action_type TEXT PRIMARY KEY,
                consecutive_approvals INTEGER NOT NULL DEFAULT 0,
                total_approvals INTEGER NOT NULL DEFAULT 0,
                last_approved_at TEXT NOT NULL
            );
            ",
        )
        .map_err(storage_err)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory store (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    fn row_to_pattern(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, u32, u32, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }

    fn into_pattern(raw: (String, u32, u32, String)) -> Result<ApprovalPattern> {
        let (action_type, consecutive_approvals, total_approvals, ts) = raw;
        let last_approved_at = DateTime::parse_from_rfc3339(&ts)
            .map_err(|e| WardError::Storage(format!("bad timestamp for {action_type}: {e}")))?
            .with_timezone(&Utc);
        Ok(ApprovalPattern {
            action_type,
            consecutive_approvals,
            total_approvals,
            last_approved_at,
        })
    }
}

impl ApprovalPatternStore for SqlitePatternStore {
    fn get(&self, action_type: &str) -> Result<Option<ApprovalPattern>> {
        let db = self.db.lock();
        let raw = db
            .query_row(
                "SELECT action_type, consecutive_approvals, total_approvals, last_approved_at
                 FROM approval_patterns WHERE action_type = ?1",
                params![action_type],
                Self::row_to_pattern,
            )
            .optional()
            .map_err(storage_err)?;
        raw.map(Self::into_pattern).transpose()
    }

    fn record_approval(&self, action_type: &str) -> Result<ApprovalPattern> {
        let now = Utc::now().to_rfc3339();
        let raw = {
            let db = self.db.lock();
            db.execute(
                "INSERT INTO approval_patterns (action_type, consecutive_approvals, total_approvals, last_approved_at)
                 VALUES (?1, 1, 1, ?2)
                 ON CONFLICT(action_type) DO UPDATE SET
                    consecutive_approvals = consecutive_approvals + 1,
                    total_approvals = total_approvals + 1,
                    last_approved_at = excluded.last_approved_at",
                params![action_type, now],
            )
            .map_err(storage_err)?;
            db.query_row(
                "SELECT action_type, consecutive_approvals, total_approvals, last_approved_at
                 FROM approval_patterns WHERE action_type = ?1",
                params![action_type],
                Self::row_to_pattern,
            )
            .map_err(storage_err)?
        };
        let pattern = Self::into_pattern(raw)?;
        debug!(
            action = action_type,
            consecutive = pattern.consecutive_approvals,
            "approval recorded"
        );
        Ok(pattern)
    }

    fn record_rejection(&self, action_type: &str) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "UPDATE approval_patterns SET consecutive_approvals = 0 WHERE action_type = ?1",
            params![action_type],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<ApprovalPattern>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT action_type, consecutive_approvals, total_approvals, last_approved_at
                 FROM approval_patterns ORDER BY action_type",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], Self::row_to_pattern)
            .map_err(storage_err)?;
        let mut patterns = Vec::new();
        for row in rows {
            patterns.push(Self::into_pattern(row.map_err(storage_err)?)?);
        }
        Ok(patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_action_has_no_pattern() {
        let store = SqlitePatternStore::open_in_memory().unwrap();
        assert!(store.get("email.send").unwrap().is_none());
    }

    #[test]
    fn test_approvals_accumulate() {
        let store = SqlitePatternStore::open_in_memory().unwrap();
        store.record_approval("email.send").unwrap();
        let p = store.record_approval("email.send").unwrap();
        assert_eq!(p.consecutive_approvals, 2);
        assert_eq!(p.total_approvals, 2);
    }

    #[test]
    fn test_rejection_resets_streak_but_keeps_row() {
        let store = SqlitePatternStore::open_in_memory().unwrap();
        store.record_approval("email.send").unwrap();
        store.record_approval("email.send").unwrap();
        store.record_rejection("email.send").unwrap();
        let p = store.get("email.send").unwrap().unwrap();
        assert_eq!(p.consecutive_approvals, 0);
        assert_eq!(p.total_approvals, 2);
    }

    #[test]
    fn test_rejection_of_unknown_action_creates_nothing() {
        let store = SqlitePatternStore::open_in_memory().unwrap();
        store.record_rejection("files.delete").unwrap();
        assert!(store.list().unwrap().is_empty());
    }
}
