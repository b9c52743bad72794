use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use ward_core::{ActionStatus, Direction, Result, WardError, now_iso};

use crate::canonical::sha256_hex;

/// `previous chain_hash` of the very first entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// An entry as handed to [`AuditChain::append`], before it is chained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuditEntry {
    pub id: String,
    pub request_id: String,
    pub timestamp: String,
    pub action: String,
    pub direction: Direction,
    pub status: ActionStatus,
    pub payload_hash: String,
    pub signature: String,
    pub metadata: Value,
    pub estimated_time_saved_seconds: u64,
}

impl NewAuditEntry {
    /// A fresh entry with its own id and the current time.
    pub fn new(
        request_id: impl Into<String>,
        action: impl Into<String>,
        direction: Direction,
        status: ActionStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id: request_id.into(),
            timestamp: now_iso(),
            action: action.into(),
            direction,
            status,
            payload_hash: String::new(),
            signature: String::new(),
            metadata: Value::Null,
            estimated_time_saved_seconds: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_signature(mut self, payload_hash: impl Into<String>, signature: impl Into<String>) -> Self {
        self.payload_hash = payload_hash.into();
        self.signature = signature.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_time_saved(mut self, seconds: u64) -> Self {
        self.estimated_time_saved_seconds = seconds;
        self
    }

    pub fn content_hash(&self) -> String {
        content_hash(
            &self.id,
            &self.request_id,
            &self.timestamp,
            &self.action,
            self.direction,
            self.status,
            &self.payload_hash,
            &self.signature,
        )
    }
}

/// A chained, persisted audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub request_id: String,
    pub timestamp: String,
    pub action: String,
    pub direction: Direction,
    pub status: ActionStatus,
    pub payload_hash: String,
    pub signature: String,
    pub chain_hash: String,
    pub metadata: Value,
    pub estimated_time_saved_seconds: u64,
}

impl AuditEntry {
    fn chained(entry: NewAuditEntry, chain_hash: String) -> Self {
        Self {
            id: entry.id,
            request_id: entry.request_id,
            timestamp: entry.timestamp,
            action: entry.action,
            direction: entry.direction,
            status: entry.status,
            payload_hash: entry.payload_hash,
            signature: entry.signature,
            chain_hash,
            metadata: entry.metadata,
            estimated_time_saved_seconds: entry.estimated_time_saved_seconds,
        }
    }

    pub fn content_hash(&self) -> String {
        content_hash(
            &self.id,
            &self.request_id,
            &self.timestamp,
            &self.action,
            self.direction,
            self.status,
            &self.payload_hash,
            &self.signature,
        )
    }
}

#[allow(clippy::too_many_arguments)]
fn content_hash(
    id: &str,
    request_id: &str,
    timestamp: &str,
    action: &str,
    direction: Direction,
    status: ActionStatus,
    payload_hash: &str,
    signature: &str,
) -> String {
    sha256_hex(format!(
        "{id}|{request_id}|{timestamp}|{action}|{direction}|{status}|{payload_hash}|{signature}"
    ))
}

fn link(previous: &str, content_hash: &str) -> String {
    sha256_hex(format!("{previous}{content_hash}"))
}

/// Result of walking a chain from genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    /// Index of the first entry whose chain hash does not recompute.
    pub broken_at_index: Option<usize>,
    /// Entries that verified before the walk stopped.
    pub checked: usize,
}

/// Recompute every chain hash in order and stop at the first mismatch.
pub fn verify_chain(entries: &[AuditEntry]) -> ChainVerification {
    let mut previous = GENESIS_HASH;
    for (index, entry) in entries.iter().enumerate() {
        if link(previous, &entry.content_hash()) != entry.chain_hash {
            return ChainVerification {
                valid: false,
                broken_at_index: Some(index),
                checked: index,
            };
        }
        previous = entry.chain_hash.as_str();
    }
    ChainVerification {
        valid: true,
        broken_at_index: None,
        checked: entries.len(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    pub entry_count: u64,
    pub total_time_saved_seconds: u64,
    pub last_entry_at: Option<String>,
}

/// SQLite-backed append-only audit log.
///
/// One writer at a time: reading the tip, computing the next hash and inserting
/// happen under the connection mutex inside a single immediate transaction, so
/// several handles on the same file serialize on SQLite's write lock.
#[derive(Clone)]
pub struct AuditChain {
    db: Arc<Mutex<Connection>>,
}

fn audit_err(e: rusqlite::Error) -> WardError {
    WardError::AuditWriteFailure(e.to_string())
}

fn storage_err(e: rusqlite::Error) -> WardError {
    WardError::Storage(e.to_string())
}

const SELECT_ENTRY: &str = "SELECT id, request_id, timestamp, action, direction, status, payload_hash,
        signature, chain_hash, metadata, estimated_time_saved_seconds FROM audit_log";

type RawEntry = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

fn into_entry(raw: RawEntry) -> Result<AuditEntry> {
    let (
        id,
        request_id,
        timestamp,
        action,
        direction,
        status,
        payload_hash,
        signature,
        chain_hash,
        metadata,
        time_saved,
    ) = raw;
    Ok(AuditEntry {
        direction: direction.parse::<Direction>().map_err(WardError::Storage)?,
        status: status.parse::<ActionStatus>().map_err(WardError::Storage)?,
        metadata: serde_json::from_str(&metadata)?,
        estimated_time_saved_seconds: u64::try_from(time_saved).unwrap_or(0),
        id,
        request_id,
        timestamp,
        action,
        payload_hash,
        signature,
        chain_hash,
    })
}

impl AuditChain {
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening audit chain");
        let conn = Connection::open(path).map_err(storage_err)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA busy_timeout=5000;

            CREATE TABLE IF NOT EXISTS audit_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                request_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                action TEXT NOT NULL,
                direction TEXT NOT NULL,
                status TEXT NOT NULL,
                payload_hash TEXT NOT NULL,
                signature TEXT NOT NULL,
                chain_hash TEXT NOT NULL,
                metadata TEXT NOT NULL,
                estimated_time_saved_seconds INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_audit_request ON audit_log(request_id);

            CREATE TRIGGER IF NOT EXISTS audit_log_no_update
            BEFORE UPDATE ON audit_log
            BEGIN
                SELECT RAISE(ABORT, 'audit log is append-only');
            END;

            CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
            BEFORE DELETE ON audit_log
            BEGIN
                SELECT RAISE(ABORT, 'audit log is append-only');
            END;
            ",
        )
        .map_err(storage_err)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory chain (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Chain and persist one entry.
    ///
    /// Re-appending an id that is already stored with the same content returns
    /// the stored entry; the same id with different content is refused.
    pub fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry> {
        let metadata = serde_json::to_string(&entry.metadata)
            .map_err(|e| WardError::AuditWriteFailure(e.to_string()))?;
        let content = entry.content_hash();

        let mut db = self.db.lock();
        // IMMEDIATE takes the write lock before the tip is read, so another
        // connection to the same file waits on busy_timeout instead of failing.
        let tx = db
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(audit_err)?;

        let existing = tx
            .query_row(
                &format!("{SELECT_ENTRY} WHERE id = ?1"),
                params![entry.id],
                read_row,
            )
            .optional()
            .map_err(audit_err)?;
        if let Some(raw) = existing {
            let stored = into_entry(raw).map_err(|e| WardError::AuditWriteFailure(e.to_string()))?;
            if stored.content_hash() == content {
                debug!(entry_id = %stored.id, "audit entry already recorded");
                return Ok(stored);
            }
            error!(entry_id = %entry.id, "audit entry id reused with different content");
            return Err(WardError::AuditWriteFailure(format!(
                "entry {} already exists with different content",
                entry.id
            )));
        }

        let previous: String = tx
            .query_row(
                "SELECT chain_hash FROM audit_log ORDER BY seq DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(audit_err)?
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let chain_hash = link(&previous, &content);

        tx.execute(
            "INSERT INTO audit_log (id, request_id, timestamp, action, direction, status,
                payload_hash, signature, chain_hash, metadata, estimated_time_saved_seconds)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                entry.id,
                entry.request_id,
                entry.timestamp,
                entry.action,
                entry.direction.as_str(),
                entry.status.as_str(),
                entry.payload_hash,
                entry.signature,
                chain_hash,
                metadata,
                i64::try_from(entry.estimated_time_saved_seconds).unwrap_or(i64::MAX),
            ],
        )
        .map_err(audit_err)?;
        tx.commit().map_err(audit_err)?;

        debug!(
            entry_id = %entry.id,
            request_id = %entry.request_id,
            direction = %entry.direction,
            status = %entry.status,
            "audit entry appended"
        );
        Ok(AuditEntry::chained(entry, chain_hash))
    }

    /// Entries in chain order, after `since_id` when given.
    /// An unknown `since_id` yields no entries.
    pub fn get_entries(&self, since_id: Option<&str>) -> Result<Vec<AuditEntry>> {
        let db = self.db.lock();
        let after_seq: i64 = match since_id {
            None => 0,
            Some(id) => {
                let seq = db
                    .query_row(
                        "SELECT seq FROM audit_log WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(storage_err)?;
                match seq {
                    Some(seq) => seq,
                    None => return Ok(vec![]),
                }
            }
        };
        let mut stmt = db
            .prepare(&format!("{SELECT_ENTRY} WHERE seq > ?1 ORDER BY seq ASC"))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![after_seq], read_row)
            .map_err(storage_err)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(into_entry(row.map_err(storage_err)?)?);
        }
        Ok(entries)
    }

    /// Verify the whole stored chain.
    pub fn verify(&self) -> Result<ChainVerification> {
        let entries = self.get_entries(None)?;
        let result = verify_chain(&entries);
        if result.valid {
            info!(entries = result.checked, "audit chain verified");
        } else {
            warn!(broken_at = ?result.broken_at_index, "audit chain broken");
        }
        Ok(result)
    }

    /// Newest-first page of entries.
    pub fn query(&self, limit: usize, offset: usize) -> Result<Vec<AuditEntry>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(&format!("{SELECT_ENTRY} ORDER BY seq DESC LIMIT ?1 OFFSET ?2"))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], read_row)
            .map_err(storage_err)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(into_entry(row.map_err(storage_err)?)?);
        }
        Ok(entries)
    }

    /// All entries recorded for one request id, in chain order.
    pub fn for_request(&self, request_id: &str) -> Result<Vec<AuditEntry>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(&format!("{SELECT_ENTRY} WHERE request_id = ?1 ORDER BY seq ASC"))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![request_id], read_row)
            .map_err(storage_err)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(into_entry(row.map_err(storage_err)?)?);
        }
        Ok(entries)
    }

    pub fn stats(&self) -> Result<AuditStats> {
        let db = self.db.lock();
        let (count, saved): (i64, i64) = db
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(estimated_time_saved_seconds), 0) FROM audit_log",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(storage_err)?;
        let last_entry_at: Option<String> = db
            .query_row(
                "SELECT timestamp FROM audit_log ORDER BY seq DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        Ok(AuditStats {
            entry_count: u64::try_from(count).unwrap_or(0),
            total_time_saved_seconds: u64::try_from(saved).unwrap_or(0),
            last_entry_at,
        })
    }

    /// Chain hash of the newest entry, or the genesis hash for an empty log.
    pub fn tip(&self) -> Result<String> {
        let db = self.db.lock();
        let tip: Option<String> = db
            .query_row(
                "SELECT chain_hash FROM audit_log ORDER BY seq DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        Ok(tip.unwrap_or_else(|| GENESIS_HASH.to_string()))
    }

    #[cfg(test)]
    fn raw_execute(&self, sql: &str) -> rusqlite::Result<usize> {
        self.db.lock().execute(sql, [])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(request: &str, status: ActionStatus) -> NewAuditEntry {
        NewAuditEntry::new(request, "email.send", Direction::Request, status)
            .with_signature("ph", "sig")
    }

    #[test]
    fn test_first_entry_links_to_genesis() {
        let chain = AuditChain::open_in_memory().unwrap();
        let new = entry("r1", ActionStatus::Pending);
        let expected = link(GENESIS_HASH, &new.content_hash());
        let stored = chain.append(new).unwrap();
        assert_eq!(stored.chain_hash, expected);
        assert_eq!(chain.tip().unwrap(), expected);
    }

    #[test]
    fn test_update_and_delete_are_rejected() {
        let chain = AuditChain::open_in_memory().unwrap();
        chain.append(entry("r1", ActionStatus::Pending)).unwrap();
        let update = chain.raw_execute("UPDATE audit_log SET status = 'success'");
        assert!(update.unwrap_err().to_string().contains("append-only"));
        let delete = chain.raw_execute("DELETE FROM audit_log");
        assert!(delete.is_err());
        assert_eq!(chain.stats().unwrap().entry_count, 1);
    }

    #[test]
    fn test_empty_tip_is_genesis() {
        let chain = AuditChain::open_in_memory().unwrap();
        assert_eq!(chain.tip().unwrap(), GENESIS_HASH);
        assert_eq!(GENESIS_HASH.len(), 64);
    }
}
