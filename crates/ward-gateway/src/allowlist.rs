use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use ward_config::ServiceConfig;
use ward_core::{Result, WardError};

/// A service the Gateway may contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub service_name: String,
    pub domain: String,
    /// `None` allows any port.
    pub port: Option<u16>,
    pub protocol: String,
    pub active: bool,
    pub added_at: String,
}

/// Input to [`Allowlist::add_service`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewService {
    pub service_name: String,
    pub domain: String,
    pub port: Option<u16>,
    pub protocol: String,
}

impl NewService {
    pub fn new(service_name: impl Into<String>, domain: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            service_name: service_name.into(),
            domain: domain.into(),
            port,
            protocol: "https".into(),
        }
    }
}

impl From<&ServiceConfig> for NewService {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            service_name: config.service_name.clone(),
            domain: config.domain.clone(),
            port: config.port,
            protocol: config.protocol.clone(),
        }
    }
}

/// Exact host names only: no wildcard glyphs, no schemes or paths.
fn normalize_domain(raw: &str) -> Result<String> {
    let domain = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return Err(WardError::InvalidAllowlistEntry("empty domain".into()));
    }
    if domain.contains(['*', '?']) {
        return Err(WardError::InvalidAllowlistEntry(format!(
            "wildcard domains are not allowed: {raw}"
        )));
    }
    if domain.chars().any(|c| c.is_whitespace() || c == '/' || c == ':') {
        return Err(WardError::InvalidAllowlistEntry(format!(
            "expected a bare host name, got {raw}"
        )));
    }
    Ok(domain)
}

fn storage_err(e: rusqlite::Error) -> WardError {
    WardError::Storage(e.to_string())
}

/// Persistent domain/port allowlist. Every check reads the table, so a
/// deactivation takes effect on the very next request.
#[derive(Clone)]
pub struct Allowlist {
    db: Arc<Mutex<Connection>>,
}

impl Allowlist {
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening allowlist");
        let conn = Connection::open(path).map_err(storage_err)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA busy_timeout=5000;
            CREATE TABLE IF NOT EXISTS allowlist (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                service_name TEXT NOT NULL,
                domain TEXT NOT NULL,
                port INTEGER,
                protocol TEXT NOT NULL DEFAULT 'https',
                active INTEGER NOT NULL DEFAULT 1,
                added_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_allowlist_domain_port
                ON allowlist(domain, IFNULL(port, -1));
            CREATE INDEX IF NOT EXISTS idx_allowlist_service ON allowlist(service_name);
            ",
        )
        .map_err(storage_err)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory allowlist (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Allow a domain/port pair. Re-adding an existing pair reactivates it.
    pub fn add_service(&self, service: NewService) -> Result<AllowlistEntry> {
        let domain = normalize_domain(&service.domain)?;
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock();
        let existing: Option<i64> = db
            .query_row(
                "SELECT id FROM allowlist WHERE domain = ?1 AND port IS ?2",
                params![domain, service.port],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        match existing {
            Some(id) => {
                db.execute(
                    "UPDATE allowlist SET service_name = ?1, protocol = ?2, active = 1 WHERE id = ?3",
                    params![service.service_name, service.protocol, id],
                )
                .map_err(storage_err)?;
            }
            None => {
                db.execute(
                    "INSERT INTO allowlist (service_name, domain, port, protocol, active, added_at)
                     VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                    params![service.service_name, domain, service.port, service.protocol, now],
                )
                .map_err(storage_err)?;
            }
        }
        let entry = db
            .query_row(
                "SELECT service_name, domain, port, protocol, active, added_at
                 FROM allowlist WHERE domain = ?1 AND port IS ?2",
                params![domain, service.port],
                read_entry,
            )
            .map_err(storage_err)?;
        info!(service = %entry.service_name, domain = %entry.domain, port = ?entry.port, "service allowed");
        Ok(entry)
    }

    /// Insert configured services that are not stored yet. Existing rows,
    /// including deactivated ones, are left alone. Returns how many were added.
    pub fn seed(&self, services: &[ServiceConfig]) -> Result<usize> {
        let mut added = 0;
        for service in services {
            let domain = normalize_domain(&service.domain)?;
            let known = {
                let db = self.db.lock();
                db.query_row(
                    "SELECT COUNT(*) FROM allowlist WHERE domain = ?1 AND port IS ?2",
                    params![domain, service.port],
                    |row| row.get::<_, i64>(0),
                )
                .map_err(storage_err)?
                    > 0
            };
            if !known {
                self.add_service(NewService::from(service))?;
                added += 1;
            }
        }
        Ok(added)
    }

    /// True only for an active entry with this exact domain whose port is
    /// unrestricted or equal to `port`. Storage failures refuse.
    pub fn is_allowed(&self, domain: &str, port: Option<u16>) -> bool {
        let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
        let db = self.db.lock();
        let found = db.query_row(
            "SELECT COUNT(*) FROM allowlist
             WHERE active = 1 AND domain = ?1 AND (port IS NULL OR port = ?2)",
            params![domain, port],
            |row| row.get::<_, i64>(0),
        );
        match found {
            Ok(n) => n > 0,
            Err(e) => {
                warn!(domain = %domain, error = %e, "allowlist lookup failed, refusing");
                false
            }
        }
    }

    pub fn deactivate(&self, service_name: &str) -> Result<usize> {
        self.set_active(service_name, false)
    }

    pub fn activate(&self, service_name: &str) -> Result<usize> {
        self.set_active(service_name, true)
    }

    fn set_active(&self, service_name: &str, active: bool) -> Result<usize> {
        let db = self.db.lock();
        let changed = db
            .execute(
                "UPDATE allowlist SET active = ?1 WHERE service_name = ?2",
                params![active, service_name],
            )
            .map_err(storage_err)?;
        if changed == 0 {
            return Err(WardError::NotFound(format!("service '{service_name}'")));
        }
        info!(service = service_name, active, "service availability updated");
        Ok(changed)
    }

    pub fn remove(&self, service_name: &str) -> Result<usize> {
        let db = self.db.lock();
        let removed = db
            .execute(
                "DELETE FROM allowlist WHERE service_name = ?1",
                params![service_name],
            )
            .map_err(storage_err)?;
        if removed == 0 {
            return Err(WardError::NotFound(format!("service '{service_name}'")));
        }
        info!(service = service_name, removed, "service removed from allowlist");
        Ok(removed)
    }

    pub fn list(&self) -> Result<Vec<AllowlistEntry>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT service_name, domain, port, protocol, active, added_at
                 FROM allowlist ORDER BY service_name, domain",
            )
            .map_err(storage_err)?;
        let rows = stmt.query_map([], read_entry).map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)
    }

    /// Number of active entries.
    pub fn active_count(&self) -> Result<usize> {
        let db = self.db.lock();
        let n: i64 = db
            .query_row("SELECT COUNT(*) FROM allowlist WHERE active = 1", [], |row| {
                row.get(0)
            })
            .map_err(storage_err)?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

fn read_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AllowlistEntry> {
    Ok(AllowlistEntry {
        service_name: row.get(0)?,
        domain: row.get(1)?,
        port: row.get(2)?,
        protocol: row.get(3)?,
        active: row.get(4)?,
        added_at: row.get(5)?,
    })
}
