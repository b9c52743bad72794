use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use ward_config::AutonomyConfig;
use ward_core::{Result, WardError};

use crate::tier::AutonomyTier;

/// Persisted per-domain autonomy configuration.
///
/// Tiers change only through [`TierStore::set_domain_tier`]; nothing in the
/// pipeline infers or escalates a tier on its own.
#[derive(Clone)]
pub struct TierStore {
    db: Arc<Mutex<Connection>>,
}

/// An immutable view of the tier table, taken once per decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierSnapshot {
    tiers: HashMap<String, AutonomyTier>,
    disabled: HashSet<String>,
}

impl TierSnapshot {
    pub fn new(tiers: HashMap<String, AutonomyTier>, disabled: HashSet<String>) -> Self {
        Self { tiers, disabled }
    }

    /// The configured tier, or the conservative default for unknown domains.
    pub fn tier_for(&self, domain: &str) -> AutonomyTier {
        self.tiers
            .get(&normalize(domain))
            .copied()
            .unwrap_or(AutonomyTier::CONSERVATIVE)
    }

    pub fn is_disabled(&self, domain: &str) -> bool {
        self.disabled.contains(&normalize(domain))
    }

    pub fn with_tier(mut self, domain: &str, tier: AutonomyTier) -> Self {
        self.tiers.insert(normalize(domain), tier);
        self
    }

    pub fn with_disabled(mut self, domain: &str) -> Self {
        self.disabled.insert(normalize(domain));
        self
    }
}

fn normalize(domain: &str) -> String {
    domain.trim().to_ascii_lowercase()
}

fn storage_err(e: rusqlite::Error) -> WardError {
    WardError::Storage(e.to_string())
}

impl TierStore {
    /// Open or create the tier table in the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening autonomy tier store");
        let conn = Connection::open(path).map_err(storage_err)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA busy_timeout=5000;
            CREATE TABLE IF NOT EXISTS autonomy_domains (
                domain TEXT PRIMARY KEY,
                tier TEXT,
                disabled INTEGER NOT NULL DEFAULT 0,
                disable_seeded INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
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

    /// Resolve a domain's tier. Never fails: an unreadable store or an
    /// unconfigured domain resolves to the conservative tier.
    pub fn get_domain_tier(&self, domain: &str) -> AutonomyTier {
        match self.stored_tier(domain) {
            Ok(Some(tier)) => tier,
            Ok(None) => AutonomyTier::CONSERVATIVE,
            Err(e) => {
                warn!(domain, error = %e, "tier lookup failed, using conservative tier");
                AutonomyTier::CONSERVATIVE
            }
        }
    }

    /// The explicitly stored tier for a domain, if any.
    pub fn stored_tier(&self, domain: &str) -> Result<Option<AutonomyTier>> {
        let db = self.db.lock();
        let raw: Option<Option<String>> = db
            .query_row(
                "SELECT tier FROM autonomy_domains WHERE domain = ?1",
                params![normalize(domain)],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        match raw.flatten() {
            Some(s) => s.parse::<AutonomyTier>().map(Some).map_err(WardError::Storage),
            None => Ok(None),
        }
    }

    pub fn set_domain_tier(&self, domain: &str, tier: AutonomyTier) -> Result<()> {
        let domain = normalize(domain);
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock();
        db.execute(
            "INSERT INTO autonomy_domains (domain, tier, disabled, updated_at) VALUES (?1, ?2, 0, ?3)
             ON CONFLICT(domain) DO UPDATE SET tier = excluded.tier, updated_at = excluded.updated_at",
            params![domain, tier.as_str(), now],
        )
        .map_err(storage_err)?;
        info!(domain = %domain, tier = %tier, "autonomy tier updated");
        Ok(())
    }

    /// Structurally disable a domain. Every action in it is denied.
    pub fn disable_domain(&self, domain: &str) -> Result<()> {
        self.set_disabled(domain, true)
    }

    pub fn enable_domain(&self, domain: &str) -> Result<()> {
        self.set_disabled(domain, false)
    }

    fn set_disabled(&self, domain: &str, disabled: bool) -> Result<()> {
        let domain = normalize(domain);
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock();
        db.execute(
            "INSERT INTO autonomy_domains (domain, tier, disabled, updated_at) VALUES (?1, NULL, ?2, ?3)
             ON CONFLICT(domain) DO UPDATE SET disabled = excluded.disabled, updated_at = excluded.updated_at",
            params![domain, disabled, now],
        )
        .map_err(storage_err)?;
        info!(domain = %domain, disabled, "domain availability updated");
        Ok(())
    }

    /// All explicitly configured tiers, sorted by domain.
    pub fn list(&self) -> Result<BTreeMap<String, AutonomyTier>> {
        Ok(self.snapshot()?.tiers.into_iter().collect())
    }

    /// Read the whole table into an immutable snapshot.
    pub fn snapshot(&self) -> Result<TierSnapshot> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare("SELECT domain, tier, disabled FROM autonomy_domains")
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            })
            .map_err(storage_err)?;

        let mut snapshot = TierSnapshot::default();
        for row in rows {
            let (domain, tier, disabled) = row.map_err(storage_err)?;
            if let Some(raw) = tier {
                match raw.parse::<AutonomyTier>() {
                    Ok(t) => {
                        snapshot.tiers.insert(domain.clone(), t);
                    }
                    // Leave the domain unconfigured so it resolves conservatively.
                    Err(e) => warn!(domain = %domain, error = %e, "ignoring unreadable stored tier"),
                }
            }
            if disabled {
                snapshot.disabled.insert(domain);
            }
        }
        Ok(snapshot)
    }

    /// Seed tiers from config for domains that have no stored tier yet, and
    /// disable each configured disabled domain once. A later `enable_domain`
    /// is not undone by the next call. Returns how many tiers were seeded.
    pub fn apply_config(&self, config: &AutonomyConfig) -> Result<usize> {
        let mut seeded = 0;
        for (domain, raw) in &config.domains {
            let tier = raw.parse::<AutonomyTier>().map_err(|reason| {
                WardError::ConfigValidation {
                    field: format!("autonomy.domains.{domain}"),
                    reason,
                }
            })?;
            if self.stored_tier(domain)?.is_none() {
                self.set_domain_tier(domain, tier)?;
                seeded += 1;
            }
        }
        for domain in &config.disabled_domains {
            self.seed_disabled(domain)?;
        }
        Ok(seeded)
    }

    fn seed_disabled(&self, domain: &str) -> Result<()> {
        let domain = normalize(domain);
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock();
        let changed = db
            .execute(
                "INSERT INTO autonomy_domains (domain, tier, disabled, disable_seeded, updated_at)
                 VALUES (?1, NULL, 1, 1, ?2)
                 ON CONFLICT(domain) DO UPDATE SET disabled = 1, disable_seeded = 1, updated_at = excluded.updated_at
                 WHERE autonomy_domains.disable_seeded = 0",
                params![domain, now],
            )
            .map_err(storage_err)?;
        if changed > 0 {
            info!(domain = %domain, "domain disabled by config");
        }
        Ok(())
    }
}
