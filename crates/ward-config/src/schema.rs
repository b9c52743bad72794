use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration, maps to `ward.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardConfig {
    pub autonomy: AutonomyConfig,
    pub escalation: EscalationConfig,
    pub rate_limits: RateLimitsConfig,
    pub allowlist: AllowlistConfig,
    pub audit: AuditConfig,
    pub storage: StorageConfig,
    pub ipc: IpcConfig,
    pub signing: SigningConfig,
    pub logging: LoggingConfig,
}

/// Tier names accepted in `[autonomy.domains]`.
pub const VALID_TIERS: [&str; 4] = ["observer", "guardian", "partner", "alter_ego"];

// ── Autonomy ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutonomyConfig {
    /// Initial tier per functional domain, e.g. `email = "partner"`.
    /// Applied at startup only for domains that have no stored tier yet.
    pub domains: HashMap<String, String>,
    /// Domains that are structurally disabled: every action is denied.
    pub disabled_domains: Vec<String>,
    /// Actions that never change external state.
    pub read_only_actions: Vec<String>,
    /// Idempotent actions a `guardian` domain may run without approval.
    pub guardian_preapproved: Vec<String>,
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            domains: HashMap::new(),
            disabled_domains: vec![],
            read_only_actions: vec![
                "email.fetch".into(),
                "email.search".into(),
                "calendar.fetch".into(),
                "files.read".into(),
                "files.search".into(),
                "files.list".into(),
            ],
            guardian_preapproved: vec![
                "email.fetch".into(),
                "calendar.fetch".into(),
                "files.read".into(),
                "files.search".into(),
            ],
        }
    }
}

// ── Escalation ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Payload `amount` above this value always escalates (caller's currency unit).
    pub financial_threshold: f64,
    /// LLM confidence below this value escalates (0.0 - 1.0).
    pub confidence_threshold: f64,
    /// Actions that cannot be undone and always need a human.
    pub irreversible_actions: Vec<String>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            financial_threshold: 500.0,
            confidence_threshold: 0.7,
            irreversible_actions: vec![
                "email.delete_permanent".into(),
                "files.delete_permanent".into(),
                "calendar.delete_series".into(),
                "service.disconnect".into(),
                "account.close".into(),
            ],
        }
    }
}

// ── Rate limits ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    /// Sliding window length in milliseconds.
    pub window_ms: u64,
    /// Maximum actions of any type per window.
    pub global_limit: u32,
    /// Limit for action types without an explicit entry.
    pub default_action_limit: u32,
    /// Per-action limits, e.g. `"email.send" = 20`.
    pub per_action: HashMap<String, u32>,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        let per_action = [
            ("email.send", 20),
            ("email.fetch", 60),
            ("calendar.create", 30),
            ("service.api_call", 100),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            window_ms: 3_600_000,
            global_limit: 500,
            default_action_limit: 60,
            per_action,
        }
    }
}

// ── Allowlist ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowlistConfig {
    /// Services seeded into the Gateway allowlist at startup.
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,
    /// Exact host name. Wildcards are rejected.
    pub domain: String,
    /// Port restriction (omit to allow any port).
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

// ── Audit ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Estimated seconds of human effort saved per successful action.
    pub time_saved_seconds: HashMap<String, u64>,
    /// Fallback for actions not listed above.
    pub default_time_saved_seconds: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        let time_saved_seconds = [
            ("email.send", 120),
            ("email.fetch", 30),
            ("email.archive", 15),
            ("calendar.create", 90),
            ("calendar.fetch", 20),
            ("files.read", 20),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            time_saved_seconds,
            default_time_saved_seconds: 0,
        }
    }
}

impl AuditConfig {
    pub fn time_saved_for(&self, action: &str) -> u64 {
        self.time_saved_seconds
            .get(action)
            .copied()
            .unwrap_or(self.default_time_saved_seconds)
    }
}

// ── Storage ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Core process database: tiers, approval patterns, Core audit chain.
    /// Relative paths resolve against the config file's directory.
    pub core_db_path: PathBuf,
    /// Gateway process database: allowlist, Gateway audit chain.
    pub gateway_db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            core_db_path: PathBuf::from("core.db"),
            gateway_db_path: PathBuf::from("gateway.db"),
        }
    }
}

// ── IPC ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Unix socket the Gateway listens on.
    pub socket_path: PathBuf,
    /// Maximum seconds Core waits for a Gateway response.
    pub request_timeout_secs: u64,
    /// Maximum frame size in bytes.
    pub max_frame_bytes: usize,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("gateway.sock"),
            request_timeout_secs: 30,
            max_frame_bytes: 4 * 1024 * 1024,
        }
    }
}

// ── Signing ────────────────────────────────────────────────────

/// Where the shared Core/Gateway signing key comes from.
/// Ward never generates or rotates the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// File holding the hex-encoded key.
    pub key_file: Option<PathBuf>,
    /// Environment variable holding the hex-encoded key (checked first).
    pub key_env: String,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            key_file: None,
            key_env: "WARD_SIGNING_KEY".into(),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

fn default_protocol() -> String {
    "https".into()
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "[{}] {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl WardConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Domain tiers ───
        for (domain, tier) in &self.autonomy.domains {
            if !VALID_TIERS.contains(&tier.as_str()) {
                warnings.push(ConfigWarning {
                    field: format!("autonomy.domains.{}", domain),
                    message: format!("unknown autonomy tier '{}'", tier),
                    severity: WarningSeverity::Error,
                    hint: Some(format!("Valid tiers: {}", VALID_TIERS.join(", "))),
                });
            } else if tier == "alter_ego" {
                warnings.push(ConfigWarning {
                    field: format!("autonomy.domains.{}", domain),
                    message: "alter_ego: routine actions run without approval".into(),
                    severity: WarningSeverity::Info,
                    hint: Some("High-severity escalation boundaries still require approval".into()),
                });
            }
        }

        // ── Escalation thresholds ───
        if !self.escalation.financial_threshold.is_finite() || self.escalation.financial_threshold < 0.0 {
            warnings.push(ConfigWarning {
                field: "escalation.financial_threshold".into(),
                message: format!("threshold {} is invalid", self.escalation.financial_threshold),
                severity: WarningSeverity::Error,
                hint: Some("Use a non-negative amount, e.g. 500".into()),
            });
        }
        if !(0.0..=1.0).contains(&self.escalation.confidence_threshold) {
            warnings.push(ConfigWarning {
                field: "escalation.confidence_threshold".into(),
                message: format!("threshold {} is out of range", self.escalation.confidence_threshold),
                severity: WarningSeverity::Error,
                hint: Some("Confidence threshold must be between 0.0 and 1.0".into()),
            });
        }

        // ── Rate limits ───
        if self.rate_limits.window_ms == 0 {
            warnings.push(ConfigWarning {
                field: "rate_limits.window_ms".into(),
                message: "window is 0, rate limiting is ineffective".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 3600000 (one hour)".into()),
            });
        }
        if self.rate_limits.global_limit == 0 {
            warnings.push(ConfigWarning {
                field: "rate_limits.global_limit".into(),
                message: "global limit is 0, every action will be rate limited".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set to e.g. 500".into()),
            });
        }
        for (action, limit) in &self.rate_limits.per_action {
            if *limit > self.rate_limits.global_limit {
                warnings.push(ConfigWarning {
                    field: format!("rate_limits.per_action.{}", action),
                    message: format!(
                        "limit {} exceeds the global limit {} and can never be reached",
                        limit, self.rate_limits.global_limit
                    ),
                    severity: WarningSeverity::Info,
                    hint: None,
                });
            }
        }

        // ── Allowlist ───
        for (i, svc) in self.allowlist.services.iter().enumerate() {
            if svc.domain.contains('*') || svc.domain.contains('?') {
                warnings.push(ConfigWarning {
                    field: format!("allowlist.services[{}].domain", i),
                    message: format!("wildcard domain '{}' is not permitted", svc.domain),
                    severity: WarningSeverity::Error,
                    hint: Some("List every subdomain explicitly, e.g. imap.gmail.com and smtp.gmail.com".into()),
                });
            } else if svc.domain.trim().is_empty() {
                warnings.push(ConfigWarning {
                    field: format!("allowlist.services[{}].domain", i),
                    message: "domain is empty".into(),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
        }

        // ── Signing key source ───
        if self.signing.key_file.is_none() && self.signing.key_env.is_empty() {
            warnings.push(ConfigWarning {
                field: "signing".into(),
                message: "no signing key source configured".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set signing.key_env or signing.key_file".into()),
            });
        }

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        // Check for hard errors
        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
