use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::WardConfig;

/// Loads and optionally hot-reloads the Ward configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<WardConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > WARD_CONFIG env > ~/.ward/ward.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("WARD_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ward")
            .join("ward.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> ward_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            Self::parse(&raw, &config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            WardConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        // Log warnings, fail on errors
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(ward_core::WardError::Config(e));
            }
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> WardConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<WardConfig>> {
        Arc::clone(&self.config)
    }

    /// Path being watched.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Resolve a data file path from the config. Relative paths are anchored
    /// at the directory that holds the config file.
    pub fn data_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        self.config_path
            .parent()
            .unwrap_or(Path::new("."))
            .join(path)
    }

    fn parse(raw: &str, config_path: &Path) -> ward_core::Result<WardConfig> {
        toml::from_str::<WardConfig>(raw).map_err(|e| {
            ward_core::WardError::Config(format!(
                "failed to parse {}: {}",
                config_path.display(),
                e
            ))
        })
    }

    /// Apply env var overrides (WARD_LOG_LEVEL, WARD_IPC_SOCKET, etc.)
    fn apply_env_overrides(mut config: WardConfig) -> WardConfig {
        if let Ok(v) = std::env::var("WARD_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("WARD_IPC_SOCKET") {
            config.ipc.socket_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("WARD_FINANCIAL_THRESHOLD") {
            if let Ok(threshold) = v.parse::<f64>() {
                config.escalation.financial_threshold = threshold;
            }
        }
        if let Ok(v) = std::env::var("WARD_GLOBAL_RATE_LIMIT") {
            if let Ok(limit) = v.parse::<u32>() {
                config.rate_limits.global_limit = limit;
            }
        }
        config
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> ward_core::Result<()> {
        if !self.config_path.exists() {
            return Err(ward_core::WardError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let raw = std::fs::read_to_string(&self.config_path)?;
        let new_config = Self::apply_env_overrides(Self::parse(&raw, &self.config_path)?);
        new_config.validate().map_err(ward_core::WardError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    /// Start a background file watcher that reloads the config when the file
    /// changes and hands every successfully validated config to `on_reload`.
    /// Returns a handle to the watcher (must be kept alive for watching to continue).
    pub fn watch<F>(&self, on_reload: F) -> ward_core::Result<notify::RecommendedWatcher>
    where
        F: Fn(&WardConfig) + Send + 'static,
    {
        let config = Arc::clone(&self.config);
        let config_path = self.config_path.clone();

        info!(?config_path, "starting config file watcher");

        let path_for_event = config_path.clone();
        let mut watcher = notify::recommended_watcher(
            move |res: Result<NotifyEvent, notify::Error>| match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    let is_our_file = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == path_for_event.file_name());
                    if !is_our_file {
                        return;
                    }

                    info!("config file changed, reloading");
                    let raw = match std::fs::read_to_string(&path_for_event) {
                        Ok(raw) => raw,
                        Err(e) => {
                            warn!(error = %e, "failed to read config file during hot-reload");
                            return;
                        }
                    };
                    let new_config = match ConfigLoader::parse(&raw, &path_for_event) {
                        Ok(c) => ConfigLoader::apply_env_overrides(c),
                        Err(e) => {
                            warn!(error = %e, "config file has errors, keeping current config");
                            return;
                        }
                    };
                    if let Err(e) = new_config.validate() {
                        warn!(error = %e, "config failed validation, keeping current config");
                        return;
                    }
                    on_reload(&new_config);
                    *config.write() = new_config;
                    info!("configuration hot-reloaded successfully");
                }
                Err(e) => {
                    warn!(error = %e, "file watcher error");
                }
            },
        )
        .map_err(|e| ward_core::WardError::Config(format!("failed to create file watcher: {}", e)))?;

        // Watch the parent directory (some editors create temp files + rename)
        let watch_path = self.config_path.parent().unwrap_or(Path::new("."));
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                ward_core::WardError::Config(format!("failed to watch config directory: {}", e))
            })?;

        Ok(watcher)
    }
}
