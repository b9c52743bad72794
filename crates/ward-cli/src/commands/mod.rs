use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::path::{Path, PathBuf};

use ward_config::{ConfigLoader, WardConfig};
use ward_core::{Result, WardError};

mod allowlist;
mod audit;
mod gateway;
mod submit;
mod tier;

pub(crate) use allowlist::AllowlistAction;
pub(crate) use audit::AuditAction;
pub(crate) use tier::TierAction;

/// Ward: action authorization and audit pipeline
#[derive(Parser)]
#[command(name = "ward", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to ward.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Gateway: verify, rate limit, allowlist, execute, audit
    Gateway {
        /// Register dry-run adapters that resolve `host`/`port` from the payload
        /// and never touch the network
        #[arg(long)]
        dry_run: bool,

        /// Namespaces served by the dry-run adapters
        #[arg(long, value_delimiter = ',', default_value = "email,calendar,files,service")]
        namespaces: Vec<String>,
    },
    /// Submit one action through the Core decision flow
    Submit {
        /// Namespaced action, e.g. email.send
        action: String,

        /// Functional domain the action belongs to
        #[arg(short, long)]
        domain: String,

        /// Action payload as JSON
        #[arg(short, long, default_value = "{}")]
        payload: String,

        /// Model-reported confidence (0.0 - 1.0)
        #[arg(long)]
        confidence: Option<f64>,

        /// Approve the action if policy queues it for a human
        #[arg(long)]
        approve: bool,
    },
    /// Inspect and change per-domain autonomy tiers
    Tier {
        #[command(subcommand)]
        action: TierAction,
    },
    /// Manage the Gateway's domain allowlist
    Allowlist {
        #[command(subcommand)]
        action: AllowlistAction,
    },
    /// Browse and verify the audit chain
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // Resolve log level: --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level
                .as_deref()
                .unwrap_or(config.logging.level.as_str())
        };
        init_tracing(log_level, &config.logging.format);

        match self.command {
            Commands::Gateway {
                dry_run,
                namespaces,
            } => gateway::cmd_gateway(config_loader, dry_run, namespaces).await,
            Commands::Submit {
                action,
                domain,
                payload,
                confidence,
                approve,
            } => {
                submit::cmd_submit(
                    &config_loader,
                    submit::SubmitArgs {
                        action,
                        domain,
                        payload,
                        confidence,
                        approve,
                    },
                )
                .await
            }
            Commands::Tier { action } => tier::cmd_tier(&config_loader, action),
            Commands::Allowlist { action } => allowlist::cmd_allowlist(&config_loader, action),
            Commands::Audit { action } => audit::cmd_audit(&config_loader, action),
            Commands::Config { json } => Self::cmd_config(&config, json),
            Commands::Completions { shell } => Self::cmd_completions(shell),
        }
    }

    fn cmd_config(config: &WardConfig, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(config).map_err(|e| WardError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_completions(shell: Shell) -> Result<()> {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "ward", &mut std::io::stdout());
        Ok(())
    }
}

fn init_tracing(log_level: &str, format: &str) {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level))
    };
    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_target(false)
            .init(),
    }
}

/// Absolute path of a data file named in config, with its directory created.
pub(crate) fn data_file(loader: &ConfigLoader, path: &Path) -> Result<PathBuf> {
    let resolved = loader.data_path(path);
    if let Some(parent) = resolved.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(resolved)
}

/// Truncate a string to `max` characters, appending "..." if truncated.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}...")
    }
}
