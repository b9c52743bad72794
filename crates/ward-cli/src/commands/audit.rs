use clap::Subcommand;
use console::style;

use ward_audit::AuditChain;
use ward_config::ConfigLoader;
use ward_core::{Result, WardError};

use super::{data_file, truncate};

#[derive(Subcommand)]
pub(crate) enum AuditAction {
    /// Show recent entries, newest first
    Log {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,

        /// Entries to skip
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Only entries for this request id
        #[arg(short, long)]
        request: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Read the Gateway's chain instead of Core's
        #[arg(long)]
        gateway: bool,
    },
    /// Recompute every chain hash and report the first break
    Verify {
        /// Read the Gateway's chain instead of Core's
        #[arg(long)]
        gateway: bool,
    },
    /// Entry count and estimated time saved
    Stats {
        /// Read the Gateway's chain instead of Core's
        #[arg(long)]
        gateway: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn open_chain(config_loader: &ConfigLoader, gateway: bool) -> Result<AuditChain> {
    let storage = config_loader.get().storage;
    let path = if gateway {
        storage.gateway_db_path
    } else {
        storage.core_db_path
    };
    AuditChain::open(&data_file(config_loader, &path)?)
}

pub(super) fn cmd_audit(config_loader: &ConfigLoader, action: AuditAction) -> Result<()> {
    match action {
        AuditAction::Log {
            limit,
            offset,
            request,
            json,
            gateway,
        } => {
            let chain = open_chain(config_loader, gateway)?;
            let entries = match request {
                Some(ref id) => chain.for_request(id)?,
                None => chain.query(limit, offset)?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }
            if entries.is_empty() {
                println!("No audit entries.");
                return Ok(());
            }
            for entry in &entries {
                println!(
                    "{}  {:<8} {:<12} {:<24} {}",
                    entry.timestamp,
                    entry.direction.as_str(),
                    entry.status.as_str(),
                    truncate(&entry.action, 24),
                    style(truncate(&entry.request_id, 8)).dim()
                );
            }
        }
        AuditAction::Verify { gateway } => {
            let chain = open_chain(config_loader, gateway)?;
            let result = chain.verify()?;
            if result.valid {
                println!(
                    "{} {} entries, chain intact",
                    style("✓").green().bold(),
                    result.checked
                );
            } else {
                let index = result
                    .broken_at_index
                    .map(|i| i.to_string())
                    .unwrap_or_else(|| "?".into());
                println!("{} chain broken at index {index}", style("✗").red().bold());
                return Err(WardError::Storage(format!(
                    "audit chain failed verification at index {index}"
                )));
            }
        }
        AuditAction::Stats { gateway, json } => {
            let chain = open_chain(config_loader, gateway)?;
            let stats = chain.stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }
            let minutes = stats.total_time_saved_seconds / 60;
            println!("Entries: {}", stats.entry_count);
            println!(
                "Estimated time saved: {}h {}m",
                minutes / 60,
                minutes % 60
            );
            if let Some(last) = stats.last_entry_at {
                println!("Last entry: {last}");
            }
        }
    }
    Ok(())
}
