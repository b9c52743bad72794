use clap::Subcommand;
use console::style;

use ward_config::ConfigLoader;
use ward_core::Result;
use ward_gateway::{Allowlist, NewService};

use super::data_file;

#[derive(Subcommand)]
pub(crate) enum AllowlistAction {
    /// List every entry, active or not
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Allow a service's exact host (re-adding reactivates it)
    Add {
        /// Service name, e.g. gmail-imap
        service: String,
        /// Exact host name; wildcards are rejected
        domain: String,
        /// Restrict to this port
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, default_value = "https")]
        protocol: String,
    },
    /// Delete a service's entries
    Remove { service: String },
    /// Re-enable a deactivated service
    Activate { service: String },
    /// Revoke a service without deleting it
    Deactivate { service: String },
}

pub(super) fn cmd_allowlist(config_loader: &ConfigLoader, action: AllowlistAction) -> Result<()> {
    let config = config_loader.get();
    let allowlist = Allowlist::open(&data_file(config_loader, &config.storage.gateway_db_path)?)?;
    allowlist.seed(&config.allowlist.services)?;

    match action {
        AllowlistAction::List { json } => {
            let entries = allowlist.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }
            if entries.is_empty() {
                println!("Allowlist is empty. The gateway will refuse every outbound call.");
            }
            for entry in entries {
                let port = entry
                    .port
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "*".into());
                let state = if entry.active {
                    style("active").green()
                } else {
                    style("inactive").dim()
                };
                println!(
                    "{:<20} {}:{:<6} {:<8} {}",
                    entry.service_name, entry.domain, port, entry.protocol, state
                );
            }
        }
        AllowlistAction::Add {
            service,
            domain,
            port,
            protocol,
        } => {
            let mut new = NewService::new(service, domain, port);
            new.protocol = protocol;
            let entry = allowlist.add_service(new)?;
            println!(
                "✅ {} allowed: {}{}",
                entry.service_name,
                entry.domain,
                entry.port.map(|p| format!(":{p}")).unwrap_or_default()
            );
        }
        AllowlistAction::Remove { service } => {
            let removed = allowlist.remove(&service)?;
            println!("🗑  {service} removed ({removed} entries)");
        }
        AllowlistAction::Activate { service } => {
            allowlist.activate(&service)?;
            println!("✅ {service} active");
        }
        AllowlistAction::Deactivate { service } => {
            allowlist.deactivate(&service)?;
            println!("⛔ {service} deactivated");
        }
    }
    Ok(())
}
