use clap::Subcommand;

use ward_autonomy::{AutonomyTier, TierStore};
use ward_config::ConfigLoader;
use ward_core::{Result, WardError};

use super::data_file;

#[derive(Subcommand)]
pub(crate) enum TierAction {
    /// Show a domain's effective tier
    Get {
        /// Functional domain, e.g. email
        domain: String,
    },
    /// Set a domain's tier (observer, guardian, partner, alter_ego)
    Set { domain: String, tier: String },
    /// List every stored domain
    List,
    /// Deny every action in a domain
    Disable { domain: String },
    /// Lift a domain's disabled flag (stays lifted even if ward.toml lists it)
    Enable { domain: String },
}

pub(super) fn cmd_tier(config_loader: &ConfigLoader, action: TierAction) -> Result<()> {
    let config = config_loader.get();
    let store = TierStore::open(&data_file(config_loader, &config.storage.core_db_path)?)?;
    store.apply_config(&config.autonomy)?;

    match action {
        TierAction::Get { domain } => {
            let snapshot = store.snapshot()?;
            let tier = store.get_domain_tier(&domain);
            let configured = store.stored_tier(&domain)?.is_some();
            println!(
                "{domain}: {tier}{}{}",
                if configured { "" } else { " (default)" },
                if snapshot.is_disabled(&domain) { " [disabled]" } else { "" }
            );
            println!("   {}", tier.description());
        }
        TierAction::Set { domain, tier } => {
            let tier: AutonomyTier = tier.parse().map_err(|reason| WardError::ConfigValidation {
                field: format!("tier for {domain}"),
                reason,
            })?;
            store.set_domain_tier(&domain, tier)?;
            println!("✅ {domain} is now {tier}");
        }
        TierAction::List => {
            let tiers = store.list()?;
            let snapshot = store.snapshot()?;
            if tiers.is_empty() {
                println!(
                    "No domains configured. Unlisted domains run as {}.",
                    AutonomyTier::CONSERVATIVE
                );
            }
            for (domain, tier) in tiers {
                let flag = if snapshot.is_disabled(&domain) { "  [disabled]" } else { "" };
                println!("{domain:<16} {tier}{flag}");
            }
        }
        TierAction::Disable { domain } => {
            store.disable_domain(&domain)?;
            println!("⛔ {domain} disabled, all actions will be denied");
        }
        TierAction::Enable { domain } => {
            store.enable_domain(&domain)?;
            println!("✅ {domain} enabled");
        }
    }
    Ok(())
}
