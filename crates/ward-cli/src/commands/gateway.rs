use std::sync::Arc;
use tracing::{info, warn};

use ward_audit::{AuditChain, RequestSigner, SigningKey};
use ward_config::ConfigLoader;
use ward_core::Result;
use ward_gateway::{
    AdapterRegistry, Allowlist, DryRunAdapter, Gateway, RateLimitConfig, SlidingWindowLimiter,
};

use super::data_file;

pub(super) async fn cmd_gateway(
    config_loader: ConfigLoader,
    dry_run: bool,
    namespaces: Vec<String>,
) -> Result<()> {
    let config = config_loader.get();
    let key = SigningKey::load(&config.signing)?;
    let db_path = data_file(&config_loader, &config.storage.gateway_db_path)?;
    let socket_path = data_file(&config_loader, &config.ipc.socket_path)?;

    let allowlist = Allowlist::open(&db_path)?;
    let seeded = allowlist.seed(&config.allowlist.services)?;
    let limiter = SlidingWindowLimiter::new(RateLimitConfig::from(&config.rate_limits));
    let audit = AuditChain::open(&db_path)?;

    let mut registry = AdapterRegistry::new();
    if dry_run {
        for namespace in &namespaces {
            registry.register(Arc::new(DryRunAdapter::new(namespace.as_str())));
        }
    }

    println!("Ward gateway v{}", env!("CARGO_PKG_VERSION"));
    println!("   Socket: {}", socket_path.display());
    println!("   Database: {}", db_path.display());
    println!(
        "   Allowlist: {} active ({seeded} seeded from config)",
        allowlist.active_count()?
    );
    if dry_run {
        println!("   Adapters: dry-run for {}", namespaces.join(", "));
    } else {
        println!("   Adapters: none registered, every action will be rejected");
    }
    println!();

    // Rate limits follow config edits without a restart.
    let reload_limiter = limiter.clone();
    let _watcher = match config_loader.watch(move |cfg| {
        reload_limiter.update_config(RateLimitConfig::from(&cfg.rate_limits));
    }) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!(error = %e, "config hot-reload disabled");
            None
        }
    };

    let gateway = Arc::new(Gateway::new(
        RequestSigner::new(&key),
        limiter,
        allowlist,
        registry,
        audit,
    ));

    serve(gateway, socket_path, config.ipc.max_frame_bytes).await?;
    info!("gateway stopped");
    Ok(())
}

#[cfg(unix)]
async fn serve(gateway: Arc<Gateway>, socket_path: std::path::PathBuf, max_frame_bytes: usize) -> Result<()> {
    use ward_gateway::IpcServer;

    IpcServer::new(gateway, socket_path, max_frame_bytes)
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
}

#[cfg(not(unix))]
async fn serve(_gateway: Arc<Gateway>, _socket_path: std::path::PathBuf, _max_frame_bytes: usize) -> Result<()> {
    Err(ward_core::WardError::Ipc(
        "the gateway requires Unix domain sockets".into(),
    ))
}
