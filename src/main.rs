//! YieldGuard: Stellar yield aggregation service
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the adapters, snapshot store and background sync scheduler,
//! then serves the HTTP API until Ctrl+C.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use yieldguard::adapters::defillama::DefiLlamaAdapter;
use yieldguard::adapters::upstream::{
    HttpLogoResolver, HttpPoolSource, LogoResolver, PoolSource, StaticLogoResolver,
};
use yieldguard::api::{self, ApiState};
use yieldguard::config::AppConfig;
use yieldguard::engine::{AdapterSyncTarget, OpportunityStore, SyncScheduler};

const BANNER: &str = r#"
 __   ___     _     _  ____                     _
 \ \ / (_)___| | __| |/ ___|_   _  __ _ _ __ __| |
  \ V /| / _ \ |/ _` | |  _| | | |/ _` | '__/ _` |
   | | | |  __/ | (_| | |_| | |_| | (_| | | | (_| |
   |_| |_|\___|_|\__,_|\____|\__,_|\__,_|_|  \__,_|

  Stellar yield aggregation, v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = AppConfig::path_from_env();
    let cfg = AppConfig::load(&config_path)?;
    cfg.validate().context("Invalid configuration")?;

    init_logging();

    println!("{BANNER}");
    info!(
        config = %config_path,
        upstream = %cfg.upstream.base_url,
        protocols = ?cfg.sync.protocols,
        interval_secs = cfg.sync.interval_secs,
        "YieldGuard starting up"
    );

    // -- Upstream seams --------------------------------------------------

    let source: Arc<dyn PoolSource> = Arc::new(HttpPoolSource::new(
        &cfg.upstream.base_url,
        &cfg.upstream.pools_path,
        cfg.api_key(),
    )?);

    let logos: Arc<dyn LogoResolver> = match cfg.upstream.logo_base_url.as_deref() {
        Some(url) if !url.trim().is_empty() => Arc::new(HttpLogoResolver::new(url)?),
        _ => Arc::new(StaticLogoResolver),
    };

    // -- Adapters, store, scheduler --------------------------------------

    let adapter = Arc::new(DefiLlamaAdapter::new(cfg.adapter_settings(), source, logos));

    let store = Arc::new(OpportunityStore::new());
    let target = cfg
        .sync
        .protocols
        .iter()
        .fold(AdapterSyncTarget::new(Arc::clone(&store)), |target, protocol| {
            let per_protocol = adapter.for_protocols(vec![protocol.clone()]);
            target.with_adapter(protocol, Arc::new(per_protocol))
        });

    let scheduler = SyncScheduler::new(cfg.sync_config(), Arc::new(target));
    scheduler.start();

    // -- HTTP API --------------------------------------------------------

    let state = Arc::new(ApiState {
        adapter,
        store,
        scheduler: scheduler.clone(),
    });

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .with_context(|| format!("Invalid server address {}:{}", cfg.server.host, cfg.server.port))?;

    info!("Serving. Press Ctrl+C to stop.");
    api::serve(state, addr, shutdown_signal()).await?;

    scheduler.stop();
    let stats = scheduler.stats().await;
    info!(%stats, "YieldGuard shut down cleanly.");

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received.");
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("yieldguard=info"));

    let json_logging = std::env::var("YIELDGUARD_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
