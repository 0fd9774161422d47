//! Launcher service entry point
//!
//! Wires the durable stores, key store and coordinator together, starts the
//! staleness monitor (and the dispatcher when enabled), then serves the HTTP
//! API until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use launcher::config::Config;
use launcher::coordinator::LaunchCoordinator;
use launcher::dispatch::{DispatchSettings, Dispatcher};
use launcher::endpoints;
use launcher::eth_rpc::EthJsonRpc;
use launcher::gas_price::{FixedGasPriceOracle, GasPriceOracle};
use launcher::key_store::{KeyStore, LocalKeyStore};
use launcher::launch_log_store::SledLaunchLogStore;
use launcher::metrics;
use launcher::monitor::StalenessMonitor;
use launcher::nonce_allocator::{NonceAllocator, SledNonceAllocator};
use launcher::types::parse_amount;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "launcher.toml", env = "LAUNCHER_CONFIG")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.log_json)?;

    info!("Starting launcher v{}", env!("CARGO_PKG_VERSION"));
    info!("Loading configuration from: {}", args.config);
    let config = load_config(&args.config)?;
    config.validate().context("invalid configuration")?;

    let db = sled::open(&config.storage.path)
        .with_context(|| format!("Failed to open store at {}", config.storage.path))?;

    let keys = LocalKeyStore::from_key_list(config.keys.private_keys.as_deref().unwrap_or(""));
    if keys.is_empty() {
        warn!("No signing keys loaded; every dispatch will fail with NoSuchKey");
    }
    metrics::metrics().managed_keys.set(keys.len() as i64);
    info!(addresses = ?keys.addresses(), "Key store ready");
    let keys: Arc<dyn KeyStore> = Arc::new(keys);

    let nonces = SledNonceAllocator::open(&db, &config.network.name)?;
    if let Some(start) = config.nonce.initial_value {
        let effective = nonces.initialize(start).await?;
        info!(network = %config.network.name, nonce = effective, "Nonce counter ready");
    }
    let nonces: Arc<dyn NonceAllocator> = Arc::new(nonces);

    let store = Arc::new(SledLaunchLogStore::open(&db)?);

    let rpc = match &config.network.rpc_url {
        Some(url) => Some(Arc::new(EthJsonRpc::new(
            url,
            Duration::from_millis(config.network.rpc_timeout_ms),
        )?)),
        None => None,
    };
    let oracle: Arc<dyn GasPriceOracle> = match (&config.gas.fixed_gas_price, &rpc) {
        (Some(price), _) => Arc::new(FixedGasPriceOracle::new(parse_amount(
            "gas.fixed_gas_price",
            price,
        )?)),
        (None, Some(rpc)) => Arc::clone(rpc) as Arc<dyn GasPriceOracle>,
        (None, None) => anyhow::bail!("no gas price source configured"),
    };

    let coordinator = Arc::new(LaunchCoordinator::new(
        store.clone(),
        nonces,
        keys,
        oracle,
        config.request_timeout(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let monitor = StalenessMonitor::new(
        store,
        Arc::new(metrics::MetricsHandle),
        config.monitor_interval(),
        config.stale_after(),
    );
    tasks.push(tokio::spawn(monitor.run(shutdown_rx.clone())));

    if config.dispatch.enabled {
        if let Some(rpc) = &rpc {
            let settings = DispatchSettings {
                chain_id: config.network.chain_id,
                gas_limit: config.dispatch.gas_limit,
                contract_call_gas_limit: config.dispatch.contract_call_gas_limit,
                interval: Duration::from_secs(config.dispatch.interval_secs),
            };
            let dispatcher = Dispatcher::new(coordinator.clone(), rpc.clone(), settings);
            tasks.push(tokio::spawn(dispatcher.run(shutdown_rx.clone())));
        }
    } else {
        info!("In-process dispatch disabled; CREATED logs await an external dispatcher");
    }

    let router = endpoints::build_router(coordinator, config.monitoring.enable_metrics);
    let mut server_shutdown = shutdown_rx.clone();
    let mut server = tokio::spawn(endpoints::serve(config.listen_addr()?, router, async move {
        let _ = server_shutdown.wait_for(|stop| *stop).await.map(|_| ());
    }));

    let server_finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            false
        }
        res = &mut server => {
            log_server_exit(res);
            true
        }
    };

    let _ = shutdown_tx.send(true);
    if !server_finished {
        log_server_exit(server.await);
    }
    for task in tasks {
        if let Err(e) = task.await {
            error!("Background task failed: {}", e);
        }
    }

    db.flush_async().await.context("Failed to flush store")?;
    info!("Shut down cleanly");
    Ok(())
}

fn log_server_exit(res: Result<Result<()>, tokio::task::JoinError>) {
    match res {
        Ok(Ok(())) => info!("HTTP server stopped"),
        Ok(Err(e)) => error!("HTTP server error: {}", e),
        Err(e) => error!("HTTP server task failed: {}", e),
    }
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let env_filter = if verbose {
        "launcher=debug,info"
    } else {
        "launcher=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| env_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }

    Ok(())
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file_with_env(path)
            .with_context(|| format!("Failed to load config from {}", path))
    } else {
        warn!("Config file '{}' not found, using defaults", path);
        let mut config = Config::default();
        dotenvy::dotenv().ok();
        config.apply_env();
        Ok(config)
    }
}
