use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use eyre::{Result, WrapErr};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use vcred_keeper::api::{self, AppState};
use vcred_keeper::bridges::attested::AttestedBridge;
use vcred_keeper::bridges::tunnel::TunnelBridge;
use vcred_keeper::bridges::BridgeProvider;
use vcred_keeper::config::Config;
use vcred_keeper::db::{lock, Store};
use vcred_keeper::gateway::{ChainGateway, EvmGateway};
use vcred_keeper::logsink::LogSinks;
use vcred_keeper::metrics;
use vcred_keeper::notify::Notifier;
use vcred_keeper::planner::Planner;
use vcred_keeper::reconciler::{self, recovery, ControlState, Reconciler};
use vcred_keeper::swaps::cow::CowProvider;
use vcred_keeper::swaps::kyber::KyberProvider;
use vcred_keeper::swaps::openocean::OpenOceanProvider;
use vcred_keeper::swaps::univ3::UniV3QuoterProvider;
use vcred_keeper::swaps::SwapProvider;

use evmkit_rs::client::EvmClientWithSigner;
use evmkit_rs::registry::TokenRegistry;

use alloy::primitives::address;

/// LayerZero endpoint ids for the chain pair.
const L1_EID: u32 = 30101;
const L2_EID: u32 = 30321;

/// Tunnel contracts on L1 for the configured rollup.
const PORTAL_ADDRESS: alloy::primitives::Address =
    address!("26db93f8b8b4f7016240af62f7730979d353f9a7");
const OUTPUT_ORACLE_ADDRESS: alloy::primitives::Address =
    address!("113cb99283af242da0a0c54347667edf531aa7d6");

/// Planner swap slippage, in basis points.
const PLANNER_SLIPPAGE_BPS: u64 = 50;

fn main() -> Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    init_logging();

    info!("Starting VCRED keeper");

    let config = Config::load()?;
    info!(
        dashboard_port = config.dashboard.port,
        reconcile_interval_ms = config.keeper.reconcile_interval_ms,
        "Configuration loaded"
    );

    std::fs::create_dir_all(&config.storage.data_dir)
        .wrap_err("Failed to create data directory")?;
    let sinks = Arc::new(LogSinks::open(&config.storage.logs_dir)?);

    // Persistent store and the single-instance lock
    let store = Store::open(&config.storage.db_path()).await?;
    let pid = std::process::id() as i64;
    let hostname = lock::local_hostname();
    store.acquire_lock(pid, &hostname, Utc::now()).await?;
    metrics::UP.set(1.0);

    // Chain clients and gateway
    let registry = Arc::new(TokenRegistry::mainnet());
    let l1 = Arc::new(EvmClientWithSigner::new(
        &config.chains.all_l1_rpc_urls().join(","),
        registry.l1_chain_id,
        &config.wallet.private_key,
    )?);
    let l2 = Arc::new(EvmClientWithSigner::new(
        &config.chains.all_l2_rpc_urls().join(","),
        registry.l2_chain_id,
        &config.wallet.private_key,
    )?);
    let gateway: Arc<dyn ChainGateway> = Arc::new(EvmGateway::new(
        l1.clone(),
        l2.clone(),
        Duration::from_millis(config.keeper.receipt_timeout_ms),
    ));
    info!(wallet = %gateway.wallet_address(), "Wallet gateway ready");

    // Swap providers: aggregators on both chains, reference quoter and
    // intent provider on L1
    let reference: Arc<dyn SwapProvider> = Arc::new(UniV3QuoterProvider::new(l1.clone()));
    let swap_providers: Vec<Arc<dyn SwapProvider>> = vec![
        Arc::new(OpenOceanProvider::new(registry.l1_chain_id, registry.l2_chain_id)?),
        Arc::new(KyberProvider::new(registry.l1_chain_id, registry.l2_chain_id)?),
        Arc::new(CowProvider::new(registry.l1_chain_id)?),
        reference.clone(),
    ];

    // Bridge providers
    let attested: Arc<dyn BridgeProvider> = Arc::new(AttestedBridge::new(
        gateway.clone(),
        l1.clone(),
        l2.clone(),
        registry.clone(),
        L1_EID,
        L2_EID,
    ));
    let tunnel: Arc<dyn BridgeProvider> = Arc::new(TunnelBridge::new(
        gateway.clone(),
        l1.clone(),
        l2.clone(),
        registry.clone(),
        PORTAL_ADDRESS,
        OUTPUT_ORACLE_ADDRESS,
    ));

    let planner = Planner::new(
        swap_providers.clone(),
        reference,
        registry.clone(),
        gateway.wallet_address(),
        PLANNER_SLIPPAGE_BPS,
    );

    let notifier = Arc::new(Notifier::new(config.dashboard.webhook_url.clone()));
    let control = Arc::new(RwLock::new(ControlState::default()));

    // Startup recovery before the first tick
    match recovery::run_recovery(
        &store,
        &gateway,
        &registry,
        config.keeper.bridge_arrival_tolerance_bps,
        &sinks,
        Utc::now(),
    )
    .await
    {
        Ok(0) => {}
        Ok(recovered) => info!(recovered, "Recovered failed cycles to ON_L1"),
        Err(e) => warn!(error = %e, "Recovery pass failed; continuing"),
    }

    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        gateway.clone(),
        swap_providers.clone(),
        attested.clone(),
        tunnel.clone(),
        planner,
        registry.clone(),
        notifier,
        sinks.clone(),
        control.clone(),
        config.trading.clone(),
        config.keeper.clone(),
    ));

    // Periodic provider liveness probes feed the metrics and the diag log
    {
        let swaps = swap_providers.clone();
        let bridges = vec![attested.clone(), tunnel.clone()];
        let gateway = gateway.clone();
        let sinks = sinks.clone();
        let (l1_id, l2_id) = (registry.l1_chain_id, registry.l2_chain_id);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                let snapshot =
                    vcred_keeper::health::snapshot(&swaps, &bridges, &gateway, l1_id, l2_id).await;
                for entry in &snapshot {
                    metrics::record_provider_health(&entry.name, entry.health.status);
                }
                sinks.diag(
                    "info",
                    "provider health",
                    serde_json::to_value(&snapshot).unwrap_or_default(),
                );
            }
        });
    }

    // Dashboard API
    let api_state = AppState {
        store: store.clone(),
        gateway: gateway.clone(),
        registry: registry.clone(),
        control: control.clone(),
        sinks: sinks.clone(),
        password: config.dashboard.password.clone(),
    };
    let api_port = config.dashboard.port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, api_port).await {
            error!(error = %e, "Dashboard API server error");
        }
    });

    // Shutdown wiring
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    // The reconciler loop runs until a signal arrives
    reconciler::run_loop(
        reconciler,
        config.keeper.reconcile_interval_ms,
        shutdown_rx,
    )
    .await;

    // Grace window for an in-flight tick, then release the lock
    tokio::time::sleep(Duration::from_secs(2)).await;
    if let Err(e) = store.release_lock(pid, &hostname).await {
        warn!(error = %e, "Failed to release keeper lock");
    }
    metrics::UP.set(0.0);

    info!("VCRED keeper stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vcred_keeper=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
