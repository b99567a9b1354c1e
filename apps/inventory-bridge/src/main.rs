//! # Titan Inventory Bridge
//!
//! Runs the inventory sync engine next to the POS and exposes it over HTTP.
//!
//! ## Startup Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. Logging          tracing-subscriber, RUST_LOG overrides the default │
//! │  2. Config           inventory.toml + TITAN_INVENTORY_* environment     │
//! │  3. Database         SQLite (WAL), migrations                           │
//! │  4. Engine           HTTP client, coordinator, event forwarding         │
//! │  5. Housekeeping     settings init, purge, recover interrupted records  │
//! │  6. Timer            periodic product cycle + due retries               │
//! │  7. Serve            POST /rpc, GET /events, GET /health                │
//! │                                                                         │
//! │  Ctrl-C / SIGTERM: stop serving, disarm the timer, let an in-flight     │
//! │  cycle finish, close the pool.                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod server;

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use titan_db::{Database, DbConfig};
use titan_inventory::{BridgeConfig, Dispatcher, EventNotifier, HttpInventoryClient, SyncCoordinator};

use crate::server::AppState;

/// Buffered events per WebSocket subscriber before it starts lagging.
const EVENT_BUFFER: usize = 256;

/// Poll period while waiting for an in-flight cycle at shutdown.
const DRAIN_POLL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    info!(version = env!("CARGO_PKG_VERSION"), "Starting Titan inventory bridge");

    // Optional explicit config path as the only argument
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = BridgeConfig::load(config_path).context("failed to load bridge config")?;
    info!(
        inventory = %config.inventory.base_url,
        db = %config.database.path.display(),
        "Configuration loaded"
    );

    if let Some(parent) = config.database.path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db = Database::new(DbConfig::new(config.database.path.clone()))
        .await
        .context("failed to open database")?;

    let client = Arc::new(HttpInventoryClient::new(&config.inventory)?);
    let notifier = EventNotifier::new();
    let (events, _) = broadcast::channel(EVENT_BUFFER);
    let _forwarders = notifier.subscribe_all(events.clone());

    let engine = Arc::new(SyncCoordinator::new(&db, client, &config, notifier).await?);

    engine.initialize_settings().await?;
    match engine.cleanup_sync_data(None).await {
        Ok(report) => info!(
            removed = report.removed,
            recovered = report.recovered,
            "Startup housekeeping done"
        ),
        Err(e) => warn!(?e, "Startup housekeeping failed"),
    }

    engine.start();

    let app = server::router(AppState {
        dispatcher: Dispatcher::new(engine.clone()),
        events,
        db: db.clone(),
    });

    let bind_addr = config.server.bind_address();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "Bridge listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    engine.stop();
    while engine.is_syncing() {
        tokio::time::sleep(DRAIN_POLL).await;
    }
    db.close().await;

    info!("Bridge shutdown complete");
    Ok(())
}

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,titan=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(?e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
