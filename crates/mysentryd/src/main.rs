//! mysentry monitor daemon
//!
//! Usage:
//!   # defaults: bind 0.0.0.0:6033, state under /var/lib/mysentry
//!   mysentryd
//!
//!   # custom inventory and graphite reporting
//!   mysentryd --inventory-url http://inventory:9001 \
//!     --app-name mysql-prod \
//!     --graphite-address graphite:2003

use clap::Parser;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mysentry_monitor::{discovery, Coordinator, HttpInventoryWatcher};
use mysentry_mysql::MysqlDriver;
use mysentryd::{api, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = cli.monitor_config();
    let driver = Arc::new(MysqlDriver::new());

    let (mut coordinator, handle, discovery_tx) = Coordinator::new(config.clone(), driver);
    if let Err(e) = coordinator.load().await {
        // an unreadable state dir means a cold start, not a dead process
        warn!(error = %e, "restoring persisted topology failed, starting empty");
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    tokio::spawn(coordinator.run(shutdown_tx.subscribe()));

    let watcher = Arc::new(HttpInventoryWatcher::new(
        &config.inventory_url,
        &config.app_name,
    ));
    discovery::spawn(
        watcher,
        config.proc_name.clone(),
        config.cooldown,
        discovery_tx,
        shutdown_tx.subscribe(),
    );

    // failing to bind the publish listener is the one fatal startup error
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(bind = %config.bind_address, "monitor API listening");

    let app = api::router(handle);
    let shutdown = shutdown_tx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown.send(());
        })
        .await?;

    info!("monitor stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
