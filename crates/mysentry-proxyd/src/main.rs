//! mysentry proxy daemon
//!
//! Usage:
//!   # serve slave traffic on the default mysql port
//!   mysentry-proxyd --monitor-url http://monitor:6033
//!
//!   # serve master (write) traffic on a dedicated port
//!   mysentry-proxyd -p 3307 -m master --monitor-url http://monitor:6033

use clap::Parser;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mysentry_core::{ProxyConfig, ServiceMode};
use mysentry_proxy::{feed, proxy, TargetPool};

/// mysentry proxy - routes mysql clients to the current role endpoints
#[derive(Parser, Debug)]
#[command(name = "mysentry-proxyd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Service port for mysql clients
    #[arg(short = 'p', long, default_value_t = 3306, env = "MYSENTRY_PROXY_PORT")]
    port: u16,

    /// Service mode (master|slave)
    #[arg(short = 'm', long, default_value = "slave", env = "MYSENTRY_PROXY_MODE")]
    mode: ServiceMode,

    /// Base URL of the monitor's snapshot feed
    #[arg(long, default_value = "http://monitor:6033", env = "MYSENTRY_MONITOR_URL")]
    monitor_url: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "RUST_LOG")]
    log_level: String,
}

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

    let config = ProxyConfig {
        service_port: cli.port,
        service_mode: cli.mode,
        monitor_url: cli.monitor_url,
        ..ProxyConfig::default()
    };
    info!(port = config.service_port, mode = %config.service_mode, "starting proxy");

    let pool = Arc::new(TargetPool::new());
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    tokio::spawn(feed::run_feed(
        config.clone(),
        pool.clone(),
        shutdown_tx.subscribe(),
    ));

    let listener = tokio::spawn(proxy::run_listener(
        pool,
        config.service_port,
        config.cooldown,
        shutdown_tx.subscribe(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());
    listener.await??;
    Ok(())
}
