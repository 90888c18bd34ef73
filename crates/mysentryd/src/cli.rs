//! CLI argument parsing for the monitor daemon

use clap::Parser;
use std::path::PathBuf;

use mysentry_core::MonitorConfig;

/// mysentry monitor - replicated-MySQL topology coordinator
///
/// Tracks which database instance holds which replication role, serializes
/// all role-changing operations, and publishes routing snapshots for the
/// traffic proxies.
#[derive(Parser, Debug)]
#[command(name = "mysentryd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// HTTP bind address (query/action API and snapshot feed)
    #[arg(long, default_value = "0.0.0.0:6033", env = "MYSENTRY_BIND")]
    pub bind: String,

    /// Directory for the persisted role files
    #[arg(long, default_value = "/var/lib/mysentry", env = "MYSENTRY_STATE_DIR")]
    pub state_dir: PathBuf,

    /// key=value file with the dba/repl passwords
    #[arg(long, default_value = "conf/secret.conf", env = "MYSENTRY_SECRET_FILE")]
    pub secret_file: PathBuf,

    /// Base URL of the process-inventory service
    #[arg(long, default_value = "http://inventory:9001", env = "MYSENTRY_INVENTORY_URL")]
    pub inventory_url: String,

    /// Application name the inventory watch is keyed by
    #[arg(long, default_value = "mysql", env = "MYSENTRY_APP_NAME")]
    pub app_name: String,

    /// Cluster domain (leading metrics key segment)
    #[arg(long, default_value = "local", env = "MYSENTRY_DOMAIN")]
    pub domain: String,

    /// Process name identifying database instances in the inventory
    #[arg(long, default_value = "mysql-server", env = "MYSENTRY_PROC_NAME")]
    pub proc_name: String,

    /// Graphite line-protocol address; reporting is off when unset
    #[arg(long, env = "MYSENTRY_GRAPHITE_ADDR")]
    pub graphite_address: Option<String>,

    /// Repoint replication with binlog positions instead of GTID
    #[arg(long, env = "MYSENTRY_NO_GTID")]
    pub no_gtid: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,
}

impl Cli {
    pub fn monitor_config(&self) -> MonitorConfig {
        let mut config = MonitorConfig::default()
            .with_bind_address(&self.bind)
            .with_state_dir(&self.state_dir)
            .with_secret_file(&self.secret_file)
            .with_inventory_url(&self.inventory_url)
            .with_app_name(&self.app_name)
            .with_domain(&self.domain)
            .with_graphite_address(self.graphite_address.clone());
        config.proc_name = self.proc_name.clone();
        config.use_gtid = !self.no_gtid;
        config
    }
}
