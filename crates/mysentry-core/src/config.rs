//! Process configuration
//!
//! One explicit config object per process, built once in `main` from CLI
//! arguments and passed by reference into the constructors. No globals.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::driver::Credentials;

/// Which snapshot list a proxy serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    Master,
    Slave,
}

impl ServiceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceMode::Master => "master",
            ServiceMode::Slave => "slave",
        }
    }
}

impl fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "master" => Ok(ServiceMode::Master),
            "slave" => Ok(ServiceMode::Slave),
            other => Err(format!("invalid service mode: {other} (master|slave)")),
        }
    }
}

/// Monitor daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// HTTP bind address for the query/action API and the snapshot feed.
    pub bind_address: String,
    /// Directory holding the three persisted role files.
    pub state_dir: PathBuf,
    /// `key=value` file with the dba/repl credentials.
    pub secret_file: PathBuf,
    /// Base URL of the process-inventory service the discovery feed watches.
    pub inventory_url: String,
    /// Application name the inventory watch is keyed by.
    pub app_name: String,
    /// Cluster domain, used as the leading metrics key segment.
    pub domain: String,
    /// Process name identifying database server instances in the inventory.
    pub proc_name: String,
    /// Graphite line-protocol address; `None` disables reporting.
    pub graphite_address: Option<String>,
    /// Pass `MASTER_AUTO_POSITION` when repointing replication.
    pub use_gtid: bool,
    /// Health-inspection tick.
    pub inspect_interval: Duration,
    /// Metrics-report tick.
    pub report_interval: Duration,
    /// Cooldown between feed reconnect attempts, and the switchover's one
    /// replication-verification grace wait.
    pub cooldown: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:6033".to_string(),
            state_dir: PathBuf::from("/var/lib/mysentry"),
            secret_file: PathBuf::from("conf/secret.conf"),
            inventory_url: "http://inventory:9001".to_string(),
            app_name: "mysql".to_string(),
            domain: "local".to_string(),
            proc_name: "mysql-server".to_string(),
            graphite_address: None,
            use_gtid: true,
            inspect_interval: Duration::from_secs(3),
            report_interval: Duration::from_secs(60),
            cooldown: Duration::from_secs(3),
        }
    }
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn with_secret_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.secret_file = path.into();
        self
    }

    pub fn with_inventory_url(mut self, url: impl Into<String>) -> Self {
        self.inventory_url = url.into();
        self
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_graphite_address(mut self, address: Option<String>) -> Self {
        self.graphite_address = address;
        self
    }
}

/// Proxy daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Port mysql clients connect to.
    pub service_port: u16,
    /// Which role's endpoints this proxy serves.
    pub service_mode: ServiceMode,
    /// Base URL of the monitor's snapshot feed.
    pub monitor_url: String,
    /// Cooldown between feed reconnects and empty-target-list rechecks.
    pub cooldown: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            service_port: 3306,
            service_mode: ServiceMode::Slave,
            monitor_url: "http://monitor:6033".to_string(),
            cooldown: Duration::from_secs(3),
        }
    }
}

/// Credentials parsed from the secret file (`key=value`, one per line).
///
/// Re-read on every registration so a rotated password takes effect without
/// a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Secrets {
    pub dba_password: String,
    pub repl_password: String,
}

/// Account names are fixed; only the passwords live in the secret file.
pub const DBA_USER: &str = "dba";
pub const REPL_USER: &str = "repl";

impl Secrets {
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let data = fs::read_to_string(path)?;
        Ok(Self::parse(&data))
    }

    fn parse(data: &str) -> Self {
        let mut secrets = Secrets::default();
        for line in data.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key.trim() {
                "dba_passwd" => secrets.dba_password = value.trim().to_string(),
                "repl_passwd" => secrets.repl_password = value.trim().to_string(),
                _ => {}
            }
        }
        secrets
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            dba_user: DBA_USER.to_string(),
            dba_password: self.dba_password.clone(),
            repl_user: REPL_USER.to_string(),
            repl_password: self.repl_password.clone(),
        }
    }

}

/// Users whose sessions survive a switchover's kill sweeps: the monitor's
/// own accounts plus MySQL's internal ones.
pub fn system_users() -> Vec<String> {
    vec![
        DBA_USER.to_string(),
        REPL_USER.to_string(),
        "root".to_string(),
        "system user".to_string(),
    ]
}
