//! Periodic metrics report
//!
//! One plain-text line per metric per endpoint, graphite line protocol:
//! `<domain>.<app>.<host>.<metric> <value> <unixtimestamp>`. Covers the
//! replication threads, connected-session count, query counter, and
//! liveness for the master, every slave, and the standby. Shipping is one
//! short TCP write; any failure is logged and the next tick tries again.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::warn;

use mysentry_core::{Endpoint, InstanceStatus, ReplicationDriver, Topology};

const DIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Graphite line-protocol reporter.
pub struct GraphiteReporter {
    address: String,
    domain_key: String,
    app_key: String,
}

impl GraphiteReporter {
    pub fn new(address: &str, domain: &str, app_name: &str) -> Self {
        Self {
            address: address.to_string(),
            // dots are the graphite path separator
            domain_key: domain.replace('.', "_"),
            app_key: app_name.replace('.', "_"),
        }
    }

    /// Gather and ship one report for every monitored endpoint.
    pub async fn report(&self, topology: &Topology, driver: &dyn ReplicationDriver) {
        let timestamp = unix_timestamp();
        let mut lines = String::new();
        if let Some(master) = topology.master() {
            lines.push_str(&self.sample(master, driver, timestamp).await);
        }
        for slave in topology.slaves() {
            lines.push_str(&self.sample(slave, driver, timestamp).await);
        }
        if let Some(standby) = topology.standby() {
            lines.push_str(&self.sample(standby, driver, timestamp).await);
        }
        if lines.is_empty() {
            return;
        }
        if let Err(e) = self.send(&lines).await {
            warn!(address = %self.address, error = %e, "metrics report failed");
        }
    }

    async fn sample(
        &self,
        endpoint: &Endpoint,
        driver: &dyn ReplicationDriver,
        timestamp: u64,
    ) -> String {
        let slave_status = driver
            .slave_status(endpoint)
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        let threads_connected = self
            .status_counter(driver, endpoint, "Threads_connected")
            .await;
        let questions = self.status_counter(driver, endpoint, "Questions").await;
        let alive = i64::from(driver.check_instance(endpoint).await == InstanceStatus::Ok);

        let host = endpoint.host();
        [
            self.line(host, "Slave_IO_Running", yes_no(&slave_status.slave_io_running), timestamp),
            self.line(host, "Slave_SQL_Running", yes_no(&slave_status.slave_sql_running), timestamp),
            self.line(host, "Threads_connected", threads_connected, timestamp),
            self.line(host, "Questions", questions, timestamp),
            self.line(host, "Alive", alive, timestamp),
        ]
        .concat()
    }

    async fn status_counter(
        &self,
        driver: &dyn ReplicationDriver,
        endpoint: &Endpoint,
        name: &str,
    ) -> i64 {
        driver
            .global_status(endpoint, name)
            .await
            .ok()
            .and_then(|map| map.get(name).and_then(|v| v.parse().ok()))
            .unwrap_or(0)
    }

    fn line(&self, host: &str, metric: &str, value: i64, timestamp: u64) -> String {
        format!(
            "{}.{}.{}.{} {} {}\n",
            self.domain_key, self.app_key, host, metric, value, timestamp
        )
    }

    async fn send(&self, data: &str) -> std::io::Result<()> {
        let mut stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&self.address))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "dial timed out"))??;
        stream.write_all(data.as_bytes()).await?;
        stream.shutdown().await
    }
}

fn yes_no(value: &str) -> i64 {
    i64::from(value == "Yes")
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDriver;
    use mysentry_core::{Role, SlaveStatus};
    use std::collections::BTreeMap;

    fn ep(s: &str) -> Endpoint {
        s.parse().unwrap()
    }

    #[test]
    fn test_line_format() {
        let reporter = GraphiteReporter::new("graphite:2003", "example.org", "mysql.prod");
        assert_eq!(
            reporter.line("mysql-0", "Alive", 1, 1700000000),
            "example_org.mysql_prod.mysql-0.Alive 1 1700000000\n"
        );
    }

    #[test]
    fn test_yes_no() {
        assert_eq!(yes_no("Yes"), 1);
        assert_eq!(yes_no("No"), 0);
        assert_eq!(yes_no(""), 0);
    }

    #[tokio::test]
    async fn test_sample_covers_all_metrics() {
        let reporter = GraphiteReporter::new("graphite:2003", "local", "mysql");
        let driver = MockDriver::new();
        let endpoint = ep("mysql-1:3306");
        driver.set_slave_status(
            &endpoint,
            SlaveStatus {
                slave_io_running: "Yes".into(),
                slave_sql_running: "No".into(),
                ..Default::default()
            },
        );
        driver.set_global_status(
            &endpoint,
            BTreeMap::from([
                ("Threads_connected".to_string(), "12".to_string()),
                ("Questions".to_string(), "3456".to_string()),
            ]),
        );

        let sample = reporter.sample(&endpoint, &driver, 1700000000).await;
        let lines: Vec<&str> = sample.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "local.mysql.mysql-1.Slave_IO_Running 1 1700000000");
        assert_eq!(lines[1], "local.mysql.mysql-1.Slave_SQL_Running 0 1700000000");
        assert_eq!(lines[2], "local.mysql.mysql-1.Threads_connected 12 1700000000");
        assert_eq!(lines[3], "local.mysql.mysql-1.Questions 3456 1700000000");
        assert_eq!(lines[4], "local.mysql.mysql-1.Alive 1 1700000000");
    }

    #[tokio::test]
    async fn test_report_covers_master_slaves_standby() {
        let reporter = GraphiteReporter::new("127.0.0.1:1", "local", "mysql");
        let driver = MockDriver::new();
        let mut topology = Topology::new();
        for e in ["mysql-0:3306", "mysql-1:3306", "mysql-2:3306"] {
            topology.insert_unregistered(ep(e));
        }
        topology.register(&ep("mysql-0:3306"), Role::Master).unwrap();
        topology.register(&ep("mysql-1:3306"), Role::Standby).unwrap();
        topology.register(&ep("mysql-2:3306"), Role::Slave).unwrap();

        // the send fails (nothing listens on port 1) but sampling must have
        // touched master, slave, and standby
        reporter.report(&topology, &driver).await;
        let checks = driver.calls_for("check_instance");
        assert_eq!(checks.len(), 3);
    }
}
