//! The mysql_async-backed driver

use async_trait::async_trait;
use dashmap::DashMap;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, Row};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use mysentry_core::driver::DriverResult;
use mysentry_core::{
    Credentials, DriverError, Endpoint, InstanceStatus, ProcessInfo, ReplicationDriver,
    ReplicationStatus, SlaveStatus,
};

use crate::status::classify;

/// A registered instance: its connection pool plus the replication account
/// its replicas present in `CHANGE MASTER TO`.
struct Registered {
    pool: Pool,
    repl_user: String,
    repl_password: String,
}

/// Production [`ReplicationDriver`] over `mysql_async`.
///
/// Instances become usable after [`ReplicationDriver::register`]; operations
/// against an unregistered endpoint fail (status checks report
/// `Unregistered`/`Unknown` instead).
pub struct MysqlDriver {
    instances: DashMap<Endpoint, Registered>,
    connect_timeout: Duration,
}

impl MysqlDriver {
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
            connect_timeout: Duration::from_secs(1),
        }
    }

    async fn conn(&self, endpoint: &Endpoint, op: &'static str) -> DriverResult<Conn> {
        let pool = self
            .instances
            .get(endpoint)
            .map(|r| r.pool.clone())
            .ok_or_else(|| DriverError::new(endpoint, op, "not registered"))?;
        tokio::time::timeout(self.connect_timeout, pool.get_conn())
            .await
            .map_err(|_| DriverError::new(endpoint, op, "connect timed out"))?
            .map_err(|e| DriverError::new(endpoint, op, e.to_string()))
    }

    async fn query_drop(&self, endpoint: &Endpoint, op: &'static str, sql: &str) -> DriverResult<()> {
        let mut conn = self.conn(endpoint, op).await?;
        debug!(endpoint = %endpoint, sql, "executing");
        conn.query_drop(sql)
            .await
            .map_err(|e| DriverError::new(endpoint, op, e.to_string()))
    }

    fn repl_account(&self, endpoint: &Endpoint, op: &'static str) -> DriverResult<(String, String)> {
        self.instances
            .get(endpoint)
            .map(|r| (r.repl_user.clone(), r.repl_password.clone()))
            .ok_or_else(|| DriverError::new(endpoint, op, "not registered"))
    }
}

impl Default for MysqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplicationDriver for MysqlDriver {
    async fn check_instance(&self, endpoint: &Endpoint) -> InstanceStatus {
        if !self.instances.contains_key(endpoint) {
            return InstanceStatus::Unregistered;
        }
        match self.conn(endpoint, "check_instance").await {
            Ok(mut conn) => match conn.ping().await {
                Ok(()) => InstanceStatus::Ok,
                Err(e) => {
                    debug!(endpoint = %endpoint, error = %e, "ping failed");
                    InstanceStatus::Error
                }
            },
            Err(e) => {
                debug!(endpoint = %endpoint, error = %e, "connect failed");
                InstanceStatus::Error
            }
        }
    }

    async fn check_replication(
        &self,
        endpoint: &Endpoint,
        source: &Endpoint,
    ) -> ReplicationStatus {
        if !self.instances.contains_key(endpoint) || !self.instances.contains_key(source) {
            return ReplicationStatus::Unknown;
        }
        match self.slave_status(endpoint).await {
            Ok(Some(status)) => classify(&status, source),
            Ok(None) => ReplicationStatus::None,
            Err(e) => {
                debug!(endpoint = %endpoint, error = %e, "slave status unavailable");
                ReplicationStatus::Error
            }
        }
    }

    async fn register(&self, endpoint: &Endpoint, credentials: &Credentials) -> DriverResult<()> {
        let port: u16 = endpoint
            .port()
            .parse()
            .map_err(|_| DriverError::new(endpoint, "register", "invalid port"))?;
        let opts: Opts = OptsBuilder::default()
            .ip_or_hostname(endpoint.host())
            .tcp_port(port)
            .user(Some(credentials.dba_user.clone()))
            .pass(Some(credentials.dba_password.clone()))
            .into();
        let pool = Pool::new(opts);
        // Re-registering replaces the pool, so rotated credentials apply.
        if let Some((_, old)) = self.instances.remove(endpoint) {
            tokio::spawn(async move {
                let _ = old.pool.disconnect().await;
            });
        }
        self.instances.insert(
            endpoint.clone(),
            Registered {
                pool,
                repl_user: credentials.repl_user.clone(),
                repl_password: credentials.repl_password.clone(),
            },
        );
        Ok(())
    }

    async fn unregister(&self, endpoint: &Endpoint) {
        if let Some((_, registered)) = self.instances.remove(endpoint) {
            tokio::spawn(async move {
                let _ = registered.pool.disconnect().await;
            });
        }
    }

    async fn start_slave(&self, endpoint: &Endpoint) -> DriverResult<()> {
        self.query_drop(endpoint, "start_slave", "START SLAVE").await
    }

    async fn stop_slave(&self, endpoint: &Endpoint) -> DriverResult<()> {
        self.query_drop(endpoint, "stop_slave", "STOP SLAVE").await
    }

    async fn reset_slave(&self, endpoint: &Endpoint) -> DriverResult<()> {
        self.query_drop(endpoint, "reset_slave", "STOP SLAVE").await?;
        self.query_drop(endpoint, "reset_slave", "RESET SLAVE ALL")
            .await
    }

    async fn change_master_to(
        &self,
        endpoint: &Endpoint,
        source: &Endpoint,
        use_gtid: bool,
    ) -> DriverResult<()> {
        let (repl_user, repl_password) = self.repl_account(endpoint, "change_master_to")?;
        let source_port: u16 = source
            .port()
            .parse()
            .map_err(|_| DriverError::new(endpoint, "change_master_to", "invalid source port"))?;
        let mut sql = format!(
            "CHANGE MASTER TO MASTER_HOST='{}', MASTER_PORT={}, MASTER_USER='{}', MASTER_PASSWORD='{}'",
            escape(source.host()),
            source_port,
            escape(&repl_user),
            escape(&repl_password),
        );
        if use_gtid {
            sql.push_str(", MASTER_AUTO_POSITION=1");
        }
        self.query_drop(endpoint, "change_master_to", &sql).await
    }

    async fn set_global_variable(
        &self,
        endpoint: &Endpoint,
        name: &str,
        value: i64,
    ) -> DriverResult<()> {
        check_identifier(endpoint, "set_global_variable", name)?;
        let sql = format!("SET GLOBAL {name} = {value}");
        self.query_drop(endpoint, "set_global_variable", &sql).await
    }

    async fn get_global_variable(
        &self,
        endpoint: &Endpoint,
        name: &str,
    ) -> DriverResult<Option<String>> {
        check_identifier(endpoint, "get_global_variable", name)?;
        let mut conn = self.conn(endpoint, "get_global_variable").await?;
        let sql = format!("SHOW GLOBAL VARIABLES LIKE '{}'", escape(name));
        let row: Option<Row> = conn
            .query_first(sql)
            .await
            .map_err(|e| DriverError::new(endpoint, "get_global_variable", e.to_string()))?;
        Ok(row.map(|r| get_string(&r, "Value")))
    }

    async fn kill_processes(
        &self,
        endpoint: &Endpoint,
        spare_users: &[String],
    ) -> DriverResult<()> {
        let mut conn = self.conn(endpoint, "kill_processes").await?;
        let own_id = conn.id() as u64;
        let rows: Vec<Row> = conn
            .query("SHOW FULL PROCESSLIST")
            .await
            .map_err(|e| DriverError::new(endpoint, "kill_processes", e.to_string()))?;
        for row in rows {
            let id = get_u64(&row, "Id");
            let user = get_string(&row, "User");
            if id == own_id || spare_users.iter().any(|u| u == &user) {
                continue;
            }
            // The session may have exited between the listing and the kill.
            if let Err(e) = conn.query_drop(format!("KILL {id}")).await {
                debug!(endpoint = %endpoint, id, error = %e, "kill skipped");
            }
        }
        Ok(())
    }

    async fn process_list(&self, endpoint: &Endpoint) -> DriverResult<Vec<ProcessInfo>> {
        let mut conn = self.conn(endpoint, "process_list").await?;
        let rows: Vec<Row> = conn
            .query("SHOW FULL PROCESSLIST")
            .await
            .map_err(|e| DriverError::new(endpoint, "process_list", e.to_string()))?;
        Ok(rows
            .iter()
            .map(|row| ProcessInfo {
                id: get_u64(row, "Id"),
                user: get_string(row, "User"),
                host: get_string(row, "Host"),
                db: get_string(row, "db"),
                command: get_string(row, "Command"),
                time: get_i64(row, "Time"),
                state: get_string(row, "State"),
                info: get_string(row, "Info"),
            })
            .collect())
    }

    async fn slave_status(&self, endpoint: &Endpoint) -> DriverResult<Option<SlaveStatus>> {
        let mut conn = self.conn(endpoint, "slave_status").await?;
        let row: Option<Row> = conn
            .query_first("SHOW SLAVE STATUS")
            .await
            .map_err(|e| DriverError::new(endpoint, "slave_status", e.to_string()))?;
        Ok(row.map(|row| SlaveStatus {
            auto_position: get_u64(&row, "Auto_Position") == 1,
            master_host: get_string(&row, "Master_Host"),
            master_port: get_u64(&row, "Master_Port") as u16,
            master_user: get_string(&row, "Master_User"),
            master_log_file: get_string(&row, "Master_Log_File"),
            read_master_log_pos: get_u64(&row, "Read_Master_Log_Pos"),
            relay_log_file: get_string(&row, "Relay_Log_File"),
            relay_log_pos: get_u64(&row, "Relay_Log_Pos"),
            relay_log_space: get_u64(&row, "Relay_Log_Space"),
            relay_master_log_file: get_string(&row, "Relay_Master_Log_File"),
            exec_master_log_pos: get_u64(&row, "Exec_Master_Log_Pos"),
            slave_io_running: get_string(&row, "Slave_IO_Running"),
            slave_io_state: get_string(&row, "Slave_IO_State"),
            slave_sql_running: get_string(&row, "Slave_SQL_Running"),
            slave_sql_running_state: get_string(&row, "Slave_SQL_Running_State"),
            seconds_behind_master: get_i64(&row, "Seconds_Behind_Master"),
            executed_gtid_set: get_string(&row, "Executed_Gtid_Set"),
            last_errno: get_i64(&row, "Last_Errno"),
            last_error: get_string(&row, "Last_Error"),
            last_io_errno: get_i64(&row, "Last_IO_Errno"),
            last_io_error: get_string(&row, "Last_IO_Error"),
            last_io_error_timestamp: get_string(&row, "Last_IO_Error_Timestamp"),
            last_sql_errno: get_i64(&row, "Last_SQL_Errno"),
            last_sql_error: get_string(&row, "Last_SQL_Error"),
            last_sql_error_timestamp: get_string(&row, "Last_SQL_Error_Timestamp"),
        }))
    }

    async fn global_status(
        &self,
        endpoint: &Endpoint,
        pattern: &str,
    ) -> DriverResult<BTreeMap<String, String>> {
        let mut conn = self.conn(endpoint, "global_status").await?;
        let sql = format!("SHOW GLOBAL STATUS LIKE '{}'", escape(pattern));
        let rows: Vec<Row> = conn
            .query(sql)
            .await
            .map_err(|e| DriverError::new(endpoint, "global_status", e.to_string()))?;
        Ok(rows
            .iter()
            .map(|row| (get_string(row, "Variable_name"), get_string(row, "Value")))
            .collect())
    }
}

fn check_identifier(endpoint: &Endpoint, op: &'static str, name: &str) -> DriverResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        warn!(endpoint = %endpoint, name, "rejecting non-identifier variable name");
        Err(DriverError::new(endpoint, op, "invalid variable name"))
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

// get_opt: NULLs and type mismatches degrade to the default instead of
// panicking inside the driver
fn get_string(row: &Row, name: &str) -> String {
    row.get_opt::<String, _>(name)
        .and_then(|v| v.ok())
        .unwrap_or_default()
}

fn get_u64(row: &Row, name: &str) -> u64 {
    row.get_opt::<u64, _>(name)
        .and_then(|v| v.ok())
        .unwrap_or_default()
}

fn get_i64(row: &Row, name: &str) -> i64 {
    row.get_opt::<i64, _>(name)
        .and_then(|v| v.ok())
        .unwrap_or_default()
}
