//! Replication driver capability
//!
//! The coordinator never speaks to MySQL directly; every per-instance
//! operation goes through [`ReplicationDriver`]. The production
//! implementation lives in `mysentry-mysql`; tests script a mock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::endpoint::Endpoint;
use crate::status::{InstanceStatus, ReplicationStatus};

/// A failed driver operation, with enough context to diagnose from the log.
#[derive(Debug, Clone, Error)]
#[error("{op} on {endpoint} failed: {message}")]
pub struct DriverError {
    pub endpoint: Endpoint,
    pub op: &'static str,
    pub message: String,
}

impl DriverError {
    pub fn new(endpoint: &Endpoint, op: &'static str, message: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.clone(),
            op,
            message: message.into(),
        }
    }
}

/// Result type for driver operations
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Credentials handed to the driver when an instance is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Administrative account used for all driver operations.
    pub dba_user: String,
    pub dba_password: String,
    /// Account the replicas use in `CHANGE MASTER TO`.
    pub repl_user: String,
    pub repl_password: String,
}

/// One row of the instance's live session list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: u64,
    pub user: String,
    pub host: String,
    pub db: String,
    pub command: String,
    pub time: i64,
    pub state: String,
    pub info: String,
}

/// The subset of `SHOW SLAVE STATUS` the monitor exposes and reports on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlaveStatus {
    pub auto_position: bool,
    pub master_host: String,
    pub master_port: u16,
    pub master_user: String,
    pub master_log_file: String,
    pub read_master_log_pos: u64,
    pub relay_log_file: String,
    pub relay_log_pos: u64,
    pub relay_log_space: u64,
    pub relay_master_log_file: String,
    pub exec_master_log_pos: u64,
    pub slave_io_running: String,
    pub slave_io_state: String,
    pub slave_sql_running: String,
    pub slave_sql_running_state: String,
    pub seconds_behind_master: i64,
    pub executed_gtid_set: String,
    pub last_errno: i64,
    pub last_error: String,
    pub last_io_errno: i64,
    pub last_io_error: String,
    pub last_io_error_timestamp: String,
    pub last_sql_errno: i64,
    pub last_sql_error: String,
    pub last_sql_error_timestamp: String,
}

impl SlaveStatus {
    /// Flatten into the key/value map shown on the detail view, keyed the
    /// way `SHOW SLAVE STATUS` names its columns.
    pub fn to_field_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("Auto_Position".into(), self.auto_position.to_string());
        map.insert("Master_Host".into(), self.master_host.clone());
        map.insert("Master_Port".into(), self.master_port.to_string());
        map.insert("Master_User".into(), self.master_user.clone());
        map.insert("Master_Log_File".into(), self.master_log_file.clone());
        map.insert(
            "Read_Master_Log_Pos".into(),
            self.read_master_log_pos.to_string(),
        );
        map.insert("Relay_Log_File".into(), self.relay_log_file.clone());
        map.insert("Relay_Log_Pos".into(), self.relay_log_pos.to_string());
        map.insert("Relay_Log_Space".into(), self.relay_log_space.to_string());
        map.insert(
            "Relay_Master_Log_File".into(),
            self.relay_master_log_file.clone(),
        );
        map.insert(
            "Exec_Master_Log_Pos".into(),
            self.exec_master_log_pos.to_string(),
        );
        map.insert("Slave_IO_Running".into(), self.slave_io_running.clone());
        map.insert("Slave_IO_State".into(), self.slave_io_state.clone());
        map.insert("Slave_SQL_Running".into(), self.slave_sql_running.clone());
        map.insert(
            "Slave_SQL_Running_State".into(),
            self.slave_sql_running_state.clone(),
        );
        map.insert(
            "Seconds_Behind_Master".into(),
            self.seconds_behind_master.to_string(),
        );
        map.insert("Executed_Gtid_Set".into(), self.executed_gtid_set.clone());
        map.insert("Last_Errno".into(), self.last_errno.to_string());
        map.insert("Last_Error".into(), self.last_error.clone());
        map.insert("Last_IO_Errno".into(), self.last_io_errno.to_string());
        map.insert("Last_IO_Error".into(), self.last_io_error.clone());
        map.insert(
            "Last_IO_Error_Timestamp".into(),
            self.last_io_error_timestamp.clone(),
        );
        map.insert("Last_SQL_Errno".into(), self.last_sql_errno.to_string());
        map.insert("Last_SQL_Error".into(), self.last_sql_error.clone());
        map.insert(
            "Last_SQL_Error_Timestamp".into(),
            self.last_sql_error_timestamp.clone(),
        );
        map
    }
}

/// Per-instance replication operations.
///
/// Status checks are infallible by design: an unreachable instance is a
/// status (`Error`/`Unknown`), not an error. Mutating operations fail with
/// [`DriverError`].
#[async_trait]
pub trait ReplicationDriver: Send + Sync {
    /// Liveness of the instance's process.
    async fn check_instance(&self, endpoint: &Endpoint) -> InstanceStatus;

    /// Relationship between `endpoint` and its expected `source`.
    async fn check_replication(
        &self,
        endpoint: &Endpoint,
        source: &Endpoint,
    ) -> ReplicationStatus;

    /// Make the instance known to the driver with its credentials.
    async fn register(&self, endpoint: &Endpoint, credentials: &Credentials) -> DriverResult<()>;

    /// Forget the instance. Idempotent, never fails.
    async fn unregister(&self, endpoint: &Endpoint);

    async fn start_slave(&self, endpoint: &Endpoint) -> DriverResult<()>;

    async fn stop_slave(&self, endpoint: &Endpoint) -> DriverResult<()>;

    /// `STOP SLAVE; RESET SLAVE ALL` — clear the replication identity.
    async fn reset_slave(&self, endpoint: &Endpoint) -> DriverResult<()>;

    /// Repoint `endpoint` to replicate from `source`.
    async fn change_master_to(
        &self,
        endpoint: &Endpoint,
        source: &Endpoint,
        use_gtid: bool,
    ) -> DriverResult<()>;

    async fn set_global_variable(
        &self,
        endpoint: &Endpoint,
        name: &str,
        value: i64,
    ) -> DriverResult<()>;

    async fn get_global_variable(
        &self,
        endpoint: &Endpoint,
        name: &str,
    ) -> DriverResult<Option<String>>;

    /// Kill every client session except those owned by `spare_users`.
    async fn kill_processes(&self, endpoint: &Endpoint, spare_users: &[String])
        -> DriverResult<()>;

    async fn process_list(&self, endpoint: &Endpoint) -> DriverResult<Vec<ProcessInfo>>;

    /// `SHOW SLAVE STATUS`; `None` when the instance has no replication
    /// identity configured.
    async fn slave_status(&self, endpoint: &Endpoint) -> DriverResult<Option<SlaveStatus>>;

    /// `SHOW GLOBAL STATUS LIKE pattern` as a name→value map.
    async fn global_status(
        &self,
        endpoint: &Endpoint,
        pattern: &str,
    ) -> DriverResult<BTreeMap<String, String>>;
}
