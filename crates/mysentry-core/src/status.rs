//! Role and health model
//!
//! Every known endpoint has exactly one [`Role`]. Health is never stored:
//! [`InstanceStatus`] and [`ReplicationStatus`] are computed on demand
//! through the [`crate::ReplicationDriver`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Replication role of an endpoint. Role membership is mutually exclusive
/// and exhaustive over all known endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// The single writable instance.
    Master,
    /// A slave designated as preferred next master.
    Standby,
    /// A read-only replica of the master.
    Slave,
    /// Discovered and running, but not yet assigned a replication role.
    Unregistered,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "Master",
            Role::Standby => "Standby",
            Role::Slave => "Slave",
            Role::Unregistered => "Unregistered",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liveness of the underlying database process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceStatus {
    Ok,
    Error,
    Unregistered,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InstanceStatus::Ok => "OK",
            InstanceStatus::Error => "ERROR",
            InstanceStatus::Unregistered => "UNREGISTERED",
        };
        f.write_str(text)
    }
}

/// Relationship between an endpoint and its expected replication source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReplicationStatus {
    /// Not replicating at all (detached).
    None,
    /// Both replication threads running against the expected source.
    Ok,
    /// IO thread running, SQL thread catching up.
    Syncing,
    /// Replication configured but stopped.
    Pausing,
    /// Replicating from a source other than the expected one.
    #[serde(rename = "WRONG MASTER")]
    WrongMaster,
    /// The expected source is not reachable for comparison.
    Unknown,
    /// Replication threads in an error state.
    Error,
}

impl ReplicationStatus {
    /// Whether this status qualifies a slave for the published snapshot.
    pub fn is_serving(&self) -> bool {
        matches!(self, ReplicationStatus::Ok | ReplicationStatus::Syncing)
    }
}

impl fmt::Display for ReplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReplicationStatus::None => "NONE",
            ReplicationStatus::Ok => "OK",
            ReplicationStatus::Syncing => "SYNCING",
            ReplicationStatus::Pausing => "PAUSING",
            ReplicationStatus::WrongMaster => "WRONG MASTER",
            ReplicationStatus::Unknown => "UNKNOWN",
            ReplicationStatus::Error => "ERROR",
        };
        f.write_str(text)
    }
}
