//! Replication status derivation from `SHOW SLAVE STATUS` fields

use mysentry_core::{Endpoint, ReplicationStatus, SlaveStatus};

/// Classify the replication relationship of an instance against the source
/// it is expected to follow.
///
/// A replica pointed at anyone other than `source` is `WrongMaster`
/// regardless of thread state: routing traffic to it would serve a
/// different history.
pub(crate) fn classify(status: &SlaveStatus, source: &Endpoint) -> ReplicationStatus {
    let expected_port = source.port().parse::<u16>().unwrap_or(0);
    if status.master_host != source.host() || status.master_port != expected_port {
        return ReplicationStatus::WrongMaster;
    }
    if status.last_io_errno != 0 || status.last_sql_errno != 0 {
        return ReplicationStatus::Error;
    }
    let io = status.slave_io_running.as_str();
    let sql = status.slave_sql_running.as_str();
    match (io, sql) {
        ("Yes", "Yes") => {
            if status.seconds_behind_master > 0 {
                ReplicationStatus::Syncing
            } else {
                ReplicationStatus::Ok
            }
        }
        // IO thread still dialing the source counts as catching up
        ("Connecting", "Yes") => ReplicationStatus::Syncing,
        ("No", "No") => ReplicationStatus::Pausing,
        _ => ReplicationStatus::Error,
    }
}
