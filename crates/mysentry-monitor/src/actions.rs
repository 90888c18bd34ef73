//! Administrative action handlers
//!
//! Every handler runs inside the coordinator's serialized loop, so it may
//! mutate the topology freely. Handlers answer `PreconditionFailed` for
//! role/status-illegal requests and `Driver` for failed operations; the
//! switchover has its own module.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use mysentry_core::{
    Endpoint, MonitorConfig, MonitorError, ReplicationDriver, ReplicationStatus, Role, Secrets,
    Topology,
};

use crate::switchover;

/// An administrative command on one endpoint, named the way the wire names
/// them (register actions carry the target role).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "detach")]
    Detach,
    #[serde(rename = "pause")]
    Pause,
    #[serde(rename = "resume")]
    Resume,
    #[serde(rename = "master")]
    RegisterMaster,
    #[serde(rename = "standby")]
    RegisterStandby,
    #[serde(rename = "slave")]
    RegisterSlave,
    #[serde(rename = "switch")]
    Switch,
    #[serde(rename = "unregister")]
    Unregister,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Active => "active",
            Action::Detach => "detach",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::RegisterMaster => "master",
            Action::RegisterStandby => "standby",
            Action::RegisterSlave => "slave",
            Action::Switch => "switch",
            Action::Unregister => "unregister",
        }
    }

    /// The role a registration action assigns, if it is one.
    pub fn register_role(&self) -> Option<Role> {
        match self {
            Action::RegisterMaster => Some(Role::Master),
            Action::RegisterStandby => Some(Role::Standby),
            Action::RegisterSlave => Some(Role::Slave),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Action::Active),
            "detach" => Ok(Action::Detach),
            "pause" => Ok(Action::Pause),
            "resume" => Ok(Action::Resume),
            "master" => Ok(Action::RegisterMaster),
            "standby" => Ok(Action::RegisterStandby),
            "slave" => Ok(Action::RegisterSlave),
            "switch" => Ok(Action::Switch),
            "unregister" => Ok(Action::Unregister),
            other => Err(MonitorError::PreconditionFailed(format!(
                "unknown action: {other}"
            ))),
        }
    }
}

/// Dispatch one action. Returns whether the topology changed (and therefore
/// must be persisted).
pub(crate) async fn apply(
    topology: &mut Topology,
    driver: &dyn ReplicationDriver,
    config: &MonitorConfig,
    endpoint: &Endpoint,
    action: Action,
) -> Result<bool, MonitorError> {
    info!(endpoint = %endpoint, action = %action, "handling action");
    match action {
        Action::Active => {
            active(topology, driver, config, endpoint).await?;
            Ok(false)
        }
        Action::Detach => {
            detach(driver, endpoint).await?;
            Ok(false)
        }
        Action::Pause => {
            pause(topology, driver, endpoint).await?;
            Ok(false)
        }
        Action::Resume => {
            resume(topology, driver, endpoint).await?;
            Ok(false)
        }
        Action::RegisterMaster | Action::RegisterStandby | Action::RegisterSlave => {
            let role = match action {
                Action::RegisterMaster => Role::Master,
                Action::RegisterStandby => Role::Standby,
                _ => Role::Slave,
            };
            register(topology, driver, config, endpoint, role).await?;
            Ok(true)
        }
        Action::Switch => {
            switchover::switch_to_master(topology, driver, config, endpoint).await?;
            Ok(true)
        }
        Action::Unregister => {
            unregister(topology, driver, endpoint).await?;
            Ok(true)
        }
    }
}

/// Reattach a detached instance to its appropriate source and start
/// replicating. For the master that source is the standby (closing the
/// ring); for everyone else it is the master.
async fn active(
    topology: &Topology,
    driver: &dyn ReplicationDriver,
    config: &MonitorConfig,
    endpoint: &Endpoint,
) -> Result<(), MonitorError> {
    let source = if topology.master() == Some(endpoint) {
        topology.standby()
    } else {
        topology.master()
    };
    let source = source.ok_or_else(|| {
        MonitorError::PreconditionFailed("no replication source available".into())
    })?;
    if driver.check_replication(endpoint, source).await != ReplicationStatus::None {
        return Err(MonitorError::PreconditionFailed(format!(
            "{endpoint} is not in detached mode"
        )));
    }
    driver
        .change_master_to(endpoint, source, config.use_gtid)
        .await?;
    driver.start_slave(endpoint).await?;
    Ok(())
}

/// Break the instance out of the topology without changing its role.
async fn detach(driver: &dyn ReplicationDriver, endpoint: &Endpoint) -> Result<(), MonitorError> {
    driver.stop_slave(endpoint).await?;
    driver.reset_slave(endpoint).await?;
    Ok(())
}

async fn pause(
    topology: &Topology,
    driver: &dyn ReplicationDriver,
    endpoint: &Endpoint,
) -> Result<(), MonitorError> {
    if topology.master() == Some(endpoint) {
        driver.set_global_variable(endpoint, "read_only", 1).await?;
    } else {
        driver.stop_slave(endpoint).await?;
    }
    Ok(())
}

async fn resume(
    topology: &Topology,
    driver: &dyn ReplicationDriver,
    endpoint: &Endpoint,
) -> Result<(), MonitorError> {
    if topology.master() == Some(endpoint) {
        driver.set_global_variable(endpoint, "read_only", 0).await?;
    } else {
        driver.start_slave(endpoint).await?;
    }
    Ok(())
}

async fn register(
    topology: &mut Topology,
    driver: &dyn ReplicationDriver,
    config: &MonitorConfig,
    endpoint: &Endpoint,
    role: Role,
) -> Result<(), MonitorError> {
    if !topology.unregistered().contains(endpoint) {
        return Err(MonitorError::PreconditionFailed(format!(
            "{endpoint} is already registered"
        )));
    }
    match role {
        Role::Master => {
            if topology.master().is_some() {
                return Err(MonitorError::PreconditionFailed(
                    "master is already registered".into(),
                ));
            }
        }
        Role::Standby => {
            if topology.master().is_none() {
                return Err(MonitorError::PreconditionFailed(
                    "master is not registered".into(),
                ));
            }
            if topology.standby().is_some() {
                return Err(MonitorError::PreconditionFailed(
                    "standby is already registered".into(),
                ));
            }
        }
        Role::Slave => {
            if topology.master().is_none() {
                return Err(MonitorError::PreconditionFailed(
                    "master is not registered".into(),
                ));
            }
        }
        Role::Unregistered => unreachable!("registration never targets Unregistered"),
    }
    // Re-read the secret file so rotated credentials apply to new
    // registrations without a restart.
    let secrets = Secrets::load(&config.secret_file).unwrap_or_else(|e| {
        warn!(file = %config.secret_file.display(), error = %e, "secret file unreadable");
        Secrets::default()
    });
    driver.register(endpoint, &secrets.credentials()).await?;
    topology.register(endpoint, role)?;
    Ok(())
}

async fn unregister(
    topology: &mut Topology,
    driver: &dyn ReplicationDriver,
    endpoint: &Endpoint,
) -> Result<(), MonitorError> {
    topology.demote(endpoint)?;
    driver.unregister(endpoint).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDriver;

    fn ep(s: &str) -> Endpoint {
        s.parse().unwrap()
    }

    fn config(dir: &std::path::Path) -> MonitorConfig {
        MonitorConfig::default().with_secret_file(dir.join("secret.conf"))
    }

    fn populated() -> Topology {
        let mut t = Topology::new();
        for e in [
            "mysql-0:3306",
            "mysql-1:3306",
            "mysql-2:3306",
            "mysql-3:3306",
        ] {
            t.insert_unregistered(ep(e));
        }
        t.register(&ep("mysql-0:3306"), Role::Master).unwrap();
        t.register(&ep("mysql-1:3306"), Role::Standby).unwrap();
        t.register(&ep("mysql-2:3306"), Role::Slave).unwrap();
        t
    }

    #[tokio::test]
    async fn test_register_master_rejected_when_master_exists() {
        let dir = tempfile::tempdir().unwrap();
        let mut topology = populated();
        let before = topology.clone();
        let driver = MockDriver::new();
        let err = apply(
            &mut topology,
            &driver,
            &config(dir.path()),
            &ep("mysql-3:3306"),
            Action::RegisterMaster,
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(topology, before);
        assert!(driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_register_slave_requires_master() {
        let dir = tempfile::tempdir().unwrap();
        let mut topology = Topology::new();
        topology.insert_unregistered(ep("mysql-3:3306"));
        let driver = MockDriver::new();
        let err = apply(
            &mut topology,
            &driver,
            &config(dir.path()),
            &ep("mysql-3:3306"),
            Action::RegisterSlave,
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[tokio::test]
    async fn test_register_standby_rejected_when_occupied() {
        let dir = tempfile::tempdir().unwrap();
        let mut topology = populated();
        let driver = MockDriver::new();
        let err = apply(
            &mut topology,
            &driver,
            &config(dir.path()),
            &ep("mysql-3:3306"),
            Action::RegisterStandby,
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[tokio::test]
    async fn test_register_slave_moves_partition_and_registers_driver() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("secret.conf"), "dba_passwd=x\nrepl_passwd=y\n").unwrap();
        let mut topology = populated();
        let driver = MockDriver::new();
        let changed = apply(
            &mut topology,
            &driver,
            &config(dir.path()),
            &ep("mysql-3:3306"),
            Action::RegisterSlave,
        )
        .await
        .unwrap();
        assert!(changed);
        assert_eq!(topology.role_of(&ep("mysql-3:3306")), Some(Role::Slave));
        assert_eq!(driver.calls_for("register"), vec!["register mysql-3:3306"]);
        assert!(topology.is_consistent());
    }

    #[tokio::test]
    async fn test_unregister_master_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut topology = populated();
        let driver = MockDriver::new();
        let err = apply(
            &mut topology,
            &driver,
            &config(dir.path()),
            &ep("mysql-0:3306"),
            Action::Unregister,
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(topology.master(), Some(&ep("mysql-0:3306")));
    }

    #[tokio::test]
    async fn test_unregister_slave() {
        let dir = tempfile::tempdir().unwrap();
        let mut topology = populated();
        let driver = MockDriver::new();
        let changed = apply(
            &mut topology,
            &driver,
            &config(dir.path()),
            &ep("mysql-2:3306"),
            Action::Unregister,
        )
        .await
        .unwrap();
        assert!(changed);
        assert_eq!(
            topology.role_of(&ep("mysql-2:3306")),
            Some(Role::Unregistered)
        );
        assert_eq!(
            driver.calls_for("unregister"),
            vec!["unregister mysql-2:3306"]
        );
    }

    #[tokio::test]
    async fn test_pause_master_sets_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut topology = populated();
        let driver = MockDriver::new();
        apply(
            &mut topology,
            &driver,
            &config(dir.path()),
            &ep("mysql-0:3306"),
            Action::Pause,
        )
        .await
        .unwrap();
        assert_eq!(
            driver.calls_for("set_global_variable"),
            vec!["set_global_variable mysql-0:3306 read_only=1"]
        );
    }

    #[tokio::test]
    async fn test_pause_slave_stops_replication() {
        let dir = tempfile::tempdir().unwrap();
        let mut topology = populated();
        let driver = MockDriver::new();
        apply(
            &mut topology,
            &driver,
            &config(dir.path()),
            &ep("mysql-2:3306"),
            Action::Pause,
        )
        .await
        .unwrap();
        assert_eq!(driver.calls_for("stop_slave"), vec!["stop_slave mysql-2:3306"]);
    }

    #[tokio::test]
    async fn test_active_rejected_unless_detached() {
        let dir = tempfile::tempdir().unwrap();
        let mut topology = populated();
        let driver = MockDriver::new();
        driver.set_replication(
            &ep("mysql-2:3306"),
            &ep("mysql-0:3306"),
            ReplicationStatus::Ok,
        );
        let err = apply(
            &mut topology,
            &driver,
            &config(dir.path()),
            &ep("mysql-2:3306"),
            Action::Active,
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[tokio::test]
    async fn test_active_repoints_and_starts() {
        let dir = tempfile::tempdir().unwrap();
        let mut topology = populated();
        let driver = MockDriver::new();
        apply(
            &mut topology,
            &driver,
            &config(dir.path()),
            &ep("mysql-2:3306"),
            Action::Active,
        )
        .await
        .unwrap();
        assert_eq!(
            driver.calls_for("change_master_to"),
            vec!["change_master_to mysql-2:3306 -> mysql-0:3306"]
        );
        assert_eq!(
            driver.calls_for("start_slave"),
            vec!["start_slave mysql-2:3306"]
        );
    }

    #[tokio::test]
    async fn test_active_on_master_targets_standby() {
        let dir = tempfile::tempdir().unwrap();
        let mut topology = populated();
        let driver = MockDriver::new();
        apply(
            &mut topology,
            &driver,
            &config(dir.path()),
            &ep("mysql-0:3306"),
            Action::Active,
        )
        .await
        .unwrap();
        assert_eq!(
            driver.calls_for("change_master_to"),
            vec!["change_master_to mysql-0:3306 -> mysql-1:3306"]
        );
    }

    #[test]
    fn test_action_round_trip() {
        for action in [
            Action::Active,
            Action::Detach,
            Action::Pause,
            Action::Resume,
            Action::RegisterMaster,
            Action::RegisterStandby,
            Action::RegisterSlave,
            Action::Switch,
            Action::Unregister,
        ] {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        assert!("promote".parse::<Action>().is_err());
    }
}
