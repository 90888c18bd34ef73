//! Master switchover
//!
//! The highest-risk operation in the system: promote a slave or the standby
//! to master without ever leaving the cluster with zero or two consistent
//! masters. The forward path records a compensation for each fencing step;
//! on failure before the in-memory role commit the compensations run in
//! reverse. The commit is the point of no return — everything after it is
//! best-effort repointing whose failures are logged, never rolled back,
//! because the authoritative role assignment has already changed.

use tracing::{info, warn};

use mysentry_core::config::system_users;
use mysentry_core::{
    DriverError, Endpoint, MonitorConfig, MonitorError, ReplicationDriver, ReplicationStatus,
    Topology,
};

/// Undo entry for one completed fencing step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Re-open the old master for writes.
    DisableReadOnly(Endpoint),
    /// Restart the replication threads stopped on the old master.
    StartSlave(Endpoint),
}

/// Forward-only compensation log with an explicit commit barrier.
#[derive(Debug, Default)]
pub struct Saga {
    compensations: Vec<Compensation>,
    committed: bool,
}

impl Saga {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the undo for a step that just succeeded.
    pub fn record(&mut self, compensation: Compensation) {
        self.compensations.push(compensation);
    }

    /// Cross the point of no return: recorded compensations will never run.
    pub fn commit(&mut self) {
        self.committed = true;
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Run the recorded compensations in reverse order, best-effort.
    pub async fn unwind(&mut self, driver: &dyn ReplicationDriver) {
        if self.committed {
            return;
        }
        for compensation in self.compensations.drain(..).rev() {
            let result = match &compensation {
                Compensation::DisableReadOnly(ep) => {
                    driver.set_global_variable(ep, "read_only", 0).await
                }
                Compensation::StartSlave(ep) => driver.start_slave(ep).await,
            };
            if let Err(e) = result {
                warn!(error = %e, ?compensation, "switchover rollback step failed");
            }
        }
    }
}

/// Promote `target` to master.
///
/// Fences the current master (kill, `read_only`, kill again), verifies the
/// target is caught up (one grace recheck), chains the old master behind the
/// target, then commits the role change and repoints the rest of the
/// cluster at the new master.
pub(crate) async fn switch_to_master(
    topology: &mut Topology,
    driver: &dyn ReplicationDriver,
    config: &MonitorConfig,
    target: &Endpoint,
) -> Result<(), MonitorError> {
    let old_master = topology
        .master()
        .cloned()
        .ok_or_else(|| MonitorError::PreconditionFailed("master is not registered".into()))?;
    if target == &old_master {
        return Err(MonitorError::PreconditionFailed(format!(
            "{target} is already master"
        )));
    }
    if topology.unregistered().contains(target) {
        return Err(MonitorError::PreconditionFailed(format!(
            "{target} is not registered"
        )));
    }

    let spare = system_users();
    let mut saga = Saga::new();

    // Fence the old master: clear client sessions, refuse new writes, then
    // clear the sessions that raced in before read_only took effect.
    driver.kill_processes(&old_master, &spare).await?;

    driver
        .set_global_variable(&old_master, "read_only", 1)
        .await?;
    saga.record(Compensation::DisableReadOnly(old_master.clone()));

    if let Err(e) = driver.kill_processes(&old_master, &spare).await {
        saga.unwind(driver).await;
        return Err(e.into());
    }

    // The target must have fully applied the old master's history before it
    // can take over. One grace recheck covers a replica that is a heartbeat
    // behind at the moment of the switch.
    let mut status = driver.check_replication(target, &old_master).await;
    if status != ReplicationStatus::Ok {
        tokio::time::sleep(config.cooldown).await;
        status = driver.check_replication(target, &old_master).await;
        if status != ReplicationStatus::Ok {
            saga.unwind(driver).await;
            return Err(DriverError::new(
                target,
                "switch",
                format!("replication status is {status}, not OK"),
            )
            .into());
        }
    }

    // Whether the old master was chained behind the standby decides if the
    // ring gets restored after the promotion.
    let ring = match topology.standby() {
        Some(standby) => {
            driver.check_replication(&old_master, standby).await == ReplicationStatus::Ok
        }
        None => false,
    };

    if let Err(e) = driver.stop_slave(&old_master).await {
        saga.unwind(driver).await;
        return Err(e.into());
    }
    saga.record(Compensation::StartSlave(old_master.clone()));

    if let Err(e) = driver
        .change_master_to(&old_master, target, config.use_gtid)
        .await
    {
        saga.unwind(driver).await;
        return Err(e.into());
    }

    // Point of no return: the authoritative role assignment changes here.
    saga.commit();
    topology.commit_switch(target)?;
    let new_master = target.clone();
    info!(new_master = %new_master, old_master = %old_master, "switchover committed");

    // The promoted instance stops being a replica of the demoted master.
    if let Err(e) = driver.stop_slave(&new_master).await {
        warn!(error = %e, "post-commit: stop slave on new master failed");
    }
    if let Err(e) = driver.reset_slave(&new_master).await {
        warn!(error = %e, "post-commit: reset slave on new master failed");
    }

    if let Some(standby) = topology.standby().cloned() {
        repoint(driver, &standby, &new_master, config.use_gtid).await;
        if ring {
            if let Err(e) = driver
                .change_master_to(&new_master, &standby, config.use_gtid)
                .await
            {
                warn!(error = %e, "post-commit: restoring ring failed");
            } else if let Err(e) = driver.start_slave(&new_master).await {
                warn!(error = %e, "post-commit: starting ring replication failed");
            }
        }
    }

    for slave in topology.slaves().clone() {
        repoint(driver, &slave, &new_master, config.use_gtid).await;
    }

    if let Err(e) = driver
        .set_global_variable(&new_master, "read_only", 0)
        .await
    {
        warn!(error = %e, "post-commit: enabling writes on new master failed");
    }

    Ok(())
}

/// Best-effort stop → repoint → start of one replica against the new master.
async fn repoint(
    driver: &dyn ReplicationDriver,
    endpoint: &Endpoint,
    new_master: &Endpoint,
    use_gtid: bool,
) {
    if let Err(e) = driver.stop_slave(endpoint).await {
        warn!(endpoint = %endpoint, error = %e, "post-commit: stop slave failed");
    }
    if let Err(e) = driver.change_master_to(endpoint, new_master, use_gtid).await {
        warn!(endpoint = %endpoint, error = %e, "post-commit: repoint failed");
        return;
    }
    if let Err(e) = driver.start_slave(endpoint).await {
        warn!(endpoint = %endpoint, error = %e, "post-commit: start slave failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDriver;
    use mysentry_core::Role;
    use std::time::Duration;

    fn ep(s: &str) -> Endpoint {
        s.parse().unwrap()
    }

    fn config() -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.cooldown = Duration::from_millis(5);
        config
    }

    /// master mysql-0, standby mysql-1, slave mysql-2, unregistered mysql-3
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

    fn caught_up(driver: &MockDriver) {
        driver.set_replication(
            &ep("mysql-2:3306"),
            &ep("mysql-0:3306"),
            ReplicationStatus::Ok,
        );
        driver.set_replication(
            &ep("mysql-1:3306"),
            &ep("mysql-0:3306"),
            ReplicationStatus::Ok,
        );
        // the old master is chained behind the standby (ring)
        driver.set_replication(
            &ep("mysql-0:3306"),
            &ep("mysql-1:3306"),
            ReplicationStatus::Ok,
        );
    }

    #[tokio::test]
    async fn test_switch_to_slave_full_sequence() {
        let mut topology = populated();
        let driver = MockDriver::new();
        caught_up(&driver);

        switch_to_master(&mut topology, &driver, &config(), &ep("mysql-2:3306"))
            .await
            .unwrap();

        assert_eq!(topology.master(), Some(&ep("mysql-2:3306")));
        assert_eq!(topology.standby(), Some(&ep("mysql-1:3306")));
        assert_eq!(topology.role_of(&ep("mysql-0:3306")), Some(Role::Slave));
        assert!(topology.is_consistent());

        assert_eq!(
            driver.calls(),
            vec![
                // fencing
                "kill_processes mysql-0:3306",
                "set_global_variable mysql-0:3306 read_only=1",
                "kill_processes mysql-0:3306",
                // verification + ring probe
                "check_replication mysql-2:3306 mysql-0:3306",
                "check_replication mysql-0:3306 mysql-1:3306",
                // chain the old master behind the target
                "stop_slave mysql-0:3306",
                "change_master_to mysql-0:3306 -> mysql-2:3306",
                // committed; clear the promoted instance's replica identity
                "stop_slave mysql-2:3306",
                "reset_slave mysql-2:3306",
                // standby onto the new master, then close the ring
                "stop_slave mysql-1:3306",
                "change_master_to mysql-1:3306 -> mysql-2:3306",
                "start_slave mysql-1:3306",
                "change_master_to mysql-2:3306 -> mysql-1:3306",
                "start_slave mysql-2:3306",
                // remaining slaves (the demoted master is one now)
                "stop_slave mysql-0:3306",
                "change_master_to mysql-0:3306 -> mysql-2:3306",
                "start_slave mysql-0:3306",
                // writes open on the new master
                "set_global_variable mysql-2:3306 read_only=0",
            ]
        );
    }

    #[tokio::test]
    async fn test_switch_to_standby_swaps_roles() {
        let mut topology = populated();
        let driver = MockDriver::new();
        caught_up(&driver);

        switch_to_master(&mut topology, &driver, &config(), &ep("mysql-1:3306"))
            .await
            .unwrap();

        assert_eq!(topology.master(), Some(&ep("mysql-1:3306")));
        assert_eq!(topology.standby(), Some(&ep("mysql-0:3306")));
        assert_eq!(topology.role_of(&ep("mysql-2:3306")), Some(Role::Slave));
        assert!(topology.is_consistent());
        // the ring closes against the new standby (the demoted master)
        assert!(driver
            .calls()
            .contains(&"change_master_to mysql-1:3306 -> mysql-0:3306".to_string()));
    }

    #[tokio::test]
    async fn test_preconditions() {
        let driver = MockDriver::new();
        let mut topology = populated();

        for target in ["mysql-0:3306", "mysql-3:3306", "mysql-9:3306"] {
            let before = topology.clone();
            let err = switch_to_master(&mut topology, &driver, &config(), &ep(target))
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), 403, "target {target}");
            assert_eq!(topology, before);
        }
        assert!(driver.calls().is_empty());

        let mut empty = Topology::new();
        let err = switch_to_master(&mut empty, &driver, &config(), &ep("mysql-2:3306"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[tokio::test]
    async fn test_read_only_failure_aborts_without_state_change() {
        let mut topology = populated();
        let before = topology.clone();
        let driver = MockDriver::new();
        caught_up(&driver);
        driver.fail_on("set_global_variable", &ep("mysql-0:3306"));

        let err = switch_to_master(&mut topology, &driver, &config(), &ep("mysql-2:3306"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert_eq!(topology, before);
        // nothing recorded yet, so nothing to undo
        assert!(driver.calls_for("set_global_variable").is_empty());
        assert!(driver.calls_for("start_slave").is_empty());
    }

    #[tokio::test]
    async fn test_second_kill_failure_rolls_back_read_only() {
        let mut topology = populated();
        let before = topology.clone();
        let driver = MockDriver::new();
        caught_up(&driver);
        driver.fail_after("kill_processes", &ep("mysql-0:3306"), 1);

        let err = switch_to_master(&mut topology, &driver, &config(), &ep("mysql-2:3306"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert_eq!(topology, before);
        assert_eq!(
            driver.calls_for("set_global_variable"),
            vec![
                "set_global_variable mysql-0:3306 read_only=1",
                "set_global_variable mysql-0:3306 read_only=0",
            ]
        );
    }

    #[tokio::test]
    async fn test_unverified_replication_rolls_back_after_grace_recheck() {
        let mut topology = populated();
        let before = topology.clone();
        let driver = MockDriver::new();
        driver.set_replication(
            &ep("mysql-2:3306"),
            &ep("mysql-0:3306"),
            ReplicationStatus::Syncing,
        );

        let err = switch_to_master(&mut topology, &driver, &config(), &ep("mysql-2:3306"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert_eq!(topology, before);
        // checked once, waited, checked again
        assert_eq!(
            driver
                .calls_for("check_replication")
                .iter()
                .filter(|c| c.contains("mysql-2:3306"))
                .count(),
            2
        );
        assert!(driver
            .calls()
            .contains(&"set_global_variable mysql-0:3306 read_only=0".to_string()));
    }

    #[tokio::test]
    async fn test_replication_recovering_within_grace_succeeds() {
        let mut topology = populated();
        let driver = MockDriver::new();
        caught_up(&driver);
        driver.set_replication_sequence(
            &ep("mysql-2:3306"),
            &ep("mysql-0:3306"),
            vec![ReplicationStatus::Syncing, ReplicationStatus::Ok],
        );

        switch_to_master(&mut topology, &driver, &config(), &ep("mysql-2:3306"))
            .await
            .unwrap();
        assert_eq!(topology.master(), Some(&ep("mysql-2:3306")));
    }

    #[tokio::test]
    async fn test_stop_slave_failure_rolls_back_read_only_only() {
        let mut topology = populated();
        let before = topology.clone();
        let driver = MockDriver::new();
        caught_up(&driver);
        driver.fail_on("stop_slave", &ep("mysql-0:3306"));

        let err = switch_to_master(&mut topology, &driver, &config(), &ep("mysql-2:3306"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert_eq!(topology, before);
        // replication was never stopped, so it must not be restarted
        assert!(driver.calls_for("start_slave").is_empty());
        assert!(driver
            .calls()
            .contains(&"set_global_variable mysql-0:3306 read_only=0".to_string()));
    }

    #[tokio::test]
    async fn test_repoint_failure_unwinds_in_reverse_order() {
        let mut topology = populated();
        let before = topology.clone();
        let driver = MockDriver::new();
        caught_up(&driver);
        driver.fail_on("change_master_to", &ep("mysql-0:3306"));

        let err = switch_to_master(&mut topology, &driver, &config(), &ep("mysql-2:3306"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert_eq!(topology, before);

        let calls = driver.calls();
        let restart = calls
            .iter()
            .position(|c| c == "start_slave mysql-0:3306")
            .expect("replication restarted");
        let reopen = calls
            .iter()
            .position(|c| c == "set_global_variable mysql-0:3306 read_only=0")
            .expect("read_only rolled back");
        assert!(restart < reopen, "compensations must run in reverse order");
    }

    #[tokio::test]
    async fn test_post_commit_failure_is_absorbed() {
        let mut topology = populated();
        let driver = MockDriver::new();
        caught_up(&driver);
        // the standby repoint after commit fails
        driver.fail_after("change_master_to", &ep("mysql-1:3306"), 0);

        switch_to_master(&mut topology, &driver, &config(), &ep("mysql-2:3306"))
            .await
            .unwrap();
        // role assignment is final even though a peer repoint failed
        assert_eq!(topology.master(), Some(&ep("mysql-2:3306")));
    }

    #[tokio::test]
    async fn test_saga_unwind_noop_after_commit() {
        let driver = MockDriver::new();
        let mut saga = Saga::new();
        saga.record(Compensation::DisableReadOnly(ep("mysql-0:3306")));
        saga.commit();
        saga.unwind(&driver).await;
        assert!(driver.calls().is_empty());
    }
}
