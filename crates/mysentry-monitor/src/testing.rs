//! Scripted driver for coordinator and saga tests
//!
//! Records every operation in call order, answers statuses from scripted
//! maps, and fails any (operation, endpoint) pair on demand — enough to
//! drive switchover rollback paths without a database.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use mysentry_core::driver::DriverResult;
use mysentry_core::{
    Credentials, DriverError, Endpoint, InstanceStatus, ProcessInfo, ReplicationDriver,
    ReplicationStatus, SlaveStatus,
};

#[derive(Default)]
pub(crate) struct MockDriver {
    instances: Mutex<HashMap<Endpoint, InstanceStatus>>,
    replication: Mutex<HashMap<(Endpoint, Endpoint), VecDeque<ReplicationStatus>>>,
    global_vars: Mutex<HashMap<(Endpoint, String), String>>,
    global_status: Mutex<HashMap<Endpoint, BTreeMap<String, String>>>,
    slave_status: Mutex<HashMap<Endpoint, SlaveStatus>>,
    // (op, endpoint) -> successful calls allowed before failing
    fail: Mutex<HashMap<(&'static str, Endpoint), usize>>,
    calls: Mutex<Vec<String>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_instance(&self, endpoint: &Endpoint, status: InstanceStatus) {
        self.instances
            .lock()
            .unwrap()
            .insert(endpoint.clone(), status);
    }

    pub fn set_replication(&self, endpoint: &Endpoint, source: &Endpoint, status: ReplicationStatus) {
        self.set_replication_sequence(endpoint, source, vec![status]);
    }

    /// Script successive `check_replication` answers; the last one sticks.
    pub fn set_replication_sequence(
        &self,
        endpoint: &Endpoint,
        source: &Endpoint,
        statuses: Vec<ReplicationStatus>,
    ) {
        self.replication.lock().unwrap().insert(
            (endpoint.clone(), source.clone()),
            statuses.into_iter().collect(),
        );
    }

    pub fn set_global_var(&self, endpoint: &Endpoint, name: &str, value: &str) {
        self.global_vars
            .lock()
            .unwrap()
            .insert((endpoint.clone(), name.to_string()), value.to_string());
    }

    pub fn set_global_status(&self, endpoint: &Endpoint, values: BTreeMap<String, String>) {
        self.global_status
            .lock()
            .unwrap()
            .insert(endpoint.clone(), values);
    }

    pub fn set_slave_status(&self, endpoint: &Endpoint, status: SlaveStatus) {
        self.slave_status
            .lock()
            .unwrap()
            .insert(endpoint.clone(), status);
    }

    /// Make `op` fail for `endpoint` with a scripted driver error.
    pub fn fail_on(&self, op: &'static str, endpoint: &Endpoint) {
        self.fail_after(op, endpoint, 0);
    }

    /// Let `op` succeed `successes` times for `endpoint`, then fail.
    pub fn fail_after(&self, op: &'static str, endpoint: &Endpoint, successes: usize) {
        self.fail
            .lock()
            .unwrap()
            .insert((op, endpoint.clone()), successes);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, op: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.split_whitespace().next() == Some(op))
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_fail(&self, op: &'static str, endpoint: &Endpoint) -> DriverResult<()> {
        match self.fail.lock().unwrap().get_mut(&(op, endpoint.clone())) {
            Some(0) => Err(DriverError::new(endpoint, op, "scripted failure")),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ReplicationDriver for MockDriver {
    async fn check_instance(&self, endpoint: &Endpoint) -> InstanceStatus {
        self.record(format!("check_instance {endpoint}"));
        self.instances
            .lock()
            .unwrap()
            .get(endpoint)
            .copied()
            .unwrap_or(InstanceStatus::Ok)
    }

    async fn check_replication(&self, endpoint: &Endpoint, source: &Endpoint) -> ReplicationStatus {
        self.record(format!("check_replication {endpoint} {source}"));
        let mut map = self.replication.lock().unwrap();
        match map.get_mut(&(endpoint.clone(), source.clone())) {
            Some(seq) if seq.len() > 1 => seq.pop_front().unwrap_or(ReplicationStatus::None),
            Some(seq) => seq.front().copied().unwrap_or(ReplicationStatus::None),
            None => ReplicationStatus::None,
        }
    }

    async fn register(&self, endpoint: &Endpoint, _credentials: &Credentials) -> DriverResult<()> {
        self.check_fail("register", endpoint)?;
        self.record(format!("register {endpoint}"));
        Ok(())
    }

    async fn unregister(&self, endpoint: &Endpoint) {
        self.record(format!("unregister {endpoint}"));
    }

    async fn start_slave(&self, endpoint: &Endpoint) -> DriverResult<()> {
        self.check_fail("start_slave", endpoint)?;
        self.record(format!("start_slave {endpoint}"));
        Ok(())
    }

    async fn stop_slave(&self, endpoint: &Endpoint) -> DriverResult<()> {
        self.check_fail("stop_slave", endpoint)?;
        self.record(format!("stop_slave {endpoint}"));
        Ok(())
    }

    async fn reset_slave(&self, endpoint: &Endpoint) -> DriverResult<()> {
        self.check_fail("reset_slave", endpoint)?;
        self.record(format!("reset_slave {endpoint}"));
        Ok(())
    }

    async fn change_master_to(
        &self,
        endpoint: &Endpoint,
        source: &Endpoint,
        _use_gtid: bool,
    ) -> DriverResult<()> {
        self.check_fail("change_master_to", endpoint)?;
        self.record(format!("change_master_to {endpoint} -> {source}"));
        Ok(())
    }

    async fn set_global_variable(
        &self,
        endpoint: &Endpoint,
        name: &str,
        value: i64,
    ) -> DriverResult<()> {
        self.check_fail("set_global_variable", endpoint)?;
        self.record(format!("set_global_variable {endpoint} {name}={value}"));
        Ok(())
    }

    async fn get_global_variable(
        &self,
        endpoint: &Endpoint,
        name: &str,
    ) -> DriverResult<Option<String>> {
        self.check_fail("get_global_variable", endpoint)?;
        Ok(self
            .global_vars
            .lock()
            .unwrap()
            .get(&(endpoint.clone(), name.to_string()))
            .cloned())
    }

    async fn kill_processes(
        &self,
        endpoint: &Endpoint,
        _spare_users: &[String],
    ) -> DriverResult<()> {
        self.check_fail("kill_processes", endpoint)?;
        self.record(format!("kill_processes {endpoint}"));
        Ok(())
    }

    async fn process_list(&self, endpoint: &Endpoint) -> DriverResult<Vec<ProcessInfo>> {
        self.check_fail("process_list", endpoint)?;
        Ok(Vec::new())
    }

    async fn slave_status(&self, endpoint: &Endpoint) -> DriverResult<Option<SlaveStatus>> {
        self.check_fail("slave_status", endpoint)?;
        Ok(self.slave_status.lock().unwrap().get(endpoint).cloned())
    }

    async fn global_status(
        &self,
        endpoint: &Endpoint,
        pattern: &str,
    ) -> DriverResult<BTreeMap<String, String>> {
        self.check_fail("global_status", endpoint)?;
        let map = self
            .global_status
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .unwrap_or_default();
        Ok(map
            .into_iter()
            .filter(|(k, _)| pattern == "%" || k == pattern)
            .collect())
    }
}
