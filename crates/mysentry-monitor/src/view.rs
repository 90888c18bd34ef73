//! Read-only instance views
//!
//! Views are built fresh per query from the topology plus live-computed
//! statuses; nothing here is stored. The allowed-action set tells the
//! caller which administrative commands are currently legal for the
//! instance, so a UI can render exactly those.

use serde::Serialize;
use std::collections::BTreeMap;

use mysentry_core::{
    Endpoint, InstanceStatus, MonitorError, ProcessInfo, ReplicationDriver, ReplicationStatus,
    Role, Topology,
};

use crate::actions::Action;

/// One instance as shown in the overview; the detail query additionally
/// fills the live process list and status maps.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceView {
    pub host: String,
    pub port: String,
    pub role: Role,
    pub instance_status: InstanceStatus,
    pub replication_status: ReplicationStatus,
    pub allowed_actions: Vec<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processes: Option<Vec<ProcessInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slave_status: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_status: Option<BTreeMap<String, String>>,
}

/// Role and statuses of one known endpoint, computed live.
async fn instance_model(
    topology: &Topology,
    driver: &dyn ReplicationDriver,
    endpoint: &Endpoint,
) -> Result<(Role, InstanceStatus, ReplicationStatus), MonitorError> {
    let role = topology
        .role_of(endpoint)
        .ok_or_else(|| MonitorError::NotFound(endpoint.clone()))?;
    let instance_status = driver.check_instance(endpoint).await;
    let replication_status = match role {
        // A replicating master means it is chained behind the standby.
        Role::Master => match topology.standby() {
            Some(standby) => driver.check_replication(endpoint, standby).await,
            None => ReplicationStatus::None,
        },
        Role::Standby | Role::Slave => match topology.master() {
            Some(master) => driver.check_replication(endpoint, master).await,
            None => ReplicationStatus::None,
        },
        Role::Unregistered => ReplicationStatus::None,
    };
    Ok((role, instance_status, replication_status))
}

/// Which administrative actions are currently legal. Pure; unit-tested
/// against the full role/status matrix.
pub(crate) fn allowed_actions(
    role: Role,
    replication_status: ReplicationStatus,
    read_only_off: bool,
    has_master: bool,
    has_standby: bool,
) -> Vec<Action> {
    match role {
        Role::Master => {
            let mut actions = if read_only_off {
                vec![Action::Pause]
            } else {
                vec![Action::Resume]
            };
            if replication_status == ReplicationStatus::None {
                if has_standby {
                    actions.push(Action::Active);
                }
            } else {
                actions.push(Action::Detach);
            }
            actions
        }
        Role::Unregistered => {
            if !has_master {
                vec![Action::RegisterMaster]
            } else if !has_standby {
                vec![Action::RegisterSlave, Action::RegisterStandby]
            } else {
                vec![Action::RegisterSlave]
            }
        }
        Role::Standby | Role::Slave => {
            let mut actions = match replication_status {
                ReplicationStatus::None => vec![Action::Active],
                ReplicationStatus::Ok | ReplicationStatus::Syncing => {
                    vec![Action::Detach, Action::Pause, Action::Switch]
                }
                ReplicationStatus::Pausing => vec![Action::Detach, Action::Resume],
                ReplicationStatus::WrongMaster => vec![Action::Detach],
                ReplicationStatus::Unknown | ReplicationStatus::Error => Vec::new(),
            };
            actions.push(Action::Unregister);
            actions
        }
    }
}

async fn build_view(
    topology: &Topology,
    driver: &dyn ReplicationDriver,
    endpoint: &Endpoint,
) -> Result<InstanceView, MonitorError> {
    let (role, instance_status, replication_status) =
        instance_model(topology, driver, endpoint).await?;
    let read_only_off = if role == Role::Master {
        matches!(
            driver.get_global_variable(endpoint, "read_only").await,
            Ok(Some(value)) if value == "OFF"
        )
    } else {
        false
    };
    let actions = allowed_actions(
        role,
        replication_status,
        read_only_off,
        topology.master().is_some(),
        topology.standby().is_some(),
    );
    Ok(InstanceView {
        host: endpoint.host().to_string(),
        port: endpoint.port().to_string(),
        role,
        instance_status,
        replication_status,
        allowed_actions: actions,
        processes: None,
        slave_status: None,
        global_status: None,
    })
}

/// All known instances, sorted by host then port.
pub(crate) async fn overview(
    topology: &Topology,
    driver: &dyn ReplicationDriver,
) -> Result<Vec<InstanceView>, MonitorError> {
    let endpoints: Vec<Endpoint> = topology.iter().map(|(ep, _)| ep.clone()).collect();
    let mut views = Vec::with_capacity(endpoints.len());
    for endpoint in &endpoints {
        views.push(build_view(topology, driver, endpoint).await?);
    }
    views.sort_by(|a, b| a.host.cmp(&b.host).then_with(|| a.port.cmp(&b.port)));
    Ok(views)
}

/// One instance with the live process list and status maps attached.
/// The extras are best-effort: an instance that answers the role checks but
/// not the detail queries still gets a view.
pub(crate) async fn detail(
    topology: &Topology,
    driver: &dyn ReplicationDriver,
    endpoint: &Endpoint,
) -> Result<InstanceView, MonitorError> {
    let mut view = build_view(topology, driver, endpoint).await?;
    view.processes = driver.process_list(endpoint).await.ok();
    view.slave_status = match driver.slave_status(endpoint).await {
        Ok(Some(status)) => Some(status.to_field_map()),
        _ => None,
    };
    view.global_status = driver.global_status(endpoint, "%").await.ok();
    Ok(view)
}
