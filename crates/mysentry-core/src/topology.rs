//! The authoritative role partitions
//!
//! [`Topology`] is the single in-memory truth about who is master, standby,
//! slave, or unregistered. It is owned exclusively by the coordinator task
//! and mutated only inside its serialized event loop; nothing here locks.
//!
//! Structural invariants enforced by this type:
//! - the four partitions are pairwise disjoint
//! - master and standby hold at most one endpoint each

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::endpoint::Endpoint;
use crate::error::MonitorError;
use crate::status::Role;

/// The four role partitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    master: Option<Endpoint>,
    standby: Option<Endpoint>,
    slaves: BTreeSet<Endpoint>,
    unregistered: BTreeSet<Endpoint>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn master(&self) -> Option<&Endpoint> {
        self.master.as_ref()
    }

    pub fn standby(&self) -> Option<&Endpoint> {
        self.standby.as_ref()
    }

    pub fn slaves(&self) -> &BTreeSet<Endpoint> {
        &self.slaves
    }

    pub fn unregistered(&self) -> &BTreeSet<Endpoint> {
        &self.unregistered
    }

    /// The role of `endpoint`, or `None` if it is unknown.
    pub fn role_of(&self, endpoint: &Endpoint) -> Option<Role> {
        if self.master.as_ref() == Some(endpoint) {
            Some(Role::Master)
        } else if self.standby.as_ref() == Some(endpoint) {
            Some(Role::Standby)
        } else if self.slaves.contains(endpoint) {
            Some(Role::Slave)
        } else if self.unregistered.contains(endpoint) {
            Some(Role::Unregistered)
        } else {
            None
        }
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.role_of(endpoint).is_some()
    }

    /// All known endpoints with their roles, master first, then standby,
    /// slaves, unregistered.
    pub fn iter(&self) -> impl Iterator<Item = (&Endpoint, Role)> {
        self.master
            .iter()
            .map(|ep| (ep, Role::Master))
            .chain(self.standby.iter().map(|ep| (ep, Role::Standby)))
            .chain(self.slaves.iter().map(|ep| (ep, Role::Slave)))
            .chain(self.unregistered.iter().map(|ep| (ep, Role::Unregistered)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.master.is_none()
            && self.standby.is_none()
            && self.slaves.is_empty()
            && self.unregistered.is_empty()
    }

    /// Track a newly discovered endpoint. No-op if it is already known.
    pub fn insert_unregistered(&mut self, endpoint: Endpoint) -> bool {
        if self.contains(&endpoint) {
            return false;
        }
        self.unregistered.insert(endpoint)
    }

    /// Drop `endpoint` from whatever partition holds it.
    pub fn remove(&mut self, endpoint: &Endpoint) -> Option<Role> {
        let role = self.role_of(endpoint)?;
        match role {
            Role::Master => self.master = None,
            Role::Standby => self.standby = None,
            Role::Slave => {
                self.slaves.remove(endpoint);
            }
            Role::Unregistered => {
                self.unregistered.remove(endpoint);
            }
        }
        Some(role)
    }

    /// Move an unregistered endpoint into a replication role.
    ///
    /// Enforces the structural rules only (must come from `unregistered`,
    /// singleton slots must be free); the role-legality rules of §the action
    /// handlers live with the handlers.
    pub fn register(&mut self, endpoint: &Endpoint, role: Role) -> Result<(), MonitorError> {
        if !self.unregistered.contains(endpoint) {
            return Err(MonitorError::PreconditionFailed(format!(
                "{endpoint} is already registered"
            )));
        }
        match role {
            Role::Master => {
                if self.master.is_some() {
                    return Err(MonitorError::PreconditionFailed(
                        "master is already registered".into(),
                    ));
                }
                self.unregistered.remove(endpoint);
                self.master = Some(endpoint.clone());
            }
            Role::Standby => {
                if self.standby.is_some() {
                    return Err(MonitorError::PreconditionFailed(
                        "standby is already registered".into(),
                    ));
                }
                self.unregistered.remove(endpoint);
                self.standby = Some(endpoint.clone());
            }
            Role::Slave => {
                self.unregistered.remove(endpoint);
                self.slaves.insert(endpoint.clone());
            }
            Role::Unregistered => {
                return Err(MonitorError::PreconditionFailed(
                    "cannot register as unregistered".into(),
                ));
            }
        }
        Ok(())
    }

    /// Move a standby/slave back into `unregistered`. The master cannot be
    /// unregistered; it must be switched away from first.
    pub fn demote(&mut self, endpoint: &Endpoint) -> Result<(), MonitorError> {
        match self.role_of(endpoint) {
            Some(Role::Master) => Err(MonitorError::PreconditionFailed(
                "master is not allowed to be unregistered".into(),
            )),
            Some(Role::Standby) => {
                self.standby = None;
                self.unregistered.insert(endpoint.clone());
                Ok(())
            }
            Some(Role::Slave) => {
                self.slaves.remove(endpoint);
                self.unregistered.insert(endpoint.clone());
                Ok(())
            }
            Some(Role::Unregistered) => Ok(()),
            None => Err(MonitorError::NotFound(endpoint.clone())),
        }
    }

    /// The switchover commit: `target` becomes master, the old master takes
    /// the target's former place — slave normally, standby if the target was
    /// the standby. This is the point of no return of the switch protocol.
    pub fn commit_switch(&mut self, target: &Endpoint) -> Result<(), MonitorError> {
        let old_master = self.master.clone().ok_or_else(|| {
            MonitorError::PreconditionFailed("master is not registered".into())
        })?;
        if &old_master == target {
            return Err(MonitorError::PreconditionFailed(format!(
                "{target} is already master"
            )));
        }
        match self.role_of(target) {
            Some(Role::Standby) => {
                self.standby = Some(old_master);
            }
            Some(Role::Slave) => {
                self.slaves.remove(target);
                self.slaves.insert(old_master);
            }
            _ => {
                return Err(MonitorError::PreconditionFailed(format!(
                    "{target} is not a registered slave or standby"
                )));
            }
        }
        self.master = Some(target.clone());
        Ok(())
    }

    /// Partition disjointness and singleton checks, for tests and debugging.
    pub fn is_consistent(&self) -> bool {
        let mut seen = BTreeSet::new();
        self.iter().all(|(ep, _)| seen.insert(ep.clone()))
    }
}

/// The externally published routing view: endpoints currently usable per
/// service mode. Compared structurally to detect change; both lists are in
/// deterministic (sorted) order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub master: Vec<Endpoint>,
    pub slave: Vec<Endpoint>,
}
