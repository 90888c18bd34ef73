//! Snapshot computation and publication
//!
//! After every coordinator event the routing snapshot is recomputed and
//! compared structurally against the last published one; subscribers only
//! see actual membership changes. Publication is fire-and-forget through a
//! broadcast channel, so a slow subscriber can never stall the coordinator.

use tokio::sync::broadcast;

use mysentry_core::{InstanceStatus, ReplicationDriver, Topology, TopologySnapshot};

/// Content-diffed broadcast of [`TopologySnapshot`]s.
pub struct SnapshotPublisher {
    tx: broadcast::Sender<TopologySnapshot>,
    last: TopologySnapshot,
}

impl SnapshotPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            last: TopologySnapshot::default(),
        }
    }

    /// The last published snapshot, for new subscribers.
    pub fn current(&self) -> TopologySnapshot {
        self.last.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TopologySnapshot> {
        self.tx.subscribe()
    }

    /// Publish `next` if it differs from the last published snapshot.
    /// Returns whether a publish happened.
    pub fn publish_if_changed(&mut self, next: TopologySnapshot) -> bool {
        if next == self.last {
            return false;
        }
        self.last = next.clone();
        // no receivers is fine; lagging receivers drop old values themselves
        let _ = self.tx.send(next);
        true
    }
}

/// The endpoints currently usable for routing: the master if its process
/// answers, and every slave replicating (or catching up) from it.
pub(crate) async fn compute(
    topology: &Topology,
    driver: &dyn ReplicationDriver,
) -> TopologySnapshot {
    let mut snapshot = TopologySnapshot::default();
    let Some(master) = topology.master() else {
        return snapshot;
    };
    if driver.check_instance(master).await == InstanceStatus::Ok {
        snapshot.master.push(master.clone());
    }
    for slave in topology.slaves() {
        if driver.check_replication(slave, master).await.is_serving() {
            snapshot.slave.push(slave.clone());
        }
    }
    snapshot
}
