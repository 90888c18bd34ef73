//! Topology coordinator
//!
//! One actor task owns the [`mysentry_core::Topology`] and serializes
//! everything that reads or mutates it: administrative commands, read
//! queries, discovery reconciliation, the periodic health inspection, and
//! the periodic metrics report. External code talks to it through
//! [`MonitorHandle`] (request/response over channels) and receives routing
//! snapshots through [`Subscription`] (broadcast fan-out).

pub mod actions;
pub mod coordinator;
pub mod discovery;
pub mod report;
pub mod snapshot;
pub mod switchover;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

pub use actions::Action;
pub use coordinator::{Coordinator, MonitorHandle, Subscription};
pub use discovery::{AppProcs, HttpInventoryWatcher, InventoryWatcher, ProcessInstance};
pub use report::GraphiteReporter;
pub use snapshot::SnapshotPublisher;
pub use view::InstanceView;
