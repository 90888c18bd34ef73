//! Core types for mysentry
//!
//! This crate holds everything the monitor and the proxy share:
//! - [`Endpoint`]: the `host:port` identity of a database instance
//! - [`Role`], [`InstanceStatus`], [`ReplicationStatus`]: role and health model
//! - [`Topology`] and its durable three-file mirror ([`TopologyFiles`])
//! - [`TopologySnapshot`]: the published `{master, slave}` routing view
//! - [`ReplicationDriver`]: the capability trait wrapping per-instance
//!   replication operations
//! - [`MonitorConfig`] / [`ProxyConfig`] / [`Secrets`]: process configuration

pub mod config;
pub mod driver;
pub mod endpoint;
pub mod error;
pub mod status;
pub mod store;
pub mod topology;

pub use config::{MonitorConfig, ProxyConfig, Secrets, ServiceMode};
pub use driver::{Credentials, DriverError, ProcessInfo, ReplicationDriver, SlaveStatus};
pub use endpoint::Endpoint;
pub use error::{MonitorError, Result};
pub use status::{InstanceStatus, ReplicationStatus, Role};
pub use store::TopologyFiles;
pub use topology::{Topology, TopologySnapshot};
