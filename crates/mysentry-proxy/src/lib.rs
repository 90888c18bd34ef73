//! Traffic proxy
//!
//! Relays client TCP connections to the endpoints the monitor currently
//! publishes for one service mode (`master` or `slave`). The target list is
//! refreshed from the snapshot feed; each accepted connection picks the
//! next target round-robin and bytes flow both ways until either side
//! closes.

pub mod feed;
pub mod proxy;

pub use feed::run_feed;
pub use proxy::{run_listener, serve, TargetPool};
