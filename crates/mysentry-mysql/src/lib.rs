//! MySQL backend for the mysentry replication driver
//!
//! [`MysqlDriver`] keeps one `mysql_async` pool per registered endpoint and
//! issues the administrative statements the coordinator orchestrates with:
//! `START/STOP/RESET SLAVE`, `CHANGE MASTER TO`, `SET GLOBAL`, `KILL`, and
//! the `SHOW` status queries backing health checks and views.

mod driver;
mod status;

pub use driver::MysqlDriver;
