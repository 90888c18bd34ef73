//! Endpoint identity
//!
//! An [`Endpoint`] is the `host:port` pair identifying one database instance.
//! It is the primary key throughout the system; equality is exact string
//! match, so `db-0:3306` and `db-0:03306` are different endpoints.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MonitorError;

/// `host:port` identity of a database instance.
///
/// Ordered lexicographically so sets iterate and persist deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    /// Build an endpoint from its parts.
    pub fn new(host: impl AsRef<str>, port: u16) -> Self {
        Self(format!("{}:{}", host.as_ref(), port))
    }

    /// The host part (everything before the last `:`).
    pub fn host(&self) -> &str {
        match self.0.rsplit_once(':') {
            Some((host, _)) => host,
            None => &self.0,
        }
    }

    /// The port part as text.
    pub fn port(&self) -> &str {
        match self.0.rsplit_once(':') {
            Some((_, port)) => port,
            None => "",
        }
    }

    /// The raw `host:port` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Endpoint {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| MonitorError::InvalidEndpoint(s.to_string()))?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(MonitorError::InvalidEndpoint(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
