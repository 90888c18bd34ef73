//! Monitor error types

use thiserror::Error;

use crate::driver::DriverError;
use crate::endpoint::Endpoint;

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors surfaced by the coordinator and its collaborators.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The endpoint is not known to the topology.
    #[error("unknown instance: {0}")]
    NotFound(Endpoint),

    /// The requested action is illegal for the current role/status.
    #[error("{0}")]
    PreconditionFailed(String),

    /// The endpoint string is not a valid `host:port`.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// An underlying replication operation failed.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// A consumed feed (discovery or snapshot) is temporarily unreachable.
    #[error("feed unavailable: {0}")]
    Unavailable(String),

    #[error("persistence error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The coordinator task is gone; the process is shutting down.
    #[error("coordinator unavailable")]
    ChannelClosed,
}

impl MonitorError {
    /// HTTP-analogous status code for the administrative/query API.
    pub fn status_code(&self) -> u16 {
        match self {
            MonitorError::NotFound(_) => 404,
            MonitorError::PreconditionFailed(_) => 403,
            MonitorError::InvalidEndpoint(_) => 400,
            MonitorError::Driver(_)
            | MonitorError::Io(_)
            | MonitorError::Serialization(_)
            | MonitorError::ChannelClosed => 500,
            MonitorError::Unavailable(_) => 503,
        }
    }

    /// Whether retrying later may succeed without operator intervention.
    /// `NotFound` and `PreconditionFailed` are never retried automatically.
    pub fn is_retriable(&self) -> bool {
        matches!(self, MonitorError::Unavailable(_))
    }
}

// The coordinator mailbox closing means the process is going down; callers
// see one uniform error instead of a channel type leaking through the API.
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for MonitorError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        MonitorError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for MonitorError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        MonitorError::ChannelClosed
    }
}
