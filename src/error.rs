//! Outcome and error taxonomy for dispatched commands

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Terminal result of a dispatched command
pub type CommandOutcome = Result<Value, DispatchError>;

/// Classification of a failed outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed call at the client boundary; never reaches the transport
    InvalidRequest,
    /// No live transport at submission time
    NotConnected,
    /// No correlated response within the resolved timeout
    Timeout,
    /// The channel failed or dropped while the call was pending
    TransportFailure,
    /// The remote module reported a failure
    RemoteError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidRequest => "invalid request",
            ErrorKind::NotConnected => "not connected",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TransportFailure => "transport failure",
            ErrorKind::RemoteError => "remote error",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Command {module}.{command} timed out after {timeout:?}")]
    Timeout {
        command: String,
        module: String,
        timeout: Duration,
    },

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// Passed through from the remote side without reinterpretation
    #[error("Remote error: {message}")]
    Remote { message: String, data: Option<Value> },
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            DispatchError::NotConnected(_) => ErrorKind::NotConnected,
            DispatchError::Timeout { .. } => ErrorKind::Timeout,
            DispatchError::TransportFailure(_) => ErrorKind::TransportFailure,
            DispatchError::Remote { .. } => ErrorKind::RemoteError,
        }
    }

    /// Human-readable message without the kind prefix
    pub fn message(&self) -> String {
        match self {
            DispatchError::InvalidRequest(m)
            | DispatchError::NotConnected(m)
            | DispatchError::TransportFailure(m) => m.clone(),
            DispatchError::Remote { message, .. } => message.clone(),
            DispatchError::Timeout { timeout, .. } => {
                format!("no response within {:?}", timeout)
            }
        }
    }
}
