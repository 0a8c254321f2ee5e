//! Session error types.

use std::time::Duration;

use netconf_wire::{RpcError, WireError};
use thiserror::Error;

/// Failures surfaced by device sessions
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// Required argument missing or malformed; raised before any I/O
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No reply within the request deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Request was cancelled before a reply arrived
    #[error("request cancelled")]
    Cancelled,

    /// Transport I/O failure
    #[error("transport failure: {0}")]
    Transport(String),

    /// Session went away while the request was outstanding
    #[error("session disconnected")]
    SessionDown,

    /// Concurrent RPC limit reached
    #[error("limit of {0} concurrent rpcs reached")]
    LimitReached(usize),

    /// Reconnect requested before a session listener was attached
    #[error("session listener is not set")]
    MissingListener,

    /// Device answered with rpc-errors where data was required
    #[error("device rejected request: {}", summarize(.0))]
    Rejected(Vec<RpcError>),

    /// Hello exchange failed
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Malformed data on the wire
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

impl SessionError {
    /// True for deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionError::Timeout(_))
    }

    /// True when the failure says the session itself is unusable.
    ///
    /// Local refusals (bad arguments, rpc limit, device-level rejections) leave
    /// the transport healthy and do not warrant a reconnect.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Timeout(_)
                | SessionError::Cancelled
                | SessionError::Transport(_)
                | SessionError::SessionDown
                | SessionError::Wire(_)
        )
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Transport(err.to_string())
    }
}

fn summarize(errors: &[RpcError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(SessionError::Timeout(Duration::from_millis(500)).is_timeout());
        assert!(SessionError::Timeout(Duration::from_millis(500)).is_session_fatal());
        assert!(SessionError::SessionDown.is_session_fatal());
        assert!(!SessionError::LimitReached(4).is_session_fatal());
        assert!(!SessionError::InvalidArgument("x".into()).is_session_fatal());
        assert!(!SessionError::Cancelled.is_timeout());
    }

    #[test]
    fn test_rejected_message_lists_errors() {
        let err = SessionError::Rejected(vec![
            RpcError::new("protocol", "lock-denied", "held by 12"),
            RpcError::new("application", "operation-failed", "boom"),
        ]);
        assert_eq!(
            err.to_string(),
            "device rejected request: protocol/lock-denied: held by 12; application/operation-failed: boom"
        );
    }
}
