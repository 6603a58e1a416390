use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{ConnectorError, HandlerError, ResolverError};
use crate::message::Event;

/// Subscriber callback. Errors and panics are caught per handler.
pub type Handler = Arc<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;

/// Why a live link ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Unexpected close, I/O error or connect failure
    Transient(String),
    /// Remote side rejected the credential
    AuthRejected(String),
    /// No pong within the heartbeat timeout
    HeartbeatTimeout,
    /// Closed locally via disconnect()
    ClientRequested,
}

impl CloseReason {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CloseReason::Transient(_) | CloseReason::HeartbeatTimeout
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Transient(msg) => write!(f, "transient: {}", msg),
            CloseReason::AuthRejected(msg) => write!(f, "auth rejected: {}", msg),
            CloseReason::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            CloseReason::ClientRequested => write!(f, "client requested"),
        }
    }
}

impl From<ConnectorError> for CloseReason {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::AuthFailed(msg) => CloseReason::AuthRejected(msg),
            other => CloseReason::Transient(other.to_string()),
        }
    }
}

/// Event read from a live link
#[derive(Debug)]
pub enum LinkEvent {
    Frame(Vec<u8>),
    /// Last event on a link
    Closed(CloseReason),
}

/// One live connection: dropping `outbound` closes it
pub struct Link {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::Receiver<LinkEvent>,
}

/// Opens streaming connections to a price source (WebSocket, test doubles, ...)
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection. `ConnectorError::AuthFailed` is treated as terminal.
    async fn connect(&self, endpoint: &str, credential: Option<&str>)
        -> Result<Link, ConnectorError>;
}

/// KeyResolver trait for credential sources (env vars, Vault, etc.)
pub trait KeyResolver: Send + Sync {
    /// Resolve a credential from a source string (e.g., "env:RTX_TOKEN")
    fn resolve(&self, source: &str) -> Result<String, ResolverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_retryable() {
        assert!(CloseReason::Transient("reset".into()).is_retryable());
        assert!(CloseReason::HeartbeatTimeout.is_retryable());
        assert!(!CloseReason::AuthRejected("401".into()).is_retryable());
        assert!(!CloseReason::ClientRequested.is_retryable());
    }

    #[test]
    fn test_close_reason_from_connector_error() {
        let reason: CloseReason = ConnectorError::AuthFailed("bad token".into()).into();
        assert_eq!(reason, CloseReason::AuthRejected("bad token".into()));

        let reason: CloseReason = ConnectorError::Timeout(500).into();
        assert!(reason.is_retryable());
    }
}
