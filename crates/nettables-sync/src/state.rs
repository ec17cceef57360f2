//! Connection lifecycle states.

use std::fmt;
use std::sync::Arc;

use crate::error::SyncError;

/// Lifecycle of a client's connection to its server.
///
/// `ProtocolUnsupportedByServer` and `Error` are terminal: only an explicit
/// reconnect leaves them.
#[derive(Debug, Clone)]
pub enum ClientConnectionState {
    Disconnected,
    /// A stream is open; the hello has not been flushed yet.
    ConnectedToServer,
    /// The hello is on the wire; waiting for the server's snapshot.
    SentHelloToServer,
    InSyncWithServer,
    ProtocolUnsupportedByServer { server_revision: u16 },
    Error(Arc<SyncError>),
}

impl ClientConnectionState {
    pub fn is_in_sync(&self) -> bool {
        matches!(self, ClientConnectionState::InSyncWithServer)
    }

    /// Whether a stream is open.
    pub fn has_connection(&self) -> bool {
        matches!(
            self,
            ClientConnectionState::ConnectedToServer
                | ClientConnectionState::SentHelloToServer
                | ClientConnectionState::InSyncWithServer
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClientConnectionState::ProtocolUnsupportedByServer { .. }
                | ClientConnectionState::Error(_)
        )
    }
}

impl PartialEq for ClientConnectionState {
    fn eq(&self, other: &Self) -> bool {
        use ClientConnectionState::*;
        match (self, other) {
            (Disconnected, Disconnected)
            | (ConnectedToServer, ConnectedToServer)
            | (SentHelloToServer, SentHelloToServer)
            | (InSyncWithServer, InSyncWithServer) => true,
            (
                ProtocolUnsupportedByServer { server_revision: a },
                ProtocolUnsupportedByServer { server_revision: b },
            ) => a == b,
            (Error(a), Error(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for ClientConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientConnectionState::Disconnected => f.write_str("disconnected"),
            ClientConnectionState::ConnectedToServer => f.write_str("connected to server"),
            ClientConnectionState::SentHelloToServer => f.write_str("sent hello to server"),
            ClientConnectionState::InSyncWithServer => f.write_str("in sync with server"),
            ClientConnectionState::ProtocolUnsupportedByServer { server_revision } => {
                write!(f, "protocol unsupported by server ({:#06x})", server_revision)
            }
            ClientConnectionState::Error(e) => write!(f, "error: {}", e),
        }
    }
}

/// Lifecycle of one client connection as seen by the server.
#[derive(Debug, Clone)]
pub enum ServerConnectionState {
    /// Stream accepted; waiting for the client hello.
    GotConnectionFromClient,
    /// Handshake done; receives broadcasts.
    ConnectedToClient,
    ClientDisconnected,
    Error(Arc<SyncError>),
}

impl ServerConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ServerConnectionState::ConnectedToClient)
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            ServerConnectionState::ClientDisconnected | ServerConnectionState::Error(_)
        )
    }
}

impl fmt::Display for ServerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerConnectionState::GotConnectionFromClient => {
                f.write_str("got connection from client")
            }
            ServerConnectionState::ConnectedToClient => f.write_str("connected to client"),
            ServerConnectionState::ClientDisconnected => f.write_str("client disconnected"),
            ServerConnectionState::Error(e) => write!(f, "error: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(ClientConnectionState::InSyncWithServer.is_in_sync());
        assert!(ClientConnectionState::SentHelloToServer.has_connection());
        assert!(!ClientConnectionState::Disconnected.has_connection());
        assert!(ClientConnectionState::ProtocolUnsupportedByServer {
            server_revision: 0x0300
        }
        .is_terminal());
        assert!(ServerConnectionState::ClientDisconnected.is_closed());
    }

    #[test]
    fn test_error_states_compare_by_identity() {
        let cause = Arc::new(SyncError::BadMessage("x".into()));
        let a = ClientConnectionState::Error(Arc::clone(&cause));
        let b = ClientConnectionState::Error(cause);
        let c = ClientConnectionState::Error(Arc::new(SyncError::BadMessage("x".into())));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ClientConnectionState::ProtocolUnsupportedByServer {
                server_revision: 0x0300
            }
            .to_string(),
            "protocol unsupported by server (0x0300)"
        );
    }
}
