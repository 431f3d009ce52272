//! Realtime transport for `tchat`.
//!
//! [`realtime::RealtimeSession`] owns the single WebSocket connection to the
//! chat server, authenticates it, and routes inbound messages either to the
//! open conversation's [`realtime::Subscription`] or to the unread counters.

pub mod realtime;

use std::fmt;

use tchat_proto::codec::ProtocolError;

/// Lifecycle of the realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection exists.
    Disconnected,
    /// The socket is being opened and the auth frame sent.
    Connecting,
    /// The socket is open and the auth frame was sent. The server does not
    /// confirm authorization, so this is optimistic.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Errors that can occur while opening the realtime connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The server could not be reached or the socket failed.
    #[error("realtime server unreachable: {0}")]
    Network(String),

    /// A frame could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Map a `tokio_tungstenite` error to a [`TransportError`].
fn map_ws_error(err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => TransportError::Network(io_err.to_string()),
        WsError::Tls(_) => TransportError::Network(format!("TLS error: {err}")),
        WsError::Http(response) => {
            TransportError::Network(format!("HTTP error: status {}", response.status()))
        }
        other => TransportError::Network(other.to_string()),
    }
}
