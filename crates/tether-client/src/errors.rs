//! Client error types.

use tether_core::{ProtocolError, QueryError};

/// Errors surfaced by the client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    /// Protocol-level failure, raised locally or returned by the server.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The connection closed before the reply arrived.
    #[error("connection closed before reply")]
    Disconnected,

    /// No `ready` frame within the connect timeout.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A filtered subscription was requested without an id.
    #[error("filtered subscriptions require an id")]
    MissingSubscriptionId,

    /// Event spec or subscription id contains an illegal name.
    #[error("invalid event '{0}'")]
    InvalidEvent(String),

    /// The subscription query does not compile.
    #[error(transparent)]
    InvalidQuery(#[from] QueryError),

    /// WebSocket or encoding failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClientError {
    /// Shorthand for the local not-connected failure.
    pub fn not_connected() -> Self {
        Self::Protocol(ProtocolError::NotConnected)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_pass_through() {
        let err: ClientError = ProtocolError::NotAFunction {
            method: "myApi.CONSTANT".into(),
        }
        .into();
        assert_eq!(err.to_string(), "Call on non-function: myApi.CONSTANT");
        assert_eq!(ClientError::not_connected().to_string(), "Not connected");
    }

    #[test]
    fn json_errors_become_transport() {
        let err: ClientError = serde_json::from_str::<u8>("x").unwrap_err().into();
        assert!(matches!(err, ClientError::Transport(_)));
    }
}
