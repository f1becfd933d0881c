//! Protocol error kinds and their wire codes.

use crate::frames::CallFailure;

// ── Error code constants ────────────────────────────────────────────

/// Call targeted a namespace that is not registered.
pub const UNKNOWN_NAMESPACE: &str = "UNKNOWN_NAMESPACE";
/// Call targeted a member that is not an exported operation.
pub const UNKNOWN_OPERATION: &str = "UNKNOWN_OPERATION";
/// Call targeted a constant.
pub const NOT_A_FUNCTION: &str = "NOT_A_FUNCTION";
/// The operation body failed.
pub const HANDLER_FAILURE: &str = "HANDLER_FAILURE";
/// The authorization hook refused the handshake.
pub const AUTH_REJECTED: &str = "AUTH_REJECTED";
/// No live connection to issue the call on.
pub const NOT_CONNECTED: &str = "NOT_CONNECTED";
/// An inbound frame could not be parsed.
pub const INVALID_FRAME: &str = "INVALID_FRAME";

/// Errors surfaced by the call protocol.
///
/// Every variant except [`ProtocolError::AuthRejected`] is recoverable on the
/// connection that produced it: it becomes a failure reply, never a disconnect.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Namespace is not registered.
    #[error("No such namespace: {namespace}")]
    UnknownNamespace {
        /// Requested namespace.
        namespace: String,
    },

    /// Member is missing, not exported, or reserved.
    #[error("No such method: {method}")]
    UnknownOperation {
        /// Requested `ns.op` key.
        method: String,
    },

    /// Member exists but is a constant.
    #[error("Call on non-function: {method}")]
    NotAFunction {
        /// Requested `ns.op` key.
        method: String,
    },

    /// The exported operation threw or rejected.
    #[error("{message}")]
    HandlerFailure {
        /// Error message from the operation.
        message: String,
        /// Diagnostic trace, when the operation supplied one.
        trace: Option<String>,
    },

    /// The handshake was refused.
    #[error("authorization rejected: {reason}")]
    AuthRejected {
        /// Reason reported by the authorization hook.
        reason: String,
    },

    /// Call attempted without a live connection.
    #[error("Not connected")]
    NotConnected,

    /// Inbound frame was not valid JSON or had the wrong shape.
    #[error("invalid frame: {message}")]
    InvalidFrame {
        /// Parser diagnostic.
        message: String,
    },
}

impl ProtocolError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownNamespace { .. } => UNKNOWN_NAMESPACE,
            Self::UnknownOperation { .. } => UNKNOWN_OPERATION,
            Self::NotAFunction { .. } => NOT_A_FUNCTION,
            Self::HandlerFailure { .. } => HANDLER_FAILURE,
            Self::AuthRejected { .. } => AUTH_REJECTED,
            Self::NotConnected => NOT_CONNECTED,
            Self::InvalidFrame { .. } => INVALID_FRAME,
        }
    }

    /// Convert to the failure payload carried by a reply frame.
    pub fn to_failure(&self) -> CallFailure {
        CallFailure {
            code: self.code().to_owned(),
            message: self.to_string(),
            stack: match self {
                Self::HandlerFailure { trace, .. } => trace.clone(),
                _ => None,
            },
        }
    }

    /// Rebuild a protocol error from a received failure payload.
    ///
    /// Unknown codes are treated as handler failures so that the message is
    /// never lost.
    pub fn from_failure(failure: CallFailure) -> Self {
        let CallFailure { code, message, stack } = failure;
        match code.as_str() {
            UNKNOWN_NAMESPACE => Self::UnknownNamespace {
                namespace: strip_prefix(&message, "No such namespace: "),
            },
            UNKNOWN_OPERATION => Self::UnknownOperation {
                method: strip_prefix(&message, "No such method: "),
            },
            NOT_A_FUNCTION => Self::NotAFunction {
                method: strip_prefix(&message, "Call on non-function: "),
            },
            AUTH_REJECTED => Self::AuthRejected {
                reason: strip_prefix(&message, "authorization rejected: "),
            },
            NOT_CONNECTED => Self::NotConnected,
            INVALID_FRAME => Self::InvalidFrame {
                message: strip_prefix(&message, "invalid frame: "),
            },
            _ => Self::HandlerFailure {
                message,
                trace: stack,
            },
        }
    }
}

fn strip_prefix(message: &str, prefix: &str) -> String {
    message.strip_prefix(prefix).unwrap_or(message).to_owned()
}
