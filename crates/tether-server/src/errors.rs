//! Server error types.

use std::io;

/// A namespace failed validation while being built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    /// Namespace name is empty or contains `.` or `#`.
    #[error("invalid namespace name '{0}'")]
    InvalidNamespaceName(String),

    /// Member name uses the reserved `_` prefix.
    #[error("member '{member}' of namespace '{namespace}' uses the reserved '_' prefix")]
    ReservedName {
        /// Namespace being built.
        namespace: String,
        /// Offending member.
        member: String,
    },

    /// Member name was declared twice.
    #[error("member '{member}' declared twice in namespace '{namespace}'")]
    DuplicateMember {
        /// Namespace being built.
        namespace: String,
        /// Offending member.
        member: String,
    },
}

/// Errors starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        source: io::Error,
    },

    /// Other I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_messages() {
        let err = RegistrationError::ReservedName {
            namespace: "myApi".into(),
            member: "_hidden".into(),
        };
        assert_eq!(
            err.to_string(),
            "member '_hidden' of namespace 'myApi' uses the reserved '_' prefix"
        );
        assert_eq!(
            RegistrationError::InvalidNamespaceName("a.b".into()).to_string(),
            "invalid namespace name 'a.b'"
        );
    }

    #[test]
    fn bind_error_display() {
        let err = ServerError::Bind {
            addr: "0.0.0.0:1".into(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "failed to bind 0.0.0.0:1: denied");
    }
}
