//! Error taxonomy shared by the scan builder, the wire layer and the
//! connection surface.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = HyperError> = std::result::Result<T, E>;

/// Errors surfaced to callers of this crate.
#[derive(Debug, Error)]
pub enum HyperError {
    /// The caller asked for a query shape or setting the store cannot serve.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Connection drop, framing error or protocol-level exception.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A single-row lookup found nothing.
    #[error("row {row:?} not found in table {table:?}")]
    NotFound {
        /// Table that was queried.
        table: String,
        /// Row key that was requested.
        row: String,
    },

    /// Schema alteration the store does not implement.
    #[error("{0} operation not supported by the store")]
    Unsupported(&'static str),

    /// Application exception raised by the store itself.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Schema-description document could not be interpreted.
    #[error("schema error: {0}")]
    Schema(String),
}

impl HyperError {
    /// Whether a reconnect-and-retry cycle may recover from this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, HyperError::Transport(_))
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        HyperError::Configuration(message.into())
    }
}

impl From<io::Error> for HyperError {
    fn from(err: io::Error) -> Self {
        HyperError::Transport(TransportError::Io(err))
    }
}

/// Failures of the transport or protocol layer. All of them are transient.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket level failure, including timeouts.
    #[error("i/o: {0}")]
    Io(#[from] io::Error),

    /// Malformed frame or message.
    #[error("protocol: {0}")]
    Protocol(String),

    /// Protocol-level application exception (unknown method, bad sequence id, ...).
    #[error("application exception (kind={kind}): {message}")]
    Application {
        /// Exception kind as sent by the peer.
        kind: i32,
        /// Diagnostic text; empty when the peer sent none.
        message: String,
    },

    /// The transport was used after being closed.
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Build an application exception, normalizing a missing message to "".
    pub fn application(kind: i32, message: Option<String>) -> Self {
        TransportError::Application {
            kind,
            message: message.unwrap_or_default(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        TransportError::Protocol(message.into())
    }
}

/// Exception raised by the store (`ClientException` on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("code {code}: {message}")]
pub struct RemoteError {
    /// Store-specific error code.
    pub code: i32,
    /// Diagnostic text; empty when the store sent none.
    pub message: String,
}

impl RemoteError {
    /// Build a remote error, normalizing a missing message to "".
    pub fn new(code: i32, message: Option<String>) -> Self {
        Self {
            code,
            message: message.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_transient() {
        assert!(HyperError::from(TransportError::Closed).is_transient());
        assert!(HyperError::from(io::Error::from(io::ErrorKind::TimedOut)).is_transient());
        assert!(!HyperError::configuration("bad").is_transient());
        assert!(!HyperError::Unsupported("rename_table").is_transient());
        assert!(!HyperError::from(RemoteError::new(7, None)).is_transient());
        assert!(!HyperError::NotFound {
            table: "pages".into(),
            row: "k1".into(),
        }
        .is_transient());
    }

    #[test]
    fn missing_messages_are_normalized() {
        let remote = RemoteError::new(42, None);
        assert_eq!(remote.message, "");
        assert_eq!(remote.to_string(), "code 42: ");

        let app = TransportError::application(1, None);
        assert_eq!(app.to_string(), "application exception (kind=1): ");

        let app = TransportError::application(3, Some("bad seq".into()));
        assert_eq!(app.to_string(), "application exception (kind=3): bad seq");
    }

    #[test]
    fn unsupported_names_the_operation() {
        let err = HyperError::Unsupported("rename_column");
        assert_eq!(
            err.to_string(),
            "rename_column operation not supported by the store"
        );
    }
}
