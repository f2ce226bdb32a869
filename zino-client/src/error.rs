// Error taxonomy for the Zino client

//! Typed errors shared by all protocol layers
//!
//! Transport failures are classified at the framing layer; the manager and
//! the update handler pass them through unchanged so callers can decide
//! between reconnecting ([`Error::is_connection_loss`]) and retrying the
//! same operation ([`Error::Retry`]).

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors surfaced by the client.
#[derive(Debug, Error)]
pub enum Error {
    /// No socket, or the channel is in a state that forbids the operation.
    #[error("not connected to server")]
    NotConnected,

    /// The peer closed the connection mid-operation.
    #[error("connection lost: {0}")]
    LostConnection(String),

    /// The channel is connected but the session has not authenticated.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Credentials were rejected, or required credentials are missing.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Structurally unparseable response, or an untranslated 5xx.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transient server-side malformation; retry the same operation.
    #[error("transient server error, retry the request: {0}")]
    Retry(String),

    /// The server refused to reopen a closed event.
    #[error("cannot reopen closed event {0}")]
    EventClosed(u32),

    /// A socket read did not complete within the configured timeout.
    #[error("timed out waiting for reply to {command:?} (partial data: {partial:?})")]
    Timeout {
        /// The command that was waiting for a reply.
        command: String,
        /// Whatever had been buffered when the timeout hit.
        partial: String,
    },

    /// An event payload from the server failed field validation.
    #[error("invalid event payload: {0}")]
    Validation(String),

    /// The `type` attribute names no known event variant.
    #[error("unknown event type {0:?}")]
    UnknownEventType(String),

    /// A configuration file could not be read or understood.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Unclassified I/O failure (typically during connect).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True when the session is gone and the caller must reconnect.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Error::NotConnected | Error::LostConnection(_))
    }

    /// Classify an I/O error from an established socket.
    pub(crate) fn from_io(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => Error::LostConnection(err.to_string()),
            io::ErrorKind::NotConnected => Error::NotConnected,
            _ => Error::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_loss_classification() {
        assert!(Error::NotConnected.is_connection_loss());
        assert!(Error::LostConnection("gone".to_string()).is_connection_loss());
        assert!(!Error::NotAuthenticated.is_connection_loss());
        assert!(!Error::Protocol("bad".to_string()).is_connection_loss());
    }

    #[test]
    fn test_from_io_maps_peer_close_to_lost_connection() {
        let err = Error::from_io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(matches!(err, Error::LostConnection(_)));

        let err = Error::from_io(io::Error::new(io::ErrorKind::PermissionDenied, "nope"));
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_timeout_display_carries_command_and_buffer() {
        let err = Error::Timeout {
            command: "caseids".to_string(),
            partial: "304 li".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("caseids"));
        assert!(text.contains("304 li"));
    }
}
